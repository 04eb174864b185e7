//! Dedicated writer task for outbound frames.
//!
//! Every pump and handler on a connection sends [`Frame`]s through a cloned
//! [`WriterHandle`]; a single task owns the write half of the connection.
//!
//! ```text
//! request-response ─┐
//! stream pump 1    ─┼─► mpsc::Sender<Frame> ─► Writer Task ─► write half
//! channel pump N   ─┘
//! ```
//!
//! Frames already queued when the task wakes up are coalesced into one
//! buffer and written with a single `write_all` + `flush`. The bounded
//! channel is the connection's back-pressure: senders wait when the peer
//! stops reading.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{DispatchError, Result};
use crate::protocol::Frame;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames queued before senders wait.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; the task ends once every handle is dropped.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<Frame>,
}

impl WriterHandle {
    /// Queue a frame, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` once the writer task has stopped.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| DispatchError::ConnectionClosed)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves when every handle is dropped (Ok)
/// or when a write fails (Err).
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<Frame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(64 * 1024);

    while let Some(first) = rx.recv().await {
        first.encode_into(&mut buf);

        let mut batched = 1;
        while batched < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => {
                    frame.encode_into(&mut buf);
                    batched += 1;
                }
                Err(_) => break,
            }
        }

        writer.write_all(&buf).await?;
        writer.flush().await?;
        buf.clear();
    }

    // Channel closed, clean shutdown
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Writer shutdown failed: {}", e);
    }
    Ok(())
}
