//! Connection runtime loop.
//!
//! A [`Connection`] serves one duplex byte stream:
//! 1. Split the stream into read and write halves
//! 2. Spawn the writer task on the write half
//! 3. Read frames and hand each request to the [`Dispatcher`]
//! 4. Pump streaming outcomes back as PAYLOAD frames
//! 5. Cancel every live Subscription when the read side closes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use duplex_rpc::{Connection, Dispatcher};
//!
//! # async fn serve(socket: tokio::net::TcpStream) -> duplex_rpc::error::Result<()> {
//! let dispatcher = Arc::new(Dispatcher::builder().build()?);
//! Connection::new(dispatcher).run(socket).await
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;

use crate::codec::WireFormat;
use crate::dispatcher::{Dispatcher, Outcome, Payload};
use crate::error::{DispatchError, Result};
use crate::handler::HandlerKind;
use crate::message::Message;
use crate::protocol::{error_codes, frame_type, Frame, FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::scheduler::{lock, SubscriptionHandle, SubscriptionId, SubscriptionStream};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default maximum concurrent stream and channel invocations per connection.
pub const DEFAULT_MAX_ACTIVE_STREAMS: usize = 256;

/// Default number of inbound channel elements queued per stream.
pub const DEFAULT_INBOUND_CAPACITY: usize = 32;

/// Default size of the socket read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub writer: WriterConfig,
    pub wire_format: WireFormat,
    pub max_payload_size: u32,
    /// Requests beyond this many live streams are rejected.
    pub max_active_streams: usize,
    pub inbound_capacity: usize,
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            wire_format: WireFormat::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_active_streams: DEFAULT_MAX_ACTIVE_STREAMS,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Live stream on the connection, keyed by stream ID.
#[derive(Default)]
struct ActiveStream {
    subscription: Option<SubscriptionHandle>,
    /// Feeds the inbound sequence of a channel until the peer completes it.
    inbound: Option<mpsc::Sender<Result<Message>>>,
}

type StreamTable = Arc<Mutex<HashMap<u32, ActiveStream>>>;

/// Serves one duplex connection with a shared [`Dispatcher`].
pub struct Connection {
    dispatcher: Arc<Dispatcher>,
    config: ConnectionConfig,
}

impl Connection {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            config: ConnectionConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the payload encoding.
    ///
    /// Default: MsgPack
    pub fn wire_format(mut self, format: WireFormat) -> Self {
        self.config.wire_format = format;
        self
    }

    /// Set the maximum number of live streams.
    ///
    /// Default: 256
    pub fn max_active_streams(mut self, limit: usize) -> Self {
        self.config.max_active_streams = limit;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Serve until the peer closes its side or sends invalid framing.
    ///
    /// # Errors
    ///
    /// I/O errors on the read half and `Protocol` errors from framing.
    pub async fn run<IO>(self, io: IO) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, write_half) = tokio::io::split(io);
        let (writer, _writer_task) = spawn_writer_task(write_half, self.config.writer.clone());

        let mut session = Session {
            dispatcher: self.dispatcher,
            writer,
            format: self.config.wire_format,
            max_active_streams: self.config.max_active_streams,
            inbound_capacity: self.config.inbound_capacity.max(1),
            streams: Arc::new(Mutex::new(HashMap::new())),
        };

        let mut frames = FrameBuffer::with_max_payload(self.config.max_payload_size);
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        let result = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break Ok(()), // Connection closed
                Ok(n) => n,
                Err(e) => break Err(DispatchError::Io(e)),
            };

            match frames.push(&buf[..n]) {
                Ok(batch) => {
                    for frame in batch {
                        session.handle_frame(frame).await;
                    }
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = &result {
            tracing::error!("Connection read loop error: {}", e);
        }
        session.shutdown();
        result
    }
}

/// Per-connection state owned by the read loop.
struct Session {
    dispatcher: Arc<Dispatcher>,
    writer: WriterHandle,
    format: WireFormat,
    max_active_streams: usize,
    inbound_capacity: usize,
    streams: StreamTable,
}

impl Session {
    async fn handle_frame(&mut self, frame: Frame) {
        if frame.header.is_request() {
            self.handle_request(frame).await;
            return;
        }

        let stream_id = frame.stream_id();
        match frame.frame_type() {
            frame_type::PAYLOAD => self.handle_inbound_payload(frame).await,
            frame_type::ERROR => self.handle_inbound_error(frame).await,
            frame_type::CANCEL => self.handle_cancel(stream_id),
            other => tracing::warn!(
                "Ignoring {} frame on stream {}",
                frame_type::name(other),
                stream_id
            ),
        }
    }

    async fn handle_request(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        let request_type = frame.frame_type();
        let fire_and_forget = request_type == frame_type::REQUEST_FNF;

        if lock(&self.streams).contains_key(&stream_id) {
            let err = DispatchError::Protocol(format!("Stream {} is already active", stream_id));
            if fire_and_forget {
                tracing::warn!("Dropping fire-and-forget: {}", err);
            } else {
                self.reply_error(stream_id, &err).await;
            }
            return;
        }

        let (route, body) = match frame.route_and_body() {
            Ok(parts) => parts,
            Err(e) => {
                if fire_and_forget {
                    tracing::warn!("Dropping malformed fire-and-forget: {}", e);
                } else {
                    self.reply_error(stream_id, &e).await;
                }
                return;
            }
        };
        tracing::debug!(
            "{} on stream {} for route {}",
            frame_type::name(request_type),
            stream_id,
            route
        );

        let resolved = self.dispatcher.routes().resolve(route).and_then(|kind| {
            if expected_kind(request_type) == Some(kind) {
                Ok(kind)
            } else {
                Err(DispatchError::HandlerInvocation(format!(
                    "{} cannot serve {} route '{}'",
                    frame_type::name(request_type),
                    kind,
                    route
                )))
            }
        });
        let kind = match resolved {
            Ok(kind) => kind,
            Err(e) => {
                if fire_and_forget {
                    tracing::warn!("Dropping fire-and-forget: {}", e);
                } else {
                    self.reply_error(stream_id, &e).await;
                }
                return;
            }
        };

        if kind.is_streaming() && lock(&self.streams).len() >= self.max_active_streams {
            tracing::warn!(
                "Stream capacity reached, rejecting stream {} for route {}",
                stream_id,
                route
            );
            let frame = Frame::error(
                stream_id,
                error_codes::REJECTED,
                &format!("Too many active streams ({})", self.max_active_streams),
            );
            self.send(frame).await;
            return;
        }

        if kind == HandlerKind::Channel {
            let payload = self.open_inbound(stream_id, body, frame.is_complete());
            let result = self.dispatcher.dispatch(route, payload);
            self.respond(stream_id, result).await;
            return;
        }

        let request = match self.format.decode_message(body) {
            Ok(message) => message,
            Err(e) => {
                let err = DispatchError::HandlerInvocation(format!("Undecodable request: {}", e));
                if fire_and_forget {
                    tracing::warn!("Dropping fire-and-forget for {}: {}", route, err);
                } else {
                    self.reply_error(stream_id, &err).await;
                }
                return;
            }
        };

        let result = self.dispatcher.dispatch(route, Payload::Single(request));
        if fire_and_forget {
            // No response frame exists for fire-and-forget.
            if let Err(e) = result {
                tracing::warn!("Fire-and-forget for {} failed: {}", route, e);
            }
            return;
        }
        self.respond(stream_id, result).await;
    }

    /// Register the inbound queue of a channel and expose it as a sequence.
    fn open_inbound(&mut self, stream_id: u32, first: &[u8], complete: bool) -> Payload {
        let (tx, rx) = mpsc::channel(self.inbound_capacity);
        if !first.is_empty() {
            // Fresh channel with capacity >= 1, so this cannot be full.
            if tx.try_send(self.format.decode_message(first)).is_err() {
                tracing::warn!("Channel {} dropped its first element", stream_id);
            }
        }

        let inbound = if complete { None } else { Some(tx) };
        lock(&self.streams).insert(
            stream_id,
            ActiveStream {
                subscription: None,
                inbound,
            },
        );

        Payload::sequence(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    /// Send the outcome of a dispatch back on `stream_id`.
    async fn respond(&mut self, stream_id: u32, result: Result<Outcome>) {
        match result {
            Ok(Outcome::Single(message)) => {
                lock(&self.streams).remove(&stream_id);
                let frame = match self.format.encode_message(&message) {
                    Ok(body) => Frame::next_complete(stream_id, body.into()),
                    Err(e) => Frame::error(stream_id, e.error_code(), &e.to_string()),
                };
                self.send(frame).await;
            }
            Ok(Outcome::Empty) => {
                lock(&self.streams).remove(&stream_id);
                self.send(Frame::complete(stream_id)).await;
            }
            Ok(Outcome::Sequence(output)) => {
                lock(&self.streams)
                    .entry(stream_id)
                    .or_default()
                    .subscription = Some(output.handle());
                tokio::spawn(pump(
                    stream_id,
                    output,
                    self.writer.clone(),
                    self.format,
                    self.streams.clone(),
                ));
            }
            Err(e) => {
                lock(&self.streams).remove(&stream_id);
                self.reply_error(stream_id, &e).await;
            }
        }
    }

    async fn handle_inbound_payload(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        let sender = lock(&self.streams)
            .get(&stream_id)
            .and_then(|stream| stream.inbound.clone());
        let Some(sender) = sender else {
            tracing::debug!("PAYLOAD for stream {} with no open input", stream_id);
            return;
        };

        if frame.is_next() {
            let item = self.format.decode_message(&frame.payload);
            if sender.send(item).await.is_err() {
                tracing::debug!("Channel {} no longer reads its input", stream_id);
            }
        }
        if frame.is_complete() {
            self.close_inbound(stream_id);
        }
    }

    async fn handle_inbound_error(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        let sender = lock(&self.streams)
            .get_mut(&stream_id)
            .and_then(|stream| stream.inbound.take());
        let Some(sender) = sender else {
            tracing::debug!("ERROR for stream {} with no open input", stream_id);
            return;
        };

        let reason = match frame.error_parts() {
            Ok((code, message)) => format!("peer error 0x{:04X}: {}", code, message),
            Err(e) => e.to_string(),
        };
        if sender
            .send(Err(DispatchError::UpstreamFailure(reason)))
            .await
            .is_err()
        {
            tracing::debug!("Channel {} ended before the peer error", stream_id);
        }
    }

    fn handle_cancel(&mut self, stream_id: u32) {
        let stream = lock(&self.streams).remove(&stream_id);
        match stream.and_then(|s| s.subscription) {
            Some(subscription) => {
                subscription.cancel();
            }
            None => tracing::debug!("CANCEL for unknown stream {}", stream_id),
        }
    }

    fn close_inbound(&mut self, stream_id: u32) {
        if let Some(stream) = lock(&self.streams).get_mut(&stream_id) {
            stream.inbound = None;
        }
    }

    async fn reply_error(&self, stream_id: u32, err: &DispatchError) {
        tracing::debug!("Stream {} rejected: {}", stream_id, err);
        let frame = Frame::error(stream_id, err.error_code(), &err.to_string());
        self.send(frame).await;
    }

    async fn send(&self, frame: Frame) {
        let stream_id = frame.stream_id();
        if let Err(e) = self.writer.send(frame).await {
            tracing::debug!("Dropping frame for stream {}: {}", stream_id, e);
        }
    }

    /// Cancel everything still live on this connection.
    fn shutdown(&mut self) {
        let streams: Vec<ActiveStream> = lock(&self.streams).drain().map(|(_, s)| s).collect();
        let mut cancelled = 0;
        for stream in streams {
            if let Some(subscription) = stream.subscription {
                if subscription.cancel() {
                    cancelled += 1;
                }
            }
        }
        if cancelled > 0 {
            tracing::debug!("Cancelled {} subscriptions on connection close", cancelled);
        }
    }
}

/// Handler kind a request frame type may address.
fn expected_kind(request_type: u8) -> Option<HandlerKind> {
    match request_type {
        frame_type::REQUEST_RESPONSE => Some(HandlerKind::RequestResponse),
        frame_type::REQUEST_FNF => Some(HandlerKind::FireAndForget),
        frame_type::REQUEST_STREAM => Some(HandlerKind::Stream),
        frame_type::REQUEST_CHANNEL => Some(HandlerKind::Channel),
        _ => None,
    }
}

/// Drop the table entry for `stream_id` if it still belongs to `subscription`.
///
/// The peer may have cancelled the stream and reused its ID already.
fn release_stream(streams: &StreamTable, stream_id: u32, subscription: SubscriptionId) -> bool {
    let mut streams = lock(streams);
    let owned = streams
        .get(&stream_id)
        .and_then(|stream| stream.subscription.as_ref())
        .is_some_and(|handle| handle.id() == subscription);
    if owned {
        streams.remove(&stream_id);
    }
    owned
}

/// Forward a streaming outcome to the peer until it terminates.
async fn pump(
    stream_id: u32,
    mut output: SubscriptionStream,
    writer: WriterHandle,
    format: WireFormat,
    streams: StreamTable,
) {
    let terminal = loop {
        match output.next().await {
            Some(Ok(message)) => match format.encode_message(&message) {
                Ok(body) => {
                    if let Err(e) = writer.send(Frame::next(stream_id, body.into())).await {
                        tracing::debug!("Stream {} lost its writer: {}", stream_id, e);
                        break None;
                    }
                }
                Err(e) => break Some(Frame::error(stream_id, e.error_code(), &e.to_string())),
            },
            Some(Err(e)) => break Some(Frame::error(stream_id, e.error_code(), &e.to_string())),
            None if output.is_cancelled() => break None,
            None => break Some(Frame::complete(stream_id)),
        }
    };

    // A peer CANCEL already removed the entry and needs no reply. Any other
    // cancellation is reported so the peer stops waiting.
    let owned = release_stream(&streams, stream_id, output.id());
    let terminal = match terminal {
        None if owned && output.is_cancelled() => Some(Frame::error(
            stream_id,
            error_codes::CANCELED,
            "Subscription cancelled",
        )),
        terminal => terminal,
    };

    if let Some(frame) = terminal {
        if let Err(e) = writer.send(frame).await {
            tracing::debug!("Stream {} ended after its writer: {}", stream_id, e);
        }
    }
}
