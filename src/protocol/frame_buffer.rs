//! Frame buffer for accumulating partial reads.
//!
//! Bytes arrive in arbitrary chunks; the buffer keeps whatever does not
//! form a complete frame yet. Once a header has been parsed it is held
//! aside until its payload is complete, so it is validated only once.

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{DispatchError, Result};

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    /// Header whose payload is still incomplete.
    pending: Option<Header>,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer (64 KiB initial capacity, 16 MiB max payload).
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            pending: None,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` for an invalid header; the connection should be
    /// dropped since framing can no longer be trusted.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let header = Header::decode(&self.buffer[..HEADER_SIZE])
                    .ok_or_else(|| DispatchError::Protocol("Truncated header".to_string()))?;
                header.validate(self.max_payload_size)?;
                let _ = self.buffer.split_to(HEADER_SIZE);
                header
            }
        };

        let len = header.payload_length as usize;
        if self.buffer.len() < len {
            self.pending = Some(header);
            return Ok(None);
        }

        let payload = self.buffer.split_to(len).freeze();
        Ok(Some(Frame { header, payload }))
    }

    /// Bytes held for incomplete frames.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
