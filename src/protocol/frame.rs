//! Frame struct with typed constructors and accessors.
//!
//! Request frames carry the route ahead of the encoded message:
//!
//! ```text
//! ┌───────────┬──────────────┬─────────────────┐
//! │ route_len │ route (utf8) │ encoded message │
//! │ 1 byte    │ route_len    │ rest (may be 0) │
//! └───────────┴──────────────┴─────────────────┘
//! ```
//!
//! ERROR frames carry a 4-byte BE error code followed by a utf8 message.
//!
//! # Example
//!
//! ```
//! use duplex_rpc::protocol::{frame_type, Frame};
//!
//! let frame = Frame::request(frame_type::REQUEST_STREAM, 1, "stream", b"body").unwrap();
//! let (route, body) = frame.route_and_body().unwrap();
//! assert_eq!(route, "stream");
//! assert_eq!(body, b"body");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{flags, frame_type, Header, HEADER_SIZE, MAX_ROUTE_LEN};
use crate::error::{DispatchError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame; the header's length is taken from `payload`.
    pub fn new(header: Header, payload: Bytes) -> Self {
        let header = Header {
            payload_length: payload.len() as u32,
            ..header
        };
        Self { header, payload }
    }

    fn build(frame_type: u8, flags: u8, stream_id: u32, payload: Bytes) -> Self {
        Self::new(Header::new(frame_type, flags, stream_id, 0), payload)
    }

    /// Build a request frame addressed to `route`.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the route is longer than 255 bytes.
    pub fn request(frame_type: u8, stream_id: u32, route: &str, body: &[u8]) -> Result<Self> {
        if route.len() > MAX_ROUTE_LEN {
            return Err(DispatchError::Protocol(format!(
                "Route name of {} bytes exceeds {}",
                route.len(),
                MAX_ROUTE_LEN
            )));
        }
        let mut payload = BytesMut::with_capacity(1 + route.len() + body.len());
        payload.put_u8(route.len() as u8);
        payload.put_slice(route.as_bytes());
        payload.put_slice(body);
        Ok(Self::build(frame_type, 0, stream_id, payload.freeze()))
    }

    /// An element of a stream.
    pub fn next(stream_id: u32, body: Bytes) -> Self {
        Self::build(frame_type::PAYLOAD, flags::NEXT, stream_id, body)
    }

    /// A single element that also ends the stream.
    pub fn next_complete(stream_id: u32, body: Bytes) -> Self {
        Self::build(
            frame_type::PAYLOAD,
            flags::NEXT | flags::COMPLETE,
            stream_id,
            body,
        )
    }

    /// End of stream without an element.
    pub fn complete(stream_id: u32) -> Self {
        Self::build(frame_type::PAYLOAD, flags::COMPLETE, stream_id, Bytes::new())
    }

    pub fn cancel(stream_id: u32) -> Self {
        Self::build(frame_type::CANCEL, 0, stream_id, Bytes::new())
    }

    /// Terminal error for a stream.
    pub fn error(stream_id: u32, code: u32, message: &str) -> Self {
        let mut payload = BytesMut::with_capacity(4 + message.len());
        payload.put_u32(code);
        payload.put_slice(message.as_bytes());
        Self::build(frame_type::ERROR, 0, stream_id, payload.freeze())
    }

    #[inline]
    pub fn frame_type(&self) -> u8 {
        self.header.frame_type
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    #[inline]
    pub fn is_next(&self) -> bool {
        self.header.is_next()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.header.is_complete()
    }

    /// Total size on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append header and payload to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.size());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
    }

    /// Encode to a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Split a request payload into route and encoded message.
    pub fn route_and_body(&self) -> Result<(&str, &[u8])> {
        let (&len, rest) = self
            .payload
            .split_first()
            .ok_or_else(|| DispatchError::Protocol("Request frame without route".to_string()))?;
        let len = len as usize;
        if rest.len() < len {
            return Err(DispatchError::Protocol(format!(
                "Route length {} exceeds payload",
                len
            )));
        }
        let route = std::str::from_utf8(&rest[..len])
            .map_err(|_| DispatchError::Protocol("Route is not valid UTF-8".to_string()))?;
        Ok((route, &rest[len..]))
    }

    /// Split an ERROR payload into code and message.
    pub fn error_parts(&self) -> Result<(u32, String)> {
        if self.payload.len() < 4 {
            return Err(DispatchError::Protocol(
                "ERROR frame shorter than its code".to_string(),
            ));
        }
        let code = u32::from_be_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]);
        let message = String::from_utf8_lossy(&self.payload[4..]).into_owned();
        Ok((code, message))
    }
}
