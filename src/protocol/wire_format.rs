//! Wire format encoding and decoding.
//!
//! Implements the 10-byte frame header:
//! ```text
//! ┌────────────┬───────┬───────────┬──────────┐
//! │ Frame type │ Flags │ Stream ID │ Length   │
//! │ 1 byte     │ 1 byte│ 4 bytes   │ 4 bytes  │
//! │            │       │ uint32 BE │ uint32 BE│
//! └────────────┴───────┴───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Frame type numbering follows
//! RSocket so captures read naturally next to RSocket traffic.

use crate::error::{DispatchError, Result};

/// Header size in bytes (fixed, exactly 10).
pub const HEADER_SIZE: usize = 10;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Longest route name a request frame can carry.
pub const MAX_ROUTE_LEN: usize = u8::MAX as usize;

/// Frame type constants.
pub mod frame_type {
    pub const REQUEST_RESPONSE: u8 = 0x04;
    pub const REQUEST_FNF: u8 = 0x05;
    pub const REQUEST_STREAM: u8 = 0x06;
    pub const REQUEST_CHANNEL: u8 = 0x07;
    pub const CANCEL: u8 = 0x09;
    pub const PAYLOAD: u8 = 0x0A;
    pub const ERROR: u8 = 0x0B;

    /// Whether `t` opens a new stream.
    #[inline]
    pub fn is_request(t: u8) -> bool {
        (REQUEST_RESPONSE..=REQUEST_CHANNEL).contains(&t)
    }

    #[inline]
    pub fn is_known(t: u8) -> bool {
        is_request(t) || matches!(t, CANCEL | PAYLOAD | ERROR)
    }

    pub fn name(t: u8) -> &'static str {
        match t {
            REQUEST_RESPONSE => "REQUEST_RESPONSE",
            REQUEST_FNF => "REQUEST_FNF",
            REQUEST_STREAM => "REQUEST_STREAM",
            REQUEST_CHANNEL => "REQUEST_CHANNEL",
            CANCEL => "CANCEL",
            PAYLOAD => "PAYLOAD",
            ERROR => "ERROR",
            _ => "UNKNOWN",
        }
    }
}

/// Flag constants for PAYLOAD frames.
pub mod flags {
    /// The frame carries an element.
    pub const NEXT: u8 = 0b0000_0001;
    /// The sender's side of the stream is finished.
    pub const COMPLETE: u8 = 0b0000_0010;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Error codes carried in ERROR frames.
pub mod error_codes {
    pub const APPLICATION_ERROR: u32 = 0x0000_0201;
    pub const REJECTED: u32 = 0x0000_0202;
    pub const CANCELED: u32 = 0x0000_0203;
    pub const INVALID: u32 = 0x0000_0204;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame type (see `frame_type` module).
    pub frame_type: u8,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Stream identifier chosen by the requester (0 is reserved).
    pub stream_id: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    pub fn new(frame_type: u8, flags: u8, stream_id: u32, payload_length: u32) -> Self {
        Self {
            frame_type,
            flags,
            stream_id,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use duplex_rpc::protocol::{frame_type, flags, Header};
    ///
    /// let header = Header::new(frame_type::PAYLOAD, flags::NEXT, 7, 42);
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [0x0A, 0x01, 0, 0, 0, 7, 0, 0, 0, 42]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.frame_type;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[6..10].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes. Returns `None` if `buf` is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            frame_type: buf[0],
            flags: buf[1],
            stream_id: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            payload_length: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Frame type is known
    /// - Stream ID is not 0
    /// - Reserved flag bits are 0
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if !frame_type::is_known(self.frame_type) {
            return Err(DispatchError::Protocol(format!(
                "Unknown frame type 0x{:02X}",
                self.frame_type
            )));
        }

        if self.stream_id == 0 {
            return Err(DispatchError::Protocol(
                "Stream ID 0 is reserved".to_string(),
            ));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(DispatchError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        if self.payload_length > max_payload_size {
            return Err(DispatchError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        frame_type::is_request(self.frame_type)
    }

    #[inline]
    pub fn is_next(&self) -> bool {
        flags::has_flag(self.flags, flags::NEXT)
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        flags::has_flag(self.flags, flags::COMPLETE)
    }
}
