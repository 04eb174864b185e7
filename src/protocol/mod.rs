//! Protocol module - framing for the duplex connection.
//!
//! - 10-byte header encoding/decoding
//! - Frame struct with typed constructors
//! - Frame buffer for accumulating partial reads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    error_codes, flags, frame_type, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAX_ROUTE_LEN,
};
