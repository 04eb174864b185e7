//! Codec module - serialization of [`Message`] payloads.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! Codecs are marker structs with static methods. A connection picks one
//! through [`WireFormat`].
//!
//! # Example
//!
//! ```
//! use duplex_rpc::codec::WireFormat;
//! use duplex_rpc::Message;
//!
//! let bytes = WireFormat::Json.encode_message(&Message::stream_element(1)).unwrap();
//! let back = WireFormat::Json.decode_message(&bytes).unwrap();
//! assert_eq!(back.index(), Some(1));
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::error::Result;
use crate::message::Message;

/// Payload encoding used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    MsgPack,
    Json,
}

impl WireFormat {
    /// Encode a message with this format.
    pub fn encode_message(self, message: &Message) -> Result<Vec<u8>> {
        match self {
            WireFormat::MsgPack => MsgPackCodec::encode(message),
            WireFormat::Json => JsonCodec::encode(message),
        }
    }

    /// Decode a message with this format.
    pub fn decode_message(self, bytes: &[u8]) -> Result<Message> {
        match self {
            WireFormat::MsgPack => MsgPackCodec::decode(bytes),
            WireFormat::Json => JsonCodec::decode(bytes),
        }
    }
}
