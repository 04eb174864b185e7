//! The `Message` value exchanged on every route.
//!
//! A message is immutable once built. Handlers create the outbound ones;
//! the transport serializes them with one of the [`codec`](crate::codec)s.
//!
//! Wire shape (camelCase field names):
//!
//! ```text
//! { "origin": "Server", "interactionType": "Stream", "index": 3 }
//! ```
//!
//! `index` is omitted entirely when absent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Origin stamped on every message produced by this side of the connection.
pub const SERVER_ORIGIN: &str = "Server";

/// Interaction type strings, preserved exactly for wire compatibility.
pub mod interaction {
    /// Single response to a `command` request.
    pub const REQUEST_RESPONSE: &str = "Request-Response";
    /// Element of a server-push stream.
    pub const STREAM: &str = "Stream";
    /// Element of a bidirectional channel.
    pub const CHANNEL: &str = "Channel";
}

/// A message carried on a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    origin: String,
    interaction_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<u64>,
}

impl Message {
    /// Create a message without an index.
    pub fn new(origin: impl Into<String>, interaction_type: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            interaction_type: interaction_type.into(),
            index: None,
        }
    }

    /// Create an indexed message.
    pub fn indexed(
        origin: impl Into<String>,
        interaction_type: impl Into<String>,
        index: u64,
    ) -> Self {
        Self {
            origin: origin.into(),
            interaction_type: interaction_type.into(),
            index: Some(index),
        }
    }

    /// The response to a request-response invocation.
    pub fn request_response() -> Self {
        Self::new(SERVER_ORIGIN, interaction::REQUEST_RESPONSE)
    }

    /// The `index`-th element of a server stream.
    pub fn stream_element(index: u64) -> Self {
        Self::indexed(SERVER_ORIGIN, interaction::STREAM, index)
    }

    /// The channel output for the inbound element at `index`.
    pub fn channel_element(index: u64) -> Self {
        Self::indexed(SERVER_ORIGIN, interaction::CHANNEL, index)
    }

    #[inline]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[inline]
    pub fn interaction_type(&self) -> &str {
        &self.interaction_type
    }

    #[inline]
    pub fn index(&self) -> Option<u64> {
        self.index
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(origin={}, interactionType={}",
            self.origin, self.interaction_type
        )?;
        if let Some(index) = self.index {
            write!(f, ", index={}", index)?;
        }
        write!(f, ")")
    }
}
