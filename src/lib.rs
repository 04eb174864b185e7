//! # duplex-rpc
//!
//! Message-oriented RPC dispatcher for a single duplex connection.
//!
//! Four fixed routes map onto the four interaction patterns:
//!
//! | Route | Pattern | Result |
//! |---|---|---|
//! | `command` | request-response | one [`Message`] |
//! | `notify` | fire-and-forget | nothing |
//! | `stream` | server stream | one element per interval, until cancelled |
//! | `channel` | channel | each inbound element relayed after a delay, in order |
//!
//! ## Architecture
//!
//! - **Dispatcher**: resolves a route and invokes its handler
//! - **Scheduler**: owns every live Subscription and its cancellation
//! - **Connection**: RSocket-style framing over any `AsyncRead + AsyncWrite`
//!
//! ## Example
//!
//! ```
//! use duplex_rpc::{Dispatcher, Message, Outcome, Payload};
//!
//! let dispatcher = Dispatcher::builder().build().unwrap();
//! let outcome = dispatcher
//!     .dispatch("command", Payload::Single(Message::new("Client", "Request-Response")))
//!     .unwrap();
//!
//! let reply = outcome.into_single().unwrap();
//! assert_eq!(reply.origin(), "Server");
//! assert_eq!(reply.index(), None);
//! ```

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod protocol;
pub mod scheduler;
pub mod writer;

pub use connection::{Connection, ConnectionConfig};
pub use dispatcher::{DispatchConfig, Dispatcher, DispatcherBuilder, Outcome, Payload};
pub use error::{DispatchError, Result};
pub use message::Message;
pub use scheduler::{SubscriptionHandle, SubscriptionId, SubscriptionState, SubscriptionStream};
