//! Handler module - routes and the four interaction handlers.
//!
//! Provides:
//! - [`RouteTable`] - maps route names to [`HandlerKind`]s
//! - [`Handler`] - the single capability every interaction implements
//! - [`RequestResponse`], [`FireAndForget`], [`ServerStream`], [`Channel`]
//! - [`HandlerContext`] - per-invocation context
//! - [`EventObserver`] - injected observability hooks
//!
//! # Example
//!
//! ```
//! use duplex_rpc::handler::{Handler, HandlerContext, HandlerKind, RequestResponse};
//! use duplex_rpc::scheduler::StreamScheduler;
//! use duplex_rpc::{Message, Payload};
//!
//! let ctx = HandlerContext::new(
//!     "command",
//!     HandlerKind::RequestResponse,
//!     StreamScheduler::default(),
//! );
//! let outcome = RequestResponse
//!     .invoke(Payload::Single(Message::new("Client", "Request-Response")), &ctx)
//!     .unwrap();
//! assert_eq!(outcome.into_single(), Some(Message::request_response()));
//! ```

mod channel;
mod context;
mod fire_and_forget;
mod observer;
mod registry;
mod request_response;
mod server_stream;

pub use channel::Channel;
pub use context::HandlerContext;
pub use fire_and_forget::FireAndForget;
pub use observer::{EventObserver, NoopObserver, TracingObserver};
pub use registry::{
    HandlerKind, Route, RouteTable, CHANNEL_ROUTE, COMMAND_ROUTE, NOTIFY_ROUTE, STREAM_ROUTE,
};
pub use request_response::RequestResponse;
pub use server_stream::ServerStream;

use crate::dispatcher::{Outcome, Payload};
use crate::error::Result;

/// One interaction pattern.
///
/// `invoke` returns without waiting: streaming handlers hand their work to
/// the scheduler and return the consumer side as `Outcome::Sequence`.
pub trait Handler: Send + Sync + 'static {
    /// The kind of routes this handler serves.
    fn kind(&self) -> HandlerKind;

    /// Run one invocation.
    ///
    /// # Errors
    ///
    /// `HandlerInvocation` when `input` has the wrong shape for this kind.
    fn invoke(&self, input: Payload, ctx: &HandlerContext) -> Result<Outcome>;
}
