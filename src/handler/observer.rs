//! Observability hooks for handler activity.
//!
//! The dispatcher never logs elements itself; it reports them to an
//! injected [`EventObserver`]. [`TracingObserver`] is the default and
//! forwards everything to `tracing`.

use crate::handler::HandlerKind;
use crate::message::Message;
use crate::scheduler::{SubscriptionId, SubscriptionState};

/// Receives handler and Subscription events.
///
/// Every method defaults to a no-op. Implementations must not call back
/// into the scheduler: `on_event` runs while the Subscription's state lock
/// is held.
pub trait EventObserver: Send + Sync + 'static {
    /// A request arrived on a route of the given kind.
    fn on_request(&self, _kind: HandlerKind, _request: &Message) {}

    /// A channel request on `route` opened `subscription`.
    fn on_channel_open(&self, _subscription: SubscriptionId, _route: &str) {}

    /// A channel received its `index`-th inbound element.
    fn on_inbound(&self, _subscription: SubscriptionId, _index: u64, _message: &Message) {}

    /// A Subscription emitted an element.
    fn on_event(&self, _subscription: SubscriptionId, _message: &Message) {}

    /// A Subscription reached a terminal state.
    fn on_terminal(&self, _subscription: SubscriptionId, _state: SubscriptionState) {}
}

/// Observer that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_request(&self, kind: HandlerKind, request: &Message) {
        tracing::info!("Received {} request: {}", kind, request);
    }

    fn on_channel_open(&self, subscription: SubscriptionId, route: &str) {
        tracing::info!("Received channel request on {}: {}", route, subscription);
    }

    fn on_inbound(&self, subscription: SubscriptionId, index: u64, message: &Message) {
        tracing::info!("{} onNext({}, {})", subscription, index, message);
    }

    fn on_event(&self, subscription: SubscriptionId, message: &Message) {
        tracing::info!("{} onNext({})", subscription, message);
    }

    fn on_terminal(&self, subscription: SubscriptionId, state: SubscriptionState) {
        tracing::info!("{} terminated: {:?}", subscription, state);
    }
}

/// Observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl EventObserver for NoopObserver {}
