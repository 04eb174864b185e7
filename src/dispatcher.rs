//! Dispatcher - route lookup and handler invocation.
//!
//! The [`DispatcherBuilder`] configures routes, timing and the observer;
//! [`Dispatcher::dispatch`] resolves a route, invokes the matching handler
//! and returns its [`Outcome`]:
//!
//! | Route kind | Input | Outcome |
//! |---|---|---|
//! | request-response | `Payload::Single` | `Outcome::Single` |
//! | fire-and-forget | `Payload::Single` | `Outcome::Empty` |
//! | stream | `Payload::Single` | `Outcome::Sequence` |
//! | channel | `Payload::Sequence` | `Outcome::Sequence` |
//!
//! Sequence outcomes expose a [`SubscriptionHandle`] the transport uses to
//! cancel the Subscription.
//!
//! # Example
//!
//! ```
//! use duplex_rpc::{Dispatcher, Message, Payload};
//!
//! let dispatcher = Dispatcher::builder().build().unwrap();
//! let outcome = dispatcher
//!     .dispatch("command", Payload::Single(Message::new("Client", "Request-Response")))
//!     .unwrap();
//! assert_eq!(outcome.into_single().unwrap().interaction_type(), "Request-Response");
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::error::{DispatchError, Result};
use crate::handler::{
    Channel, EventObserver, FireAndForget, Handler, HandlerContext, HandlerKind, RequestResponse,
    RouteTable, ServerStream, TracingObserver,
};
use crate::message::Message;
use crate::scheduler::{StreamScheduler, SubscriptionHandle, SubscriptionStream};

/// Default period between server-stream elements.
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-element channel delay.
pub const DEFAULT_CHANNEL_DELAY: Duration = Duration::from_secs(1);

/// Default number of elements buffered per Subscription.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 32;

/// Inbound sequence of a channel invocation.
pub type MessageStream = BoxStream<'static, Result<Message>>;

/// Input envelope of an invocation.
pub enum Payload {
    Single(Message),
    Sequence(MessageStream),
}

impl Payload {
    /// Wrap any stream of messages as a sequence payload.
    pub fn sequence<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Message>> + Send + 'static,
    {
        Payload::Sequence(stream.boxed())
    }

    /// Take the single message, rejecting sequences.
    pub fn into_single(self, route: &str) -> Result<Message> {
        match self {
            Payload::Single(message) => Ok(message),
            Payload::Sequence(_) => Err(DispatchError::HandlerInvocation(format!(
                "route '{}' expects a single message, got a sequence",
                route
            ))),
        }
    }

    /// Take the inbound sequence, rejecting single messages.
    pub fn into_sequence(self, route: &str) -> Result<MessageStream> {
        match self {
            Payload::Sequence(stream) => Ok(stream),
            Payload::Single(_) => Err(DispatchError::HandlerInvocation(format!(
                "route '{}' requires an inbound message sequence",
                route
            ))),
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Single(message) => f.debug_tuple("Single").field(message).finish(),
            Payload::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

/// Output envelope of an invocation.
#[derive(Debug)]
pub enum Outcome {
    /// Completed with no payload (fire-and-forget).
    Empty,
    /// Exactly one message.
    Single(Message),
    /// A possibly infinite sequence owned by a Subscription.
    Sequence(SubscriptionStream),
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty)
    }

    pub fn into_single(self) -> Option<Message> {
        match self {
            Outcome::Single(message) => Some(message),
            _ => None,
        }
    }

    pub fn into_sequence(self) -> Option<SubscriptionStream> {
        match self {
            Outcome::Sequence(stream) => Some(stream),
            _ => None,
        }
    }

    /// Cancellation hook, present for sequence outcomes only.
    pub fn cancel_handle(&self) -> Option<SubscriptionHandle> {
        match self {
            Outcome::Sequence(stream) => Some(stream.handle()),
            _ => None,
        }
    }
}

/// Timing and buffering configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Period between server-stream elements.
    pub stream_interval: Duration,
    /// Delay applied to each channel element from its arrival.
    pub channel_delay: Duration,
    /// Number of elements after which a server stream completes.
    pub stream_limit: Option<u64>,
    /// Elements buffered between a producer and its consumer.
    pub subscription_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            stream_interval: DEFAULT_STREAM_INTERVAL,
            channel_delay: DEFAULT_CHANNEL_DELAY,
            stream_limit: None,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
        }
    }
}

/// Builder for configuring and creating a [`Dispatcher`].
pub struct DispatcherBuilder {
    routes: RouteTable,
    config: DispatchConfig,
    observer: Arc<dyn EventObserver>,
}

impl DispatcherBuilder {
    /// Start from the four default routes and default timing.
    pub fn new() -> Self {
        Self {
            routes: RouteTable::with_default_routes(),
            config: DispatchConfig::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Add or replace one route.
    pub fn route(mut self, name: &str, kind: HandlerKind) -> Self {
        self.routes.register(name, kind);
        self
    }

    /// Replace the whole route table.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the period between server-stream elements.
    ///
    /// Default: 1 second
    pub fn stream_interval(mut self, interval: Duration) -> Self {
        self.config.stream_interval = interval;
        self
    }

    /// Set the per-element channel delay.
    ///
    /// Default: 1 second
    pub fn channel_delay(mut self, delay: Duration) -> Self {
        self.config.channel_delay = delay;
        self
    }

    /// Complete server streams after `limit` elements.
    ///
    /// Default: unbounded
    pub fn stream_limit(mut self, limit: u64) -> Self {
        self.config.stream_limit = Some(limit);
        self
    }

    /// Set the per-Subscription buffer size.
    ///
    /// Default: 32
    pub fn subscription_capacity(mut self, capacity: usize) -> Self {
        self.config.subscription_capacity = capacity;
        self
    }

    /// Inject the observability collaborator.
    ///
    /// Default: [`TracingObserver`]
    pub fn observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration and build the dispatcher.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a zero stream interval or a zero buffer size.
    pub fn build(self) -> Result<Dispatcher> {
        if self.config.stream_interval.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "stream interval must be non-zero".to_string(),
            ));
        }
        if self.config.subscription_capacity == 0 {
            return Err(DispatchError::InvalidConfig(
                "subscription capacity must be non-zero".to_string(),
            ));
        }

        let capacity = self.config.subscription_capacity;
        Ok(Dispatcher {
            routes: self.routes,
            scheduler: StreamScheduler::new(self.observer),
            request_response: RequestResponse,
            fire_and_forget: FireAndForget,
            server_stream: ServerStream::new(
                self.config.stream_interval,
                self.config.stream_limit,
                capacity,
            ),
            channel: Channel::new(self.config.channel_delay, capacity),
            config: self.config,
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes inbound invocations to the interaction handlers.
pub struct Dispatcher {
    routes: RouteTable,
    scheduler: StreamScheduler,
    request_response: RequestResponse,
    fire_and_forget: FireAndForget,
    server_stream: ServerStream,
    channel: Channel,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher builder.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn scheduler(&self) -> &StreamScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn handler(&self, kind: HandlerKind) -> &dyn Handler {
        match kind {
            HandlerKind::RequestResponse => &self.request_response,
            HandlerKind::FireAndForget => &self.fire_and_forget,
            HandlerKind::Stream => &self.server_stream,
            HandlerKind::Channel => &self.channel,
        }
    }

    /// Dispatch one invocation.
    ///
    /// Streaming routes must be dispatched from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `RouteNotFound` if `route` is not registered; no handler runs.
    /// - `HandlerInvocation` if `input` does not fit the route's kind.
    pub fn dispatch(&self, route: &str, input: Payload) -> Result<Outcome> {
        let kind = self.routes.resolve(route)?;
        tracing::debug!("Dispatching {} to {} handler", route, kind);

        let ctx = HandlerContext::new(route, kind, self.scheduler.clone());
        self.handler(kind).invoke(input, &ctx)
    }
}
