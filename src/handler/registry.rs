//! Route table mapping route names to handler kinds.
//!
//! The table is filled once at startup and only read afterwards, so the
//! dispatcher shares it without locking.
//!
//! # Example
//!
//! ```
//! use duplex_rpc::handler::{HandlerKind, RouteTable};
//!
//! let routes = RouteTable::with_default_routes();
//! assert_eq!(routes.resolve("stream").unwrap(), HandlerKind::Stream);
//! assert!(routes.resolve("bogus").is_err());
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::error::{DispatchError, Result};

/// Route name for request-response.
pub const COMMAND_ROUTE: &str = "command";
/// Route name for fire-and-forget.
pub const NOTIFY_ROUTE: &str = "notify";
/// Route name for server-push streams.
pub const STREAM_ROUTE: &str = "stream";
/// Route name for bidirectional channels.
pub const CHANNEL_ROUTE: &str = "channel";

/// The interaction pattern a route is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    RequestResponse,
    FireAndForget,
    Stream,
    Channel,
}

impl HandlerKind {
    /// Whether invocations of this kind produce a long-lived Subscription.
    #[inline]
    pub fn is_streaming(self) -> bool {
        matches!(self, HandlerKind::Stream | HandlerKind::Channel)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::RequestResponse => "request-response",
            HandlerKind::FireAndForget => "fire-and-forget",
            HandlerKind::Stream => "stream",
            HandlerKind::Channel => "channel",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub kind: HandlerKind,
}

/// Registry mapping route names to handler kinds.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, HandlerKind>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding the four wire-level routes.
    pub fn with_default_routes() -> Self {
        let mut table = Self::new();
        table.register(COMMAND_ROUTE, HandlerKind::RequestResponse);
        table.register(NOTIFY_ROUTE, HandlerKind::FireAndForget);
        table.register(STREAM_ROUTE, HandlerKind::Stream);
        table.register(CHANNEL_ROUTE, HandlerKind::Channel);
        table
    }

    /// Register a route, replacing any previous mapping for `name`.
    pub fn register(&mut self, name: &str, kind: HandlerKind) {
        if let Some(previous) = self.routes.insert(name.to_string(), kind) {
            tracing::debug!("Route {} remapped from {} to {}", name, previous, kind);
        }
    }

    /// Look up the handler kind for a route.
    ///
    /// # Errors
    ///
    /// Returns `RouteNotFound` if `name` is not registered.
    pub fn resolve(&self, name: &str) -> Result<HandlerKind> {
        self.routes
            .get(name)
            .copied()
            .ok_or_else(|| DispatchError::RouteNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// All registered routes, sorted by name.
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .routes
            .iter()
            .map(|(name, &kind)| Route {
                name: name.clone(),
                kind,
            })
            .collect();
        routes.sort_by(|a, b| a.name.cmp(&b.name));
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let table = RouteTable::with_default_routes();

        assert_eq!(table.len(), 4);
        assert_eq!(
            table.resolve("command").unwrap(),
            HandlerKind::RequestResponse
        );
        assert_eq!(table.resolve("notify").unwrap(), HandlerKind::FireAndForget);
        assert_eq!(table.resolve("stream").unwrap(), HandlerKind::Stream);
        assert_eq!(table.resolve("channel").unwrap(), HandlerKind::Channel);
    }

    #[test]
    fn test_unknown_route() {
        let table = RouteTable::with_default_routes();

        let err = table.resolve("bogus").unwrap_err();
        assert!(matches!(err, DispatchError::RouteNotFound(ref name) if name == "bogus"));
    }

    #[test]
    fn test_route_names_are_case_sensitive() {
        let table = RouteTable::with_default_routes();
        assert!(table.resolve("Command").is_err());
    }

    #[test]
    fn test_register_replaces() {
        let mut table = RouteTable::new();
        assert!(table.is_empty());

        table.register("ticks", HandlerKind::Stream);
        table.register("ticks", HandlerKind::Channel);

        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve("ticks").unwrap(), HandlerKind::Channel);
    }

    #[test]
    fn test_routes_sorted() {
        let table = RouteTable::with_default_routes();
        let names: Vec<_> = table.routes().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["channel", "command", "notify", "stream"]);
    }

    #[test]
    fn test_streaming_kinds() {
        assert!(HandlerKind::Stream.is_streaming());
        assert!(HandlerKind::Channel.is_streaming());
        assert!(!HandlerKind::RequestResponse.is_streaming());
        assert!(!HandlerKind::FireAndForget.is_streaming());
    }
}
