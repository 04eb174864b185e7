//! Invocation context for handlers.
//!
//! Built by the dispatcher for every invocation. Carries the route the
//! request came in on and the scheduler streaming handlers open their
//! Subscriptions with.

use std::sync::Arc;

use super::{EventObserver, HandlerKind};
use crate::scheduler::StreamScheduler;

/// Context passed to [`Handler::invoke`](super::Handler::invoke).
#[derive(Clone)]
pub struct HandlerContext {
    route: String,
    kind: HandlerKind,
    scheduler: StreamScheduler,
}

impl HandlerContext {
    pub fn new(route: &str, kind: HandlerKind, scheduler: StreamScheduler) -> Self {
        Self {
            route: route.to_string(),
            kind,
            scheduler,
        }
    }

    /// Route name the request was addressed to.
    #[inline]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Handler kind the route resolved to.
    #[inline]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    #[inline]
    pub fn scheduler(&self) -> &StreamScheduler {
        &self.scheduler
    }

    #[inline]
    pub fn observer(&self) -> &Arc<dyn EventObserver> {
        self.scheduler.observer()
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("route", &self.route)
            .field("kind", &self.kind)
            .finish()
    }
}
