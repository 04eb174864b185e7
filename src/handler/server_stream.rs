//! Server stream: one request, a periodic unbounded sequence back.
//!
//! Each invocation opens its own Subscription. Element `n` carries
//! `index == n` and is posted one period after element `n - 1` at the
//! earliest; the first element follows the request by one period.

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::{Handler, HandlerContext, HandlerKind};
use crate::dispatcher::{Outcome, Payload};
use crate::error::Result;
use crate::message::Message;
use crate::scheduler::{Emitter, SubscriptionState};

/// Periodic stream handler.
#[derive(Debug, Clone)]
pub struct ServerStream {
    period: Duration,
    limit: Option<u64>,
    capacity: usize,
}

impl ServerStream {
    /// `period` must be non-zero; `limit` bounds the stream when set.
    pub fn new(period: Duration, limit: Option<u64>, capacity: usize) -> Self {
        Self {
            period,
            limit,
            capacity,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }
}

impl Handler for ServerStream {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Stream
    }

    fn invoke(&self, input: Payload, ctx: &HandlerContext) -> Result<Outcome> {
        let request = input.into_single(ctx.route())?;
        ctx.observer().on_request(HandlerKind::Stream, &request);

        let period = self.period;
        let limit = self.limit;
        let stream = ctx
            .scheduler()
            .start(SubscriptionState::Emitting, self.capacity, move |emitter| {
                emit_ticks(emitter, period, limit)
            })?;
        Ok(Outcome::Sequence(stream))
    }
}

async fn emit_ticks(emitter: Emitter, period: Duration, limit: Option<u64>) {
    let mut ticker = tokio::time::interval_at(emitter.started_at() + period, period);
    // A late tick pushes every following one back instead of bursting.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if limit.is_some_and(|limit| emitter.sequence() >= limit) {
            emitter.complete();
            return;
        }
        // Reserve before waiting so consumer back-pressure never shortens
        // the spacing between two elements.
        let Some(permit) = emitter.reserve().await else {
            return;
        };
        ticker.tick().await;
        if !permit.send(Message::stream_element) {
            return;
        }
    }
}
