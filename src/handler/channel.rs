//! Channel: an inbound sequence relayed back element by element.
//!
//! Every inbound element gets its 0-based arrival index and is answered
//! with `{origin: "Server", interactionType: "Channel", index}` one delay
//! after it arrived. A single relay task owns a FIFO of
//! `(index, deadline)` pairs and only ever emits the head, so outputs
//! leave in arrival order whatever the timer granularity.
//!
//! The output completes once the input has completed and the FIFO has
//! drained. An inbound error fails the output immediately; elements still
//! waiting for their delay are dropped.

use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use super::{Handler, HandlerContext, HandlerKind};
use crate::dispatcher::{MessageStream, Outcome, Payload};
use crate::error::Result;
use crate::message::Message;
use crate::scheduler::{Emitter, SubscriptionState};

/// Delayed relay handler.
#[derive(Debug, Clone)]
pub struct Channel {
    delay: Duration,
    capacity: usize,
}

impl Channel {
    pub fn new(delay: Duration, capacity: usize) -> Self {
        Self { delay, capacity }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Handler for Channel {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Channel
    }

    fn invoke(&self, input: Payload, ctx: &HandlerContext) -> Result<Outcome> {
        let inbound = input.into_sequence(ctx.route())?;

        let delay = self.delay;
        let stream = ctx
            .scheduler()
            .start(SubscriptionState::Relaying, self.capacity, move |emitter| {
                relay(emitter, inbound, delay)
            })?;
        ctx.observer().on_channel_open(stream.id(), ctx.route());
        Ok(Outcome::Sequence(stream))
    }
}

async fn relay(emitter: Emitter, mut inbound: MessageStream, delay: Duration) {
    let mut pending: VecDeque<(u64, Instant)> = VecDeque::new();
    let mut arrivals: u64 = 0;
    let mut inbound_open = true;

    loop {
        if !inbound_open && pending.is_empty() {
            emitter.complete();
            return;
        }

        let due = pending.front().map(|&(_, deadline)| deadline);

        tokio::select! {
            biased;

            _ = tokio::time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                let Some(permit) = emitter.reserve().await else {
                    return;
                };
                let Some((index, _)) = pending.pop_front() else {
                    continue;
                };
                if !permit.send(|_| Message::channel_element(index)) {
                    return;
                }
            }

            item = inbound.next(), if inbound_open => match item {
                Some(Ok(message)) => {
                    emitter.observe_inbound(arrivals, &message);
                    pending.push_back((arrivals, Instant::now() + delay));
                    arrivals += 1;
                }
                Some(Err(err)) => {
                    tracing::debug!(
                        "Channel {} inbound failed after {} elements",
                        emitter.id(),
                        arrivals
                    );
                    emitter.fail(err.into_upstream()).await;
                    return;
                }
                None => inbound_open = false,
            },
        }
    }
}
