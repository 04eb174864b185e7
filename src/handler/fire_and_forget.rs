//! Fire-and-forget: the request is logged and nothing is sent back.

use super::{Handler, HandlerContext, HandlerKind};
use crate::dispatcher::{Outcome, Payload};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct FireAndForget;

impl Handler for FireAndForget {
    fn kind(&self) -> HandlerKind {
        HandlerKind::FireAndForget
    }

    fn invoke(&self, input: Payload, ctx: &HandlerContext) -> Result<Outcome> {
        let request = input.into_single(ctx.route())?;
        ctx.observer().on_request(HandlerKind::FireAndForget, &request);
        Ok(Outcome::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::scheduler::StreamScheduler;

    #[test]
    fn test_completes_without_payload() {
        let ctx = HandlerContext::new(
            "notify",
            HandlerKind::FireAndForget,
            StreamScheduler::default(),
        );
        let outcome = FireAndForget
            .invoke(Payload::Single(Message::new("Client", "Fire-And-Forget")), &ctx)
            .unwrap();

        assert!(outcome.is_empty());
        assert_eq!(ctx.scheduler().active_count(), 0);
    }
}
