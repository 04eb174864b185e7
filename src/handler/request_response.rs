//! Request-response: one request, one immediate reply.

use super::{Handler, HandlerContext, HandlerKind};
use crate::dispatcher::{Outcome, Payload};
use crate::error::Result;
use crate::message::Message;

/// Answers every request with `{origin: "Server", interactionType: "Request-Response"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestResponse;

impl Handler for RequestResponse {
    fn kind(&self) -> HandlerKind {
        HandlerKind::RequestResponse
    }

    fn invoke(&self, input: Payload, ctx: &HandlerContext) -> Result<Outcome> {
        let request = input.into_single(ctx.route())?;
        ctx.observer().on_request(HandlerKind::RequestResponse, &request);
        Ok(Outcome::Single(Message::request_response()))
    }
}
