// src/core/conversation/handler.rs

//! Handler capabilities for the two directions of a conversation.

use super::responder::ResponderHandle;
use crate::core::codec::Value;
use crate::core::errors::MessagingError;
use crate::core::protocol::SessionId;

/// Receives the single outcome of an outbound request.
///
/// Consumed on invocation, so a conversation can resolve its handler at most once.
pub trait ResponseHandler: Send + 'static {
    fn on_response(self: Box<Self>, outcome: Result<Value, MessagingError>);
}

impl<F> ResponseHandler for F
where
    F: FnOnce(Result<Value, MessagingError>) + Send + 'static,
{
    fn on_response(self: Box<Self>, outcome: Result<Value, MessagingError>) {
        (*self)(outcome)
    }
}

/// Receives the answers to a request sent to every session matching a filter.
///
/// Each reached session answers once, through `on_response` or
/// `on_response_error`. `on_close` is called exactly once, last.
pub trait FilteredResponseHandler: Send + 'static {
    /// The platform reports how many sessions the request reached.
    fn on_dispatched(&mut self, _count: usize) {}

    fn on_response(&mut self, session_id: SessionId, response: Value);

    fn on_response_error(&mut self, session_id: SessionId, error: MessagingError);

    /// `Ok` once every reached session has answered. Otherwise the reason
    /// the conversation ended early: the request failed outright, timed out,
    /// was cancelled or the session closed.
    fn on_close(self: Box<Self>, outcome: Result<(), MessagingError>);
}

/// A decoded request addressed to this session.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub path: String,
    /// The requesting session, when the platform discloses it.
    pub sender: Option<SessionId>,
    pub value: Value,
}

/// Handles requests arriving on a registered request path.
///
/// The handler answers through the `ResponderHandle`, either before returning
/// or later from another task. If it returns an error without answering, the
/// request is rejected with the error's message.
pub trait RequestHandler: Send + Sync {
    fn on_request(&self, request: IncomingRequest, responder: ResponderHandle)
    -> anyhow::Result<()>;

    /// The request stream was removed or the session closed.
    fn on_close(&self) {}
}
