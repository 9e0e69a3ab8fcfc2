// src/core/conversation/mod.rs

//! Correlates outbound requests with their responses and answers inbound ones.
//!
//! # Exactly-once resolution
//!
//! A pending conversation can be ended by a response frame, an error frame,
//! its deadline, an explicit cancel or the session closing, and several of
//! these may race on different threads. Every path first removes the
//! conversation from the pending table under its lock; only the caller that
//! removed it invokes the handler. Losers find no entry and do nothing, so a
//! late response after a timeout is dropped and reported as an anomaly.
//!
//! A filtered request is pending in the same table until every session it
//! reached has answered; its handler sees each answer and then one close.

use crate::core::codec::{DataType, Value, ValueCodec, encode};
use crate::core::errors::{DecodeError, MessagingError};
use crate::core::isolation::{HandlerKind, invoke_isolated};
use crate::core::metrics::{
    self, ANOMALY_UNKNOWN_HANDLE, ANOMALY_UNKNOWN_TOKEN, ANOMALY_UNROUTABLE_REQUEST,
    CONVERSATIONS_RESOLVED_TOTAL, PENDING_CONVERSATIONS,
};
use crate::core::protocol::{
    ConversationTarget, CorrelationToken, ErrorReason, OutboundFrame, ServiceRequest, SessionId,
    Transport,
};
use bytes::Bytes;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

mod filtered;
pub mod handler;
pub mod responder;
pub mod timer;

pub use handler::{FilteredResponseHandler, IncomingRequest, RequestHandler, ResponseHandler};
pub use responder::ResponderHandle;
pub use timer::{ManualTimer, TimerHandle, TimerService, TimerTask, TokioTimer};

use filtered::FilteredConversation;
use responder::{RequestStream, RequestStreams};

/// Error code sent when no request stream is registered for a path.
pub const ERROR_CODE_NO_HANDLER: u32 = 1;
/// Error code sent when an inbound request payload fails to decode.
pub const ERROR_CODE_DECODE: u32 = 2;
/// Error code sent when a request handler rejects a request.
pub const ERROR_CODE_REJECTED: u32 = 3;

/// Tunables for a correlator.
#[derive(Debug, Clone, Copy)]
pub struct CorrelatorSettings {
    /// Deadline applied to requests that do not set their own.
    pub default_timeout: Duration,
    /// Maximum number of pending conversations. `0` disables the limit.
    pub max_pending: usize,
    pub catch_handler_panics: bool,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_pending: 10_000,
            catch_handler_panics: true,
        }
    }
}

/// A request ready to be sent.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub target: ConversationTarget,
    pub payload: Bytes,
    /// The type of the encoded request value, absent for payload-less service calls.
    pub request_type: Option<DataType>,
    pub response_type: DataType,
    /// Overrides the default deadline.
    pub timeout: Option<Duration>,
}

impl OutgoingRequest {
    /// Encodes `request` for `target`. Fails if the value is too large to encode.
    pub fn new(
        target: ConversationTarget,
        request: &Value,
        response_type: DataType,
    ) -> Result<Self, MessagingError> {
        Ok(Self {
            target,
            payload: encode(request)?,
            request_type: Some(request.data_type()),
            response_type,
            timeout: None,
        })
    }

    /// A platform service call. Service responses are JSON values.
    pub fn service(request: ServiceRequest, value: Option<&Value>) -> Result<Self, MessagingError> {
        let payload = match value {
            Some(value) => encode(value)?,
            None => Bytes::new(),
        };
        Ok(Self {
            target: ConversationTarget::Service(request),
            payload,
            request_type: value.map(Value::data_type),
            response_type: DataType::Json,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One outstanding outbound request.
struct Conversation {
    target: ConversationTarget,
    request_type: Option<DataType>,
    response_type: DataType,
    handler: Box<dyn ResponseHandler>,
    timer: Option<TimerHandle>,
    sent_at: Instant,
}

/// How a conversation ended.
enum Resolution {
    Response(Bytes),
    Error(ErrorReason),
    Timeout,
    Cancelled,
    SessionClosed,
}

impl Resolution {
    fn label(&self) -> &'static str {
        match self {
            Resolution::Response(_) => "response",
            Resolution::Error(_) => "error",
            Resolution::Timeout => "timeout",
            Resolution::Cancelled => "cancelled",
            Resolution::SessionClosed => "closed",
        }
    }

    /// The response payload, or the error handlers see for any other ending.
    fn into_outcome(self) -> Result<Bytes, MessagingError> {
        match self {
            Resolution::Response(payload) => Ok(payload),
            Resolution::Error(reason) => Err(MessagingError::Rejected(reason.to_string())),
            Resolution::Timeout => Err(MessagingError::Timeout),
            Resolution::Cancelled => Err(MessagingError::Cancelled),
            Resolution::SessionClosed => Err(MessagingError::SessionClosed),
        }
    }
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    conversations: HashMap<CorrelationToken, Conversation>,
    filtered: HashMap<CorrelationToken, FilteredConversation>,
}

impl PendingTable {
    fn len(&self) -> usize {
        self.conversations.len() + self.filtered.len()
    }
}

/// `ConversationCorrelator` owns every in-flight outbound request and every
/// unanswered inbound request of one session.
pub struct ConversationCorrelator {
    self_ref: Weak<ConversationCorrelator>,
    next_token: AtomicU64,
    pending: Mutex<PendingTable>,
    /// Conversation ids of inbound requests not yet answered.
    inbound: DashSet<u64>,
    request_streams: RequestStreams,
    transport: Arc<dyn Transport>,
    timer: Arc<dyn TimerService>,
    settings: CorrelatorSettings,
}

impl ConversationCorrelator {
    pub fn new(
        transport: Arc<dyn Transport>,
        timer: Arc<dyn TimerService>,
        settings: CorrelatorSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            next_token: AtomicU64::new(1),
            pending: Mutex::new(PendingTable::default()),
            inbound: DashSet::new(),
            request_streams: RequestStreams::default(),
            transport,
            timer,
            settings,
        })
    }

    /// Sends a request and arms its deadline. The handler is invoked exactly
    /// once, later, with the outcome.
    ///
    /// Returns an error without invoking the handler if the request could not
    /// be sent at all.
    pub fn send<H>(
        &self,
        request: OutgoingRequest,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: ResponseHandler,
    {
        if request.target.is_filter() {
            return Err(MessagingError::Internal(
                "a filtered request needs a filtered response handler".to_string(),
            ));
        }
        let conversation = Conversation {
            target: request.target.clone(),
            request_type: request.request_type,
            response_type: request.response_type,
            handler: Box::new(handler),
            timer: None,
            sent_at: Instant::now(),
        };
        self.admit(request, move |table, token| {
            table.conversations.insert(token, conversation);
        })
    }

    /// Sends a request to every session matching a filter. The handler sees
    /// each answer, then `on_close` once the platform-reported number of
    /// sessions have answered or the conversation ends early.
    pub fn send_filtered<H>(
        &self,
        request: OutgoingRequest,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: FilteredResponseHandler,
    {
        if !request.target.is_filter() {
            return Err(MessagingError::Internal(format!(
                "{} is not a session filter",
                request.target
            )));
        }
        let conversation =
            FilteredConversation::new(request.target.clone(), request.response_type, handler);
        self.admit(request, move |table, token| {
            table.filtered.insert(token, conversation);
        })
    }

    /// Registers a conversation under a fresh token, sends its request frame
    /// and arms its deadline.
    fn admit<F>(&self, request: OutgoingRequest, register: F) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(&mut PendingTable, CorrelationToken),
    {
        let token = CorrelationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let timeout = request.timeout.unwrap_or(self.settings.default_timeout);

        {
            let mut table = self.pending.lock();
            if table.closed {
                return Err(MessagingError::SessionClosed);
            }
            let max = self.settings.max_pending;
            if max > 0 && table.len() >= max {
                warn!(
                    pending = table.len(),
                    max_pending = max,
                    "Too many pending conversations; refusing new request"
                );
                return Err(MessagingError::TooManyConversations(max));
            }
            register(&mut table, token);
        }
        PENDING_CONVERSATIONS.inc();

        let frame = OutboundFrame::Request {
            token,
            target: request.target,
            payload: request.payload,
        };
        if let Err(e) = self.transport.send_frame(frame) {
            // If the entry is already gone, close() resolved it and the
            // handler has seen `SessionClosed`.
            if self.discard(token) {
                warn!(token = %token, "Failed to send request: {}", e);
                return Err(e);
            }
            return Ok(token);
        }

        let weak = self.self_ref.clone();
        let timer = self.timer.schedule(
            timeout,
            Box::new(move || {
                if let Some(correlator) = weak.upgrade() {
                    correlator.on_timeout(token);
                }
            }),
        );

        let mut table = self.pending.lock();
        let timeout_ms = timeout.as_millis() as u64;
        if let Some(conversation) = table.conversations.get_mut(&token) {
            debug!(
                token = %token,
                target = %conversation.target,
                request_type = ?conversation.request_type,
                timeout_ms,
                "Sent request"
            );
            conversation.timer = Some(timer);
        } else if let Some(conversation) = table.filtered.get_mut(&token) {
            debug!(
                token = %token,
                target = %conversation.target,
                timeout_ms,
                "Sent filtered request"
            );
            conversation.timer = Some(timer);
        } else {
            // Resolved before its timer was attached.
            drop(table);
            timer.cancel();
        }
        Ok(token)
    }

    /// Resolves a conversation from an inbound response or error frame.
    ///
    /// Returns false, after logging and counting the anomaly, if no
    /// conversation is pending for `token`.
    /// An error frame for a filtered request fails the whole conversation.
    pub fn resolve(&self, token: CorrelationToken, outcome: Result<Bytes, ErrorReason>) -> bool {
        if let Some(conversation) = self.take(token) {
            let resolution = match outcome {
                Ok(payload) => Resolution::Response(payload),
                Err(reason) => Resolution::Error(reason),
            };
            self.finish(token, conversation, resolution);
            return true;
        }
        if let Err(reason) = &outcome
            && let Some(conversation) = self.take_filtered(token)
        {
            self.end_filtered(token, conversation, Resolution::Error(reason.clone()));
            return true;
        }
        metrics::record_anomaly(ANOMALY_UNKNOWN_TOKEN);
        warn!(
            kind = if outcome.is_ok() { "response" } else { "error" },
            "Dropping frame: {}",
            MessagingError::UnknownToken(token.0)
        );
        false
    }

    /// Records how many sessions a filtered request reached. Completes the
    /// conversation if that many answers are already in.
    pub fn on_filter_dispatched(&self, token: CorrelationToken, count: usize) -> bool {
        let (slot, complete) = {
            let mut table = self.pending.lock();
            let Some(conversation) = table.filtered.get_mut(&token) else {
                self.unknown_filter_frame(token, "filter_dispatched");
                return false;
            };
            conversation.expected = Some(count);
            let slot = conversation.slot.clone();
            let complete = conversation.is_complete();
            (slot, complete.then(|| table.filtered.remove(&token)).flatten())
        };
        debug!(token = %token, sessions = count, "Filtered request dispatched");

        slot.deliver(self.settings.catch_handler_panics, |handler| {
            handler.on_dispatched(count)
        });
        if let Some(conversation) = complete {
            PENDING_CONVERSATIONS.dec();
            self.complete_filtered(token, conversation);
        }
        true
    }

    /// Delivers one session's answer to a filtered request.
    pub fn on_filter_response(
        &self,
        token: CorrelationToken,
        session_id: SessionId,
        outcome: Result<Bytes, ErrorReason>,
    ) -> bool {
        let (slot, response_type, complete) = {
            let mut table = self.pending.lock();
            let Some(conversation) = table.filtered.get_mut(&token) else {
                self.unknown_filter_frame(token, "filter_response");
                return false;
            };
            conversation.answered += 1;
            let slot = conversation.slot.clone();
            let response_type = conversation.response_type;
            let complete = conversation.is_complete();
            (
                slot,
                response_type,
                complete.then(|| table.filtered.remove(&token)).flatten(),
            )
        };

        let answer = match outcome {
            Ok(payload) => ValueCodec
                .decode(response_type, &payload)
                .map_err(MessagingError::from),
            Err(reason) => Err(MessagingError::Rejected(reason.to_string())),
        };
        slot.deliver(self.settings.catch_handler_panics, move |handler| match answer {
            Ok(value) => handler.on_response(session_id, value),
            Err(e) => handler.on_response_error(session_id, e),
        });
        if let Some(conversation) = complete {
            PENDING_CONVERSATIONS.dec();
            self.complete_filtered(token, conversation);
        }
        true
    }

    /// Fails a conversation with `Timeout` if it is still pending.
    pub fn on_timeout(&self, token: CorrelationToken) -> bool {
        if let Some(conversation) = self.take(token) {
            self.finish(token, conversation, Resolution::Timeout);
            return true;
        }
        if let Some(conversation) = self.take_filtered(token) {
            self.end_filtered(token, conversation, Resolution::Timeout);
            return true;
        }
        debug!(token = %token, "Deadline elapsed after the conversation resolved");
        false
    }

    /// Fails a conversation with `Cancelled`. Returns false if it had already resolved.
    pub fn cancel(&self, token: CorrelationToken) -> bool {
        if let Some(conversation) = self.take(token) {
            self.finish(token, conversation, Resolution::Cancelled);
            return true;
        }
        if let Some(conversation) = self.take_filtered(token) {
            self.end_filtered(token, conversation, Resolution::Cancelled);
            return true;
        }
        false
    }

    /// Fails every pending conversation with `SessionClosed`, refuses new
    /// requests and drops all request streams. Returns the number of
    /// conversations resolved.
    pub fn close_all(&self) -> usize {
        let (mut drained, mut filtered): (Vec<_>, Vec<_>) = {
            let mut table = self.pending.lock();
            table.closed = true;
            (
                table.conversations.drain().collect(),
                table.filtered.drain().collect(),
            )
        };
        drained.sort_by_key(|(token, _)| *token);
        filtered.sort_by_key(|(token, _)| *token);
        let resolved = drained.len() + filtered.len();
        PENDING_CONVERSATIONS.sub(resolved as i64);

        for (token, conversation) in drained {
            self.finish(token, conversation, Resolution::SessionClosed);
        }
        for (token, conversation) in filtered {
            self.end_filtered(token, conversation, Resolution::SessionClosed);
        }

        self.inbound.clear();
        for stream in self.request_streams.drain() {
            invoke_isolated(HandlerKind::Request, self.settings.catch_handler_panics, || {
                stream.handler.on_close();
                Ok(())
            });
        }
        resolved
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Tokens of the conversations still awaiting resolution, in issue order.
    pub fn pending_tokens(&self) -> Vec<CorrelationToken> {
        let table = self.pending.lock();
        let mut tokens: Vec<CorrelationToken> = table
            .conversations
            .keys()
            .chain(table.filtered.keys())
            .copied()
            .collect();
        drop(table);
        tokens.sort_unstable();
        tokens
    }

    /// Registers a handler for requests arriving on `path`, replacing any
    /// previous one.
    pub fn set_request_stream(
        &self,
        path: &str,
        request_type: DataType,
        response_type: DataType,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), MessagingError> {
        if self.is_closed() {
            return Err(MessagingError::SessionClosed);
        }
        let replaced = self.request_streams.insert(
            path.to_string(),
            RequestStream {
                request_type,
                response_type,
                handler,
            },
        );
        debug!(path, %request_type, %response_type, "Registered request stream");
        if let Some(previous) = replaced {
            invoke_isolated(HandlerKind::Request, self.settings.catch_handler_panics, || {
                previous.handler.on_close();
                Ok(())
            });
        }
        Ok(())
    }

    pub fn remove_request_stream(&self, path: &str) -> bool {
        match self.request_streams.remove(path) {
            Some(stream) => {
                invoke_isolated(HandlerKind::Request, self.settings.catch_handler_panics, || {
                    stream.handler.on_close();
                    Ok(())
                });
                true
            }
            None => false,
        }
    }

    pub fn request_stream_paths(&self) -> Vec<String> {
        self.request_streams.paths()
    }

    /// Routes an inbound request to the stream registered for its path.
    pub fn on_request(
        &self,
        conversation_id: u64,
        path: &str,
        sender: Option<SessionId>,
        payload: &[u8],
    ) {
        let Some(stream) = self.request_streams.get(path) else {
            metrics::record_anomaly(ANOMALY_UNROUTABLE_REQUEST);
            warn!(conversation_id, path, "No request stream for inbound request");
            self.send_error_response(
                conversation_id,
                ErrorReason::new(
                    ERROR_CODE_NO_HANDLER,
                    MessagingError::NoRequestHandler(path.to_string()).to_string(),
                ),
            );
            return;
        };

        let value = match ValueCodec.decode(stream.request_type, payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(conversation_id, path, "Failed to decode inbound request: {}", e);
                self.send_error_response(
                    conversation_id,
                    ErrorReason::new(ERROR_CODE_DECODE, e.to_string()),
                );
                return;
            }
        };

        self.inbound.insert(conversation_id);
        let responder = ResponderHandle::new(
            conversation_id,
            path.to_string(),
            stream.response_type,
            self.self_ref.clone(),
        );
        let request = IncomingRequest {
            path: path.to_string(),
            sender,
            value,
        };

        let handled = {
            let responder = responder.clone();
            invoke_isolated(HandlerKind::Request, self.settings.catch_handler_panics, || {
                stream.handler.on_request(request, responder)
            })
        };
        if !handled && !responder.has_responded() {
            if let Err(e) = self.reject_incoming_request(&responder, "request handler failed") {
                warn!(conversation_id, "Failed to reject request: {}", e);
            }
        }
    }

    /// Sends the response to an inbound request. A handle can be answered once.
    pub fn respond_to_incoming_request(
        &self,
        handle: &ResponderHandle,
        value: &Value,
    ) -> Result<(), MessagingError> {
        if value.data_type() != handle.response_type() {
            return Err(MessagingError::Decode(DecodeError::type_mismatch(format!(
                "response for '{}' must be {}, got {}",
                handle.path(),
                handle.response_type(),
                value.data_type()
            ))));
        }
        self.complete_inbound(
            handle,
            OutboundFrame::Response {
                conversation_id: handle.conversation_id(),
                payload: encode(value)?,
            },
        )
    }

    /// Answers an inbound request with an error. Uses the handle's single response.
    pub fn reject_incoming_request(
        &self,
        handle: &ResponderHandle,
        message: &str,
    ) -> Result<(), MessagingError> {
        self.complete_inbound(
            handle,
            OutboundFrame::ErrorResponse {
                conversation_id: handle.conversation_id(),
                reason: ErrorReason::new(ERROR_CODE_REJECTED, message),
            },
        )
    }

    fn complete_inbound(
        &self,
        handle: &ResponderHandle,
        frame: OutboundFrame,
    ) -> Result<(), MessagingError> {
        if self.is_closed() {
            return Err(MessagingError::SessionClosed);
        }
        if !handle.claim() {
            return Err(MessagingError::AlreadyResponded);
        }
        let conversation_id = handle.conversation_id();
        if self.inbound.remove(&conversation_id).is_none() {
            metrics::record_anomaly(ANOMALY_UNKNOWN_HANDLE);
            warn!("Dropping response: {}", MessagingError::UnknownHandle(conversation_id));
            return Ok(());
        }
        if let Err(e) = self.transport.send_frame(frame) {
            self.inbound.insert(conversation_id);
            handle.release();
            return Err(e);
        }
        Ok(())
    }

    /// Rejects an inbound request whose responder handles were all dropped
    /// without an answer.
    pub(super) fn abandon_incoming_request(&self, conversation_id: u64, path: &str) {
        if self.is_closed() || self.inbound.remove(&conversation_id).is_none() {
            return;
        }
        warn!(conversation_id, path, "Responder dropped without answering; rejecting request");
        self.send_error_response(
            conversation_id,
            ErrorReason::new(ERROR_CODE_REJECTED, "request dropped without a response"),
        );
    }

    fn send_error_response(&self, conversation_id: u64, reason: ErrorReason) {
        let frame = OutboundFrame::ErrorResponse {
            conversation_id,
            reason,
        };
        if let Err(e) = self.transport.send_frame(frame) {
            warn!(conversation_id, "Failed to send error response: {}", e);
        }
    }

    /// Removes a pending conversation. The single linearization point for resolution.
    fn take(&self, token: CorrelationToken) -> Option<Conversation> {
        let conversation = self.pending.lock().conversations.remove(&token);
        if conversation.is_some() {
            PENDING_CONVERSATIONS.dec();
        }
        conversation
    }

    fn take_filtered(&self, token: CorrelationToken) -> Option<FilteredConversation> {
        let conversation = self.pending.lock().filtered.remove(&token);
        if conversation.is_some() {
            PENDING_CONVERSATIONS.dec();
        }
        conversation
    }

    /// Removes a conversation of either kind without invoking its handler.
    fn discard(&self, token: CorrelationToken) -> bool {
        self.take(token).is_some() || self.take_filtered(token).is_some()
    }

    fn unknown_filter_frame(&self, token: CorrelationToken, kind: &'static str) {
        metrics::record_anomaly(ANOMALY_UNKNOWN_TOKEN);
        warn!(kind, "Dropping frame: {}", MessagingError::UnknownToken(token.0));
    }

    fn complete_filtered(&self, token: CorrelationToken, conversation: FilteredConversation) {
        self.close_filtered(token, conversation, "complete", Ok(()));
    }

    fn end_filtered(
        &self,
        token: CorrelationToken,
        conversation: FilteredConversation,
        resolution: Resolution,
    ) {
        let label = resolution.label();
        let outcome = resolution.into_outcome().map(|_| ());
        self.close_filtered(token, conversation, label, outcome);
    }

    fn close_filtered(
        &self,
        token: CorrelationToken,
        conversation: FilteredConversation,
        label: &'static str,
        outcome: Result<(), MessagingError>,
    ) {
        if !matches!(outcome, Err(MessagingError::Timeout))
            && let Some(timer) = conversation.timer
        {
            timer.cancel();
        }
        CONVERSATIONS_RESOLVED_TOTAL.with_label_values(&[label]).inc();
        debug!(
            token = %token,
            outcome = label,
            sessions = ?conversation.expected,
            answered = conversation.answered,
            elapsed_ms = conversation.sent_at.elapsed().as_millis() as u64,
            "Filtered conversation closed"
        );
        conversation
            .slot
            .close(self.settings.catch_handler_panics, outcome);
    }

    fn finish(&self, token: CorrelationToken, conversation: Conversation, resolution: Resolution) {
        let Conversation {
            handler,
            timer,
            response_type,
            sent_at,
            ..
        } = conversation;

        if !matches!(resolution, Resolution::Timeout)
            && let Some(timer) = timer
        {
            timer.cancel();
        }

        let label = resolution.label();
        let outcome = resolution.into_outcome().and_then(|payload| {
            ValueCodec
                .decode(response_type, &payload)
                .map_err(MessagingError::from)
        });

        CONVERSATIONS_RESOLVED_TOTAL.with_label_values(&[label]).inc();
        debug!(
            token = %token,
            outcome = label,
            elapsed_ms = sent_at.elapsed().as_millis() as u64,
            "Conversation resolved"
        );

        invoke_isolated(HandlerKind::Response, self.settings.catch_handler_panics, move || {
            handler.on_response(outcome);
            Ok(())
        });
    }
}
