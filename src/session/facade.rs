// src/session/facade.rs

use super::state::{ConnectionState, SessionListener};
use crate::config::Config;
use crate::core::codec::{DataType, Value};
use crate::core::conversation::{
    ConversationCorrelator, FilteredResponseHandler, OutgoingRequest, RequestHandler,
    ResponderHandle, ResponseHandler, TimerService, TokioTimer,
};
use crate::core::errors::MessagingError;
use crate::core::isolation::{HandlerKind, invoke_isolated};
use crate::core::metrics::{self, ANOMALY_FRAME_AFTER_CLOSE};
use crate::core::protocol::{
    ConversationTarget, CorrelationToken, InboundFrame, OutboundFrame, SessionId, Transport,
};
use crate::core::pubsub::{SubscriptionId, SubscriptionRegistry, ValueStream};
use crate::core::topics::TopicSelector;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// A client session against the messaging platform.
///
/// All operations are non-blocking: outcomes of requests and service calls are
/// delivered to caller-supplied handlers, and value updates to value streams,
/// as inbound frames are fed to `handle_frame` or `run_inbound`.
pub struct Session {
    id: SessionId,
    state: RwLock<ConnectionState>,
    registry: SubscriptionRegistry,
    /// Held across a registry change and the frame it sends, so Subscribe and
    /// Unsubscribe frames reach the server in registry order.
    subscription_order: Mutex<()>,
    correlator: Arc<ConversationCorrelator>,
    transport: Arc<dyn Transport>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    config: Config,
}

impl Session {
    /// Creates a session in the `Connecting` state.
    pub fn new(
        id: SessionId,
        transport: Arc<dyn Transport>,
        timer: Arc<dyn TimerService>,
        config: Config,
    ) -> Self {
        let correlator =
            ConversationCorrelator::new(transport.clone(), timer, config.correlator_settings());
        Self {
            id,
            state: RwLock::new(ConnectionState::Connecting),
            registry: SubscriptionRegistry::new(config.dispatch.catch_handler_panics),
            subscription_order: Mutex::new(()),
            correlator,
            transport,
            listeners: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Creates a session whose request deadlines run on the current Tokio runtime.
    pub fn with_tokio_timer(
        id: SessionId,
        transport: Arc<dyn Transport>,
        config: Config,
    ) -> Result<Self, MessagingError> {
        let timer = Arc::new(TokioTimer::current()?);
        Ok(Self::new(id, transport, timer, config))
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    /// Moves a connecting session to `Connected`.
    pub fn mark_connected(&self) -> Result<(), MessagingError> {
        let old = {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Closed => return Err(MessagingError::SessionClosed),
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    *state = ConnectionState::Connected;
                    ConnectionState::Connecting
                }
            }
        };
        info!(session = %self.id, "Session connected");
        self.notify_listeners(old, ConnectionState::Connected);
        Ok(())
    }

    /// Closes the session. Pending requests fail with `SessionClosed`, request
    /// streams are dropped and inbound frames are ignored from now on.
    /// Subscriptions stay registered for introspection.
    ///
    /// Returns false if the session was already closed.
    pub fn close(&self) -> bool {
        let old = {
            let mut state = self.state.write();
            if state.is_closed() {
                return false;
            }
            std::mem::replace(&mut *state, ConnectionState::Closed)
        };

        let resolved = self.correlator.close_all();
        if let Err(e) = self.transport.send_frame(OutboundFrame::Close) {
            debug!(session = %self.id, "Could not send close frame: {}", e);
        }
        self.transport.close();

        info!(
            session = %self.id,
            failed_requests = resolved,
            subscriptions = self.registry.len(),
            "Session closed"
        );
        self.notify_listeners(old, ConnectionState::Closed);
        true
    }

    /// Registers `stream` for every topic matching `selector`.
    ///
    /// The server is asked to deliver the selector's topics the first time any
    /// stream uses it. Subscribing the same stream with the same selector again
    /// returns the existing id.
    ///
    /// The transport must not call back into `subscribe` or `unsubscribe`
    /// from `send_frame`.
    pub fn subscribe(
        &self,
        selector: &str,
        value_type: DataType,
        stream: Arc<dyn ValueStream>,
    ) -> Result<SubscriptionId, MessagingError> {
        self.ensure_open()?;
        let selector = TopicSelector::parse(selector)?;
        let expression = selector.expression().to_string();
        let (detached, e) = {
            let _order = self.subscription_order.lock();
            let registration = self.registry.subscribe(selector, value_type, stream);
            if !registration.first_for_selector {
                return Ok(registration.id);
            }
            let frame = OutboundFrame::Subscribe {
                selector: expression,
            };
            match self.transport.send_frame(frame) {
                Ok(()) => return Ok(registration.id),
                Err(e) => (self.registry.detach(registration.id), e),
            }
        };
        if let Some((_, stream)) = detached {
            self.registry.close_stream(&stream);
        }
        Err(e)
    }

    /// Removes a subscription. Returns false if it was already removed.
    ///
    /// Allowed after close, in which case nothing is sent to the server.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let stream = {
            let _order = self.subscription_order.lock();
            let Some((removal, stream)) = self.registry.detach(id) else {
                return false;
            };
            if removal.last_for_selector && !self.state().is_closed() {
                let frame = OutboundFrame::Unsubscribe {
                    selector: removal.selector.expression().to_string(),
                };
                if let Err(e) = self.transport.send_frame(frame) {
                    warn!(subscription = %id, "Failed to send unsubscribe: {}", e);
                }
            }
            stream
        };
        self.registry.close_stream(&stream);
        true
    }

    /// Removes every subscription. Returns how many were removed.
    pub fn discard_subscriptions(&self) -> usize {
        self.registry
            .subscription_ids()
            .into_iter()
            .filter(|id| self.unsubscribe(*id))
            .count()
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.registry.subscription_ids()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Sends a request to a request stream registered by `session_id`.
    pub fn send_request_to_session<H>(
        &self,
        session_id: &SessionId,
        path: &str,
        request: &Value,
        response_type: DataType,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: ResponseHandler,
    {
        let target = ConversationTarget::Session {
            session_id: session_id.clone(),
            path: path.to_string(),
        };
        self.send(OutgoingRequest::new(target, request, response_type)?, handler)
    }

    pub fn send_request_to_session_with_timeout<H>(
        &self,
        session_id: &SessionId,
        path: &str,
        request: &Value,
        response_type: DataType,
        timeout: Duration,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: ResponseHandler,
    {
        let target = ConversationTarget::Session {
            session_id: session_id.clone(),
            path: path.to_string(),
        };
        self.send(
            OutgoingRequest::new(target, request, response_type)?.with_timeout(timeout),
            handler,
        )
    }

    /// Sends a request to whichever session handles `path`.
    pub fn send_request<H>(
        &self,
        path: &str,
        request: &Value,
        response_type: DataType,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: ResponseHandler,
    {
        let target = ConversationTarget::Path(path.to_string());
        self.send(OutgoingRequest::new(target, request, response_type)?, handler)
    }

    pub fn send_request_with_timeout<H>(
        &self,
        path: &str,
        request: &Value,
        response_type: DataType,
        timeout: Duration,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: ResponseHandler,
    {
        let target = ConversationTarget::Path(path.to_string());
        self.send(
            OutgoingRequest::new(target, request, response_type)?.with_timeout(timeout),
            handler,
        )
    }

    /// Sends a request to `path` on every session matching `filter`.
    ///
    /// The handler learns how many sessions were reached, then receives each
    /// one's answer, then `on_close`.
    pub fn send_request_to_filter<H>(
        &self,
        filter: &str,
        path: &str,
        request: &Value,
        response_type: DataType,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: FilteredResponseHandler,
    {
        let target = ConversationTarget::Filter {
            filter: filter.to_string(),
            path: path.to_string(),
        };
        self.send_filtered(OutgoingRequest::new(target, request, response_type)?, handler)
    }

    pub fn send_request_to_filter_with_timeout<H>(
        &self,
        filter: &str,
        path: &str,
        request: &Value,
        response_type: DataType,
        timeout: Duration,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: FilteredResponseHandler,
    {
        let target = ConversationTarget::Filter {
            filter: filter.to_string(),
            path: path.to_string(),
        };
        self.send_filtered(
            OutgoingRequest::new(target, request, response_type)?.with_timeout(timeout),
            handler,
        )
    }

    /// Fails a pending request with `Cancelled`. Returns false if it had already resolved.
    pub fn cancel_request(&self, token: CorrelationToken) -> bool {
        self.correlator.cancel(token)
    }

    pub fn pending_requests(&self) -> Vec<CorrelationToken> {
        self.correlator.pending_tokens()
    }

    /// Handles requests sent to this session on `path`.
    pub fn set_request_stream(
        &self,
        path: &str,
        request_type: DataType,
        response_type: DataType,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), MessagingError> {
        self.ensure_open()?;
        self.correlator
            .set_request_stream(path, request_type, response_type, handler)
    }

    pub fn remove_request_stream(&self, path: &str) -> bool {
        self.correlator.remove_request_stream(path)
    }

    pub fn request_stream_paths(&self) -> Vec<String> {
        self.correlator.request_stream_paths()
    }

    pub fn respond_to_request(
        &self,
        responder: &ResponderHandle,
        response: &Value,
    ) -> Result<(), MessagingError> {
        self.correlator
            .respond_to_incoming_request(responder, response)
    }

    pub fn reject_request(
        &self,
        responder: &ResponderHandle,
        message: &str,
    ) -> Result<(), MessagingError> {
        self.correlator.reject_incoming_request(responder, message)
    }

    /// Routes one inbound frame to the registry or the correlator.
    pub fn handle_frame(&self, frame: InboundFrame) {
        if self.state().is_closed() {
            metrics::record_anomaly(ANOMALY_FRAME_AFTER_CLOSE);
            debug!(session = %self.id, kind = frame.kind(), "Dropping frame received after close");
            return;
        }

        match frame {
            InboundFrame::ValueUpdate {
                topic_path,
                payload,
            } => {
                self.registry.dispatch(&topic_path, &payload);
            }
            InboundFrame::SubscriptionNotice {
                topic_path,
                specification,
            } => self.registry.on_subscription(&topic_path, &specification),
            InboundFrame::UnsubscriptionNotice { topic_path, reason } => {
                self.registry.on_unsubscription(&topic_path, reason)
            }
            InboundFrame::Request {
                conversation_id,
                path,
                sender,
                payload,
            } => self
                .correlator
                .on_request(conversation_id, &path, sender, &payload),
            InboundFrame::Response { token, payload } => {
                self.correlator.resolve(token, Ok(payload));
            }
            InboundFrame::Error { token, reason } => {
                self.correlator.resolve(token, Err(reason));
            }
            InboundFrame::FilterDispatched { token, count } => {
                self.correlator.on_filter_dispatched(token, count);
            }
            InboundFrame::FilterResponse {
                token,
                session_id,
                payload,
            } => {
                self.correlator
                    .on_filter_response(token, session_id, Ok(payload));
            }
            InboundFrame::FilterError {
                token,
                session_id,
                reason,
            } => {
                self.correlator
                    .on_filter_response(token, session_id, Err(reason));
            }
        }
    }

    /// Feeds frames from `inbound` to `handle_frame` until shutdown is
    /// signalled or the channel closes. A closed channel means the connection
    /// is gone, so the session is closed.
    pub async fn run_inbound(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundFrame>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!(session = %self.id, "Inbound loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!(session = %self.id, "Inbound loop received shutdown signal");
                    return;
                }
                maybe_frame = inbound.recv() => {
                    match maybe_frame {
                        Some(frame) => self.handle_frame(frame),
                        None => {
                            debug!(session = %self.id, "Inbound channel closed");
                            self.close();
                            return;
                        }
                    }
                }
            }
        }
    }

    pub(super) fn send<H>(
        &self,
        request: OutgoingRequest,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: ResponseHandler,
    {
        self.ensure_open()?;
        self.correlator.send(request, handler)
    }

    fn send_filtered<H>(
        &self,
        request: OutgoingRequest,
        handler: H,
    ) -> Result<CorrelationToken, MessagingError>
    where
        H: FilteredResponseHandler,
    {
        self.ensure_open()?;
        self.correlator.send_filtered(request, handler)
    }

    pub(super) fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.state().is_closed() {
            Err(MessagingError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn notify_listeners(&self, old: ConnectionState, new: ConnectionState) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            invoke_isolated(
                HandlerKind::Listener,
                self.config.dispatch.catch_handler_panics,
                || {
                    listener.on_state_changed(&self.id, old, new);
                    Ok(())
                },
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("subscriptions", &self.registry.len())
            .field("pending_requests", &self.correlator.pending_count())
            .finish()
    }
}
