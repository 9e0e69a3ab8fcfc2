// src/core/conversation/responder.rs

//! The inbound direction of request/response: request streams registered per
//! path and the single-use handles used to answer each request.

use super::ConversationCorrelator;
use super::handler::RequestHandler;
use crate::core::codec::{DataType, Value};
use crate::core::errors::MessagingError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Answers one inbound request. At most one response or rejection may be
/// sent per handle; clones share that budget.
///
/// If the last clone is dropped unanswered, the request is rejected.
#[derive(Clone)]
pub struct ResponderHandle {
    inner: Arc<ResponderInner>,
}

struct ResponderInner {
    conversation_id: u64,
    path: String,
    response_type: DataType,
    responded: AtomicBool,
    correlator: Weak<ConversationCorrelator>,
}

impl Drop for ResponderInner {
    fn drop(&mut self) {
        if self.responded.load(Ordering::Acquire) {
            return;
        }
        if let Some(correlator) = self.correlator.upgrade() {
            correlator.abandon_incoming_request(self.conversation_id, &self.path);
        }
    }
}

impl ResponderHandle {
    pub(super) fn new(
        conversation_id: u64,
        path: String,
        response_type: DataType,
        correlator: Weak<ConversationCorrelator>,
    ) -> Self {
        Self {
            inner: Arc::new(ResponderInner {
                conversation_id,
                path,
                response_type,
                responded: AtomicBool::new(false),
                correlator,
            }),
        }
    }

    /// The platform-assigned id of the inbound conversation.
    pub fn conversation_id(&self) -> u64 {
        self.inner.conversation_id
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The data type the response must have.
    pub fn response_type(&self) -> DataType {
        self.inner.response_type
    }

    pub fn has_responded(&self) -> bool {
        self.inner.responded.load(Ordering::Acquire)
    }

    /// Sends `value` as the response. Same as
    /// `ConversationCorrelator::respond_to_incoming_request`.
    pub fn respond(&self, value: &Value) -> Result<(), MessagingError> {
        self.correlator()?.respond_to_incoming_request(self, value)
    }

    /// Answers the request with an error.
    pub fn reject(&self, message: &str) -> Result<(), MessagingError> {
        self.correlator()?.reject_incoming_request(self, message)
    }

    /// Claims the handle's single response. Returns false if already claimed.
    pub(super) fn claim(&self) -> bool {
        !self.inner.responded.swap(true, Ordering::AcqRel)
    }

    /// Returns an unused claim, e.g. when sending the response failed locally.
    pub(super) fn release(&self) {
        self.inner.responded.store(false, Ordering::Release);
    }

    fn correlator(&self) -> Result<Arc<ConversationCorrelator>, MessagingError> {
        self.inner
            .correlator
            .upgrade()
            .ok_or(MessagingError::SessionClosed)
    }
}

impl std::fmt::Debug for ResponderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderHandle")
            .field("conversation_id", &self.inner.conversation_id)
            .field("path", &self.inner.path)
            .field("response_type", &self.inner.response_type)
            .field("responded", &self.has_responded())
            .finish()
    }
}

/// A handler registered for one request path.
pub(super) struct RequestStream {
    pub(super) request_type: DataType,
    pub(super) response_type: DataType,
    pub(super) handler: Arc<dyn RequestHandler>,
}

/// Request streams keyed by request path.
#[derive(Default)]
pub(super) struct RequestStreams {
    streams: DashMap<String, Arc<RequestStream>>,
}

impl RequestStreams {
    /// Registers a stream, returning the one it replaced.
    pub(super) fn insert(&self, path: String, stream: RequestStream) -> Option<Arc<RequestStream>> {
        self.streams.insert(path, Arc::new(stream))
    }

    pub(super) fn remove(&self, path: &str) -> Option<Arc<RequestStream>> {
        self.streams.remove(path).map(|(_, stream)| stream)
    }

    pub(super) fn get(&self, path: &str) -> Option<Arc<RequestStream>> {
        self.streams.get(path).map(|e| e.value().clone())
    }

    pub(super) fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub(super) fn drain(&self) -> Vec<Arc<RequestStream>> {
        let paths: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        paths.iter().filter_map(|path| self.remove(path)).collect()
    }
}
