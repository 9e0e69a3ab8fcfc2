// src/core/protocol/frame.rs

//! Defines the outbound and inbound frame kinds handled by the core.

use crate::core::topics::{TopicSpecification, UnsubscribeReason};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity of a session, unique for the lifetime of its connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identity, for sessions the process creates itself.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlates an outbound request with its response. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationToken(pub u64);

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request handled by the platform itself rather than by another session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceRequest {
    AddTopic {
        path: String,
        specification: TopicSpecification,
    },
    /// Sets the value of a topic; the value travels as the request payload.
    SetTopic { path: String },
    RemoveTopics { selector: String },
    CreateTopicView { name: String, specification: String },
    ListTopicViews,
    GetTopicView { name: String },
    RemoveTopicView { name: String },
}

/// Where an outbound request is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationTarget {
    /// A request path registered by one specific remote session.
    Session { session_id: SessionId, path: String },
    /// A request path, routed by the platform to whichever session handles it.
    Path(String),
    /// A request path on every session matching a session filter expression.
    Filter { filter: String, path: String },
    /// A platform service call.
    Service(ServiceRequest),
}

impl ConversationTarget {
    /// Returns true if the request may reach more than one session.
    pub fn is_filter(&self) -> bool {
        matches!(self, ConversationTarget::Filter { .. })
    }
}

impl fmt::Display for ConversationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationTarget::Session { session_id, path } => {
                write!(f, "session {session_id} path '{path}'")
            }
            ConversationTarget::Path(path) => write!(f, "path '{path}'"),
            ConversationTarget::Filter { filter, path } => {
                write!(f, "filter \"{filter}\" path '{path}'")
            }
            ConversationTarget::Service(service) => write!(f, "service {service:?}"),
        }
    }
}

/// Why the remote side failed a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReason {
    pub code: u32,
    pub message: String,
}

impl ErrorReason {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

/// Frames the core hands to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Subscribe {
        selector: String,
    },
    Unsubscribe {
        selector: String,
    },
    Request {
        token: CorrelationToken,
        target: ConversationTarget,
        payload: Bytes,
    },
    /// A response to an inbound request, identified by the remote conversation id.
    Response {
        conversation_id: u64,
        payload: Bytes,
    },
    /// A failure response to an inbound request.
    ErrorResponse {
        conversation_id: u64,
        reason: ErrorReason,
    },
    Close,
}

/// Frames delivered to the core by the transport's ingestion path.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ValueUpdate {
        topic_path: String,
        payload: Bytes,
    },
    SubscriptionNotice {
        topic_path: String,
        specification: TopicSpecification,
    },
    UnsubscriptionNotice {
        topic_path: String,
        reason: UnsubscribeReason,
    },
    /// A request addressed to this session.
    Request {
        conversation_id: u64,
        path: String,
        sender: Option<SessionId>,
        payload: Bytes,
    },
    Response {
        token: CorrelationToken,
        payload: Bytes,
    },
    Error {
        token: CorrelationToken,
        reason: ErrorReason,
    },
    /// The number of sessions a filtered request reached.
    FilterDispatched {
        token: CorrelationToken,
        count: usize,
    },
    /// One session's response to a filtered request.
    FilterResponse {
        token: CorrelationToken,
        session_id: SessionId,
        payload: Bytes,
    },
    /// One session's failure to answer a filtered request.
    FilterError {
        token: CorrelationToken,
        session_id: SessionId,
        reason: ErrorReason,
    },
}

impl InboundFrame {
    /// A short name for the frame kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::ValueUpdate { .. } => "value_update",
            InboundFrame::SubscriptionNotice { .. } => "subscription_notice",
            InboundFrame::UnsubscriptionNotice { .. } => "unsubscription_notice",
            InboundFrame::Request { .. } => "request",
            InboundFrame::Response { .. } => "response",
            InboundFrame::Error { .. } => "error",
            InboundFrame::FilterDispatched { .. } => "filter_dispatched",
            InboundFrame::FilterResponse { .. } => "filter_response",
            InboundFrame::FilterError { .. } => "filter_error",
        }
    }
}
