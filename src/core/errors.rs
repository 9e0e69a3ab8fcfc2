// src/core/errors.rs

//! Defines the error types shared by the messaging core.

use std::fmt;
use thiserror::Error;

/// Why a payload could not be decoded as the declared data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DecodeErrorKind {
    /// The payload carries a valid tag for a different data type.
    TypeMismatch,
    /// The payload ends before the declared length.
    Truncated,
    /// Unknown tag, trailing bytes or an invalid body.
    Malformed,
}

/// A failure to decode a value payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub detail: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn type_mismatch(detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::TypeMismatch, detail)
    }

    pub fn truncated(detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Truncated, detail)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Malformed, detail)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for DecodeError {}

/// Why a topic view specification was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SpecErrorKind {
    Syntax,
    EmptyPath,
}

/// A failure to parse a topic view mapping rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecError {
    pub kind: SpecErrorKind,
    pub detail: String,
}

impl SpecError {
    pub fn syntax(detail: impl Into<String>) -> Self {
        Self {
            kind: SpecErrorKind::Syntax,
            detail: detail.into(),
        }
    }

    pub fn empty_path(detail: impl Into<String>) -> Self {
        Self {
            kind: SpecErrorKind::EmptyPath,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for SpecError {}

/// The main error enum for every operation exposed by the core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid topic view specification: {0}")]
    Spec(#[from] SpecError),

    /// A variable-width value body does not fit its `u32` length prefix.
    #[error("Value body of {0} bytes is too large to encode")]
    ValueTooLarge(usize),

    #[error("Invalid topic selector: {0}")]
    InvalidSelector(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Session is closed")]
    SessionClosed,

    #[error("A response has already been sent for this request")]
    AlreadyResponded,

    /// A response or error frame named a token with no pending conversation.
    #[error("Unknown correlation token {0}")]
    UnknownToken(u64),

    /// A response was attempted for an inbound request the core does not track.
    #[error("Unknown responder handle {0}")]
    UnknownHandle(u64),

    /// The remote side answered the request with an error.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("No request handler registered for path '{0}'")]
    NoRequestHandler(String),

    #[error("Too many pending conversations (limit {0})")]
    TooManyConversations(usize),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<regex::Error> for MessagingError {
    fn from(e: regex::Error) -> Self {
        MessagingError::InvalidSelector(e.to_string())
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(e: serde_json::Error) -> Self {
        MessagingError::Decode(DecodeError::malformed(format!(
            "JSON serialization/deserialization error: {e}"
        )))
    }
}
