// src/core/protocol/mod.rs

//! Frames exchanged with the platform and the transport abstraction that
//! carries them. Encoding frames for the wire is the transport's concern.

pub mod frame;
pub mod transport;

pub use frame::{
    ConversationTarget, CorrelationToken, ErrorReason, InboundFrame, OutboundFrame,
    ServiceRequest, SessionId,
};
pub use transport::Transport;
