// src/core/mod.rs

//! The messaging core: value encoding, topic selection, subscriptions and
//! request/response conversations. Everything here is independent of how
//! frames reach the platform.

pub mod codec;
pub mod conversation;
pub mod errors;
pub mod isolation;
pub mod metrics;
pub mod protocol;
pub mod pubsub;
pub mod topic_views;
pub mod topics;

pub use codec::{DataType, Value};
pub use errors::MessagingError;
