// src/core/pubsub/stream.rs

//! The caller-facing side of a subscription: value stream handlers and the
//! updates delivered to them.

use crate::core::codec::Value;
use crate::core::errors::MessagingError;
use crate::core::topics::{TopicSpecification, UnsubscribeReason};
use std::fmt;

/// Identifies one registration in the subscription registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A value change for one topic path, as seen by one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    /// The value previously delivered for this topic, absent on the first delivery.
    pub previous: Option<Value>,
    pub current: Value,
}

/// Receives the values of topics matched by a subscription's selector.
///
/// Handlers are invoked outside the registry's locks, but deliveries for one
/// topic path to one subscription are serialized and arrive in transport order.
pub trait ValueStream: Send + Sync {
    /// Called for every successfully decoded update.
    fn on_value(&self, topic_path: &str, update: &ValueUpdate) -> anyhow::Result<()>;

    /// The server started delivering a topic matched by the selector.
    fn on_subscription(&self, _topic_path: &str, _specification: &TopicSpecification) {}

    /// The server stopped delivering a topic matched by the selector.
    fn on_unsubscription(&self, _topic_path: &str, _reason: UnsubscribeReason) {}

    /// An update for `topic_path` could not be decoded as the declared type.
    fn on_error(&self, _topic_path: &str, _error: &MessagingError) {}

    /// The registration was removed.
    fn on_close(&self) {}
}
