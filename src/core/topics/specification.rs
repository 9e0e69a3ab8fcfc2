// src/core/topics/specification.rs

use crate::core::codec::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes a topic: its value type and optional server-defined properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpecification {
    pub topic_type: DataType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl TopicSpecification {
    pub fn new(topic_type: DataType) -> Self {
        Self {
            topic_type,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// The outcome of a successful add-topic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddTopicResult {
    Created,
    /// A topic with the same path and specification already existed.
    Exists,
}

/// Why the server stopped delivering a topic to this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeReason {
    /// The session unsubscribed.
    Requested,
    /// Another session or the server unsubscribed this session.
    Control,
    /// The topic was removed.
    Removed,
    /// The session lost authorization to read the topic.
    Authorization,
    Unknown,
}
