// src/core/topics/mod.rs

//! Topic paths, selectors and the topic metadata advertised by the server.

pub mod selector;
pub mod specification;

pub use selector::TopicSelector;
pub use specification::{AddTopicResult, TopicSpecification, UnsubscribeReason};
