// src/session/services.rs

//! Platform service calls: topic management and topic views.
//!
//! Each call is a conversation with the platform whose JSON response carries
//! the serde representation of the result.

use super::facade::Session;
use crate::core::codec::Value;
use crate::core::conversation::OutgoingRequest;
use crate::core::errors::{DecodeError, MessagingError};
use crate::core::protocol::{CorrelationToken, ServiceRequest};
use crate::core::topic_views::{TopicView, TopicViewSpec};
use crate::core::topics::{AddTopicResult, TopicSelector, TopicSpecification};
use serde::de::DeserializeOwned;

impl Session {
    /// Creates a topic. Resolves with `Exists` if an identical topic is already present.
    pub fn add_topic<F>(
        &self,
        path: &str,
        specification: TopicSpecification,
        handler: F,
    ) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(Result<AddTopicResult, MessagingError>) + Send + 'static,
    {
        self.call_service(
            ServiceRequest::AddTopic {
                path: path.to_string(),
                specification,
            },
            None,
            handler,
        )
    }

    /// Sets the value of an existing topic.
    pub fn set_topic<F>(
        &self,
        path: &str,
        value: &Value,
        handler: F,
    ) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(Result<(), MessagingError>) + Send + 'static,
    {
        self.call_service(
            ServiceRequest::SetTopic {
                path: path.to_string(),
            },
            Some(value),
            handler,
        )
    }

    /// Removes every topic matching `selector`, resolving with the number removed.
    pub fn remove_topics<F>(
        &self,
        selector: &str,
        handler: F,
    ) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(Result<u64, MessagingError>) + Send + 'static,
    {
        let selector = TopicSelector::parse(selector)?;
        self.call_service(
            ServiceRequest::RemoveTopics {
                selector: selector.expression().to_string(),
            },
            None,
            handler,
        )
    }

    /// Creates or replaces a topic view. The specification is validated locally first.
    pub fn create_topic_view<F>(
        &self,
        name: &str,
        specification: &str,
        handler: F,
    ) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(Result<TopicView, MessagingError>) + Send + 'static,
    {
        let specification = TopicViewSpec::parse(specification)?;
        self.call_service(
            ServiceRequest::CreateTopicView {
                name: name.to_string(),
                specification: specification.text().to_string(),
            },
            None,
            handler,
        )
    }

    pub fn list_topic_views<F>(&self, handler: F) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(Result<Vec<TopicView>, MessagingError>) + Send + 'static,
    {
        self.call_service(ServiceRequest::ListTopicViews, None, handler)
    }

    /// Looks up a topic view by name. Resolves with `None` if there is none.
    pub fn get_topic_view<F>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(Result<Option<TopicView>, MessagingError>) + Send + 'static,
    {
        self.call_service(
            ServiceRequest::GetTopicView {
                name: name.to_string(),
            },
            None,
            handler,
        )
    }

    /// Removes a topic view. Removing an unknown view succeeds.
    pub fn remove_topic_view<F>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<CorrelationToken, MessagingError>
    where
        F: FnOnce(Result<(), MessagingError>) + Send + 'static,
    {
        self.call_service(
            ServiceRequest::RemoveTopicView {
                name: name.to_string(),
            },
            None,
            handler,
        )
    }

    fn call_service<T, F>(
        &self,
        request: ServiceRequest,
        value: Option<&Value>,
        handler: F,
    ) -> Result<CorrelationToken, MessagingError>
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(Result<T, MessagingError>) + Send + 'static,
    {
        self.send(
            OutgoingRequest::service(request, value)?,
            move |outcome: Result<Value, MessagingError>| {
                handler(outcome.and_then(from_service_response));
            },
        )
    }
}

fn from_service_response<T: DeserializeOwned>(value: Value) -> Result<T, MessagingError> {
    match value {
        Value::Json(json) => Ok(serde_json::from_value(json)?),
        other => Err(MessagingError::Decode(DecodeError::type_mismatch(format!(
            "service response must be json, got {}",
            other.data_type()
        )))),
    }
}
