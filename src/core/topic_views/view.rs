// src/core/topic_views/view.rs

use super::TopicViewSpec;
use crate::core::errors::SpecError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A topic view as held by the server: a unique name, its mapping rule and
/// the roles captured when it was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TopicViewRecord", into = "TopicViewRecord")]
pub struct TopicView {
    name: String,
    specification: TopicViewSpec,
}

impl TopicView {
    pub fn new(name: impl Into<String>, specification: TopicViewSpec) -> Self {
        Self {
            name: name.into(),
            specification,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn specification(&self) -> &TopicViewSpec {
        &self.specification
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        self.specification.roles()
    }
}

/// The serialized shape of a view in service responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopicViewRecord {
    name: String,
    specification: String,
    #[serde(default)]
    roles: BTreeSet<String>,
}

impl TryFrom<TopicViewRecord> for TopicView {
    type Error = SpecError;

    fn try_from(record: TopicViewRecord) -> Result<Self, Self::Error> {
        let specification = TopicViewSpec::parse(&record.specification)?.with_roles(record.roles);
        Ok(TopicView::new(record.name, specification))
    }
}

impl From<TopicView> for TopicViewRecord {
    fn from(view: TopicView) -> Self {
        TopicViewRecord {
            roles: view.specification.roles().clone(),
            specification: view.specification.text().to_string(),
            name: view.name,
        }
    }
}
