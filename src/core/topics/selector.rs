// src/core/topics/selector.rs

//! Parses topic selector expressions and matches them against topic paths.
//!
//! Supported forms:
//! - `>a/b` or `a/b`: the exact path. A trailing `//` also selects every
//!   descendant, a trailing `/` selects descendants only.
//! - `?a/b.*`: split-path pattern. Each `/`-separated regular expression must
//!   fully match the corresponding path segment.
//! - `*a/.*`: full-path pattern. The regular expression must match the whole path.
//! - `#sel1////sel2`: a set of selectors, matching if any member matches.

use crate::core::errors::MessagingError;
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};

const PATH_PREFIX: char = '>';
const SPLIT_PATH_PREFIX: char = '?';
const FULL_PATH_PREFIX: char = '*';
const SET_PREFIX: char = '#';
const SET_SEPARATOR: &str = "////";
const DESCENDANT_QUALIFIER: &str = "//";

/// Which topics below the named path a selector includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Exact,
    DescendantsOnly,
    PathAndDescendants,
}

#[derive(Debug, Clone)]
enum SelectorKind {
    Path { path: String, qualifier: Qualifier },
    SplitPath { segments: Vec<Regex>, qualifier: Qualifier },
    FullPath(Regex),
    Set(Vec<TopicSelector>),
}

/// An immutable, parsed topic selector.
#[derive(Debug, Clone)]
pub struct TopicSelector {
    expression: String,
    kind: SelectorKind,
}

impl TopicSelector {
    /// Parses a selector expression.
    pub fn parse(expression: &str) -> Result<Self, MessagingError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(MessagingError::InvalidSelector(
                "selector cannot be empty".to_string(),
            ));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(MessagingError::InvalidSelector(format!(
                "selector '{}' contains control characters",
                trimmed.escape_debug()
            )));
        }

        let kind = match trimmed.chars().next() {
            Some(SET_PREFIX) => parse_set(&trimmed[1..])?,
            Some(SPLIT_PATH_PREFIX) => parse_split_path(&trimmed[1..])?,
            Some(FULL_PATH_PREFIX) => parse_full_path(&trimmed[1..])?,
            Some(PATH_PREFIX) => parse_path(&trimmed[1..])?,
            _ => parse_path(trimmed)?,
        };

        Ok(Self {
            expression: trimmed.to_string(),
            kind,
        })
    }

    /// The selector text as supplied (trimmed).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns true if `topic_path` is selected.
    pub fn matches(&self, topic_path: &str) -> bool {
        match &self.kind {
            SelectorKind::Path { path, qualifier } => match_path(path, *qualifier, topic_path),
            SelectorKind::SplitPath {
                segments,
                qualifier,
            } => match_split_path(segments, *qualifier, topic_path),
            SelectorKind::FullPath(regex) => regex.is_match(topic_path),
            SelectorKind::Set(members) => members.iter().any(|m| m.matches(topic_path)),
        }
    }
}

impl PartialEq for TopicSelector {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for TopicSelector {}

impl Hash for TopicSelector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expression.hash(state);
    }
}

impl fmt::Display for TopicSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl std::str::FromStr for TopicSelector {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicSelector::parse(s)
    }
}

/// Splits a trailing descendant qualifier off a path-like body.
fn split_qualifier(body: &str) -> (&str, Qualifier) {
    if let Some(stripped) = body.strip_suffix(DESCENDANT_QUALIFIER) {
        (stripped, Qualifier::PathAndDescendants)
    } else if let Some(stripped) = body.strip_suffix('/') {
        (stripped, Qualifier::DescendantsOnly)
    } else {
        (body, Qualifier::Exact)
    }
}

fn parse_path(body: &str) -> Result<SelectorKind, MessagingError> {
    let (path, qualifier) = split_qualifier(body);
    let path = path.trim_start_matches('/');
    if path.is_empty() && qualifier == Qualifier::Exact {
        return Err(MessagingError::InvalidSelector(
            "path selector names no path".to_string(),
        ));
    }
    Ok(SelectorKind::Path {
        path: path.to_string(),
        qualifier,
    })
}

fn parse_split_path(body: &str) -> Result<SelectorKind, MessagingError> {
    let (pattern, qualifier) = match body.strip_suffix(DESCENDANT_QUALIFIER) {
        Some(stripped) => (stripped, Qualifier::PathAndDescendants),
        None => (body, Qualifier::Exact),
    };
    if pattern.is_empty() {
        return Err(MessagingError::InvalidSelector(
            "split-path pattern is empty".to_string(),
        ));
    }
    let segments = pattern
        .split('/')
        .map(|segment| Regex::new(&format!("^(?:{segment})$")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SelectorKind::SplitPath {
        segments,
        qualifier,
    })
}

fn parse_full_path(body: &str) -> Result<SelectorKind, MessagingError> {
    if body.is_empty() {
        return Err(MessagingError::InvalidSelector(
            "full-path pattern is empty".to_string(),
        ));
    }
    Ok(SelectorKind::FullPath(Regex::new(&format!("^(?:{body})$"))?))
}

fn parse_set(body: &str) -> Result<SelectorKind, MessagingError> {
    let members = body
        .split(SET_SEPARATOR)
        .filter(|member| !member.is_empty())
        .map(TopicSelector::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if members.is_empty() {
        return Err(MessagingError::InvalidSelector(
            "selector set has no members".to_string(),
        ));
    }
    Ok(SelectorKind::Set(members))
}

fn match_path(path: &str, qualifier: Qualifier, topic_path: &str) -> bool {
    let is_descendant = || {
        if path.is_empty() {
            return !topic_path.is_empty();
        }
        topic_path
            .strip_prefix(path)
            .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
    };
    match qualifier {
        Qualifier::Exact => topic_path == path,
        Qualifier::DescendantsOnly => is_descendant(),
        Qualifier::PathAndDescendants => topic_path == path || is_descendant(),
    }
}

fn match_split_path(segments: &[Regex], qualifier: Qualifier, topic_path: &str) -> bool {
    let parts: Vec<&str> = topic_path.split('/').collect();
    if parts.len() < segments.len() {
        return false;
    }
    if parts.len() > segments.len() && qualifier != Qualifier::PathAndDescendants {
        return false;
    }
    segments
        .iter()
        .zip(parts.iter())
        .all(|(regex, part)| regex.is_match(part))
}
