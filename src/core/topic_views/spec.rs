// src/core/topic_views/spec.rs

//! Parses and validates topic view mapping rules of the form
//! `map <sourcePath> to <viewPath>`.
//!
//! The view path may reference segments of each source topic path with
//! `<path(N)>` directives, where `N` is a zero-based segment index.

use crate::core::errors::SpecError;
use crate::core::topics::TopicSelector;
use std::collections::BTreeSet;
use std::fmt;

const MAP_KEYWORD: &str = "map";
const TO_KEYWORD: &str = "to";
const DIRECTIVE_OPEN: &str = "<path(";
const DIRECTIVE_CLOSE: &str = ")>";

/// A piece of a parsed view path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ViewPathPart {
    Literal(String),
    SourceSegment(usize),
}

/// An immutable, validated topic view mapping rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicViewSpec {
    text: String,
    source_path: String,
    view_path: String,
    view_parts: Vec<ViewPathPart>,
    roles: BTreeSet<String>,
}

impl TopicViewSpec {
    /// Parses a mapping rule. The result declares no required roles.
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        if let Some(c) = text.chars().find(|c| c.is_control() && !c.is_whitespace()) {
            return Err(SpecError::syntax(format!(
                "control character {:?} in specification",
                c
            )));
        }

        let tokens: Vec<&str> = text.split_whitespace().collect();
        match tokens.as_slice() {
            [MAP_KEYWORD, source, TO_KEYWORD, view] => {
                let source_path = validate_path(source, "source")?;
                let view_path = validate_path(view, "view")?;
                let view_parts = parse_view_path(view_path)?;
                let spec = Self {
                    text: tokens.join(" "),
                    source_path: source_path.to_string(),
                    view_path: view_path.to_string(),
                    view_parts,
                    roles: BTreeSet::new(),
                };
                spec.source_selector()?;
                Ok(spec)
            }
            [MAP_KEYWORD, TO_KEYWORD, _] => Err(SpecError::empty_path("source path is missing")),
            [MAP_KEYWORD, _, TO_KEYWORD] => Err(SpecError::empty_path("view path is missing")),
            _ => Err(SpecError::syntax(format!(
                "expected 'map <source> to <view>', got '{}'",
                text.trim()
            ))),
        }
    }

    /// Declares the roles a session needs to read the derived view.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// The normalized rule text (tokens joined by single spaces).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn view_path(&self) -> &str {
        &self.view_path
    }

    /// The required roles. Empty means unrestricted read.
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Interprets the source path as a topic selector.
    pub fn source_selector(&self) -> Result<TopicSelector, SpecError> {
        TopicSelector::parse(&self.source_path).map_err(|e| SpecError::syntax(e.to_string()))
    }

    /// Returns true if the view path uses `<path(N)>` directives.
    pub fn is_parameterized(&self) -> bool {
        self.view_parts
            .iter()
            .any(|p| matches!(p, ViewPathPart::SourceSegment(_)))
    }

    /// Computes the view topic path derived from a concrete source topic.
    ///
    /// Returns `None` if a directive references a segment the source path lacks.
    pub fn expand_view_path(&self, source_topic: &str) -> Option<String> {
        let segments: Vec<&str> = source_topic.split('/').collect();
        let mut out = String::with_capacity(self.view_path.len());
        for part in &self.view_parts {
            match part {
                ViewPathPart::Literal(s) => out.push_str(s),
                ViewPathPart::SourceSegment(i) => out.push_str(segments.get(*i)?),
            }
        }
        Some(out)
    }
}

impl fmt::Display for TopicViewSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for TopicViewSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicViewSpec::parse(s)
    }
}

fn validate_path<'a>(path: &'a str, which: &str) -> Result<&'a str, SpecError> {
    if path.chars().all(|c| c == '/') {
        return Err(SpecError::empty_path(format!(
            "{which} path '{path}' names no topic"
        )));
    }
    Ok(path)
}

fn parse_view_path(view_path: &str) -> Result<Vec<ViewPathPart>, SpecError> {
    let mut parts = Vec::new();
    let mut rest = view_path;

    while let Some(start) = rest.find(DIRECTIVE_OPEN) {
        if start > 0 {
            parts.push(ViewPathPart::Literal(rest[..start].to_string()));
        }
        let after_open = &rest[start + DIRECTIVE_OPEN.len()..];
        let Some(end) = after_open.find(DIRECTIVE_CLOSE) else {
            return Err(SpecError::syntax(format!(
                "unterminated path directive in '{view_path}'"
            )));
        };
        let index = after_open[..end].trim().parse::<usize>().map_err(|_| {
            SpecError::syntax(format!(
                "path directive index '{}' is not a non-negative integer",
                &after_open[..end]
            ))
        })?;
        parts.push(ViewPathPart::SourceSegment(index));
        rest = &after_open[end + DIRECTIVE_CLOSE.len()..];
    }

    if rest.contains('<') || rest.contains('>') {
        return Err(SpecError::syntax(format!(
            "unrecognized directive in view path '{view_path}'"
        )));
    }
    if !rest.is_empty() {
        parts.push(ViewPathPart::Literal(rest.to_string()));
    }
    Ok(parts)
}
