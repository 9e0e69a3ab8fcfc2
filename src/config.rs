// src/config.rs

//! Manages session configuration: loading from TOML, defaults, and validation.

use crate::core::conversation::CorrelatorSettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Settings for a messaging session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Deadline for requests that do not set their own.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Maximum number of in-flight outbound requests. `0` disables the limit.
    #[serde(default = "default_max_pending_conversations")]
    pub max_pending_conversations: usize,
    /// Capacity of the channel feeding inbound frames to the session.
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            max_pending_conversations: default_max_pending_conversations(),
            inbound_queue_capacity: default_inbound_queue_capacity(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_max_pending_conversations() -> usize {
    10_000
}
fn default_inbound_queue_capacity() -> usize {
    1024
}

/// Settings for invoking caller-supplied handlers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// If true, a panicking handler is logged and counted instead of unwinding
    /// into the dispatcher.
    #[serde(default = "default_catch_handler_panics")]
    pub catch_handler_panics: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            catch_handler_panics: default_catch_handler_panics(),
        }
    }
}

fn default_catch_handler_panics() -> bool {
    true
}

/// Settings for the demo binary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DemoConfig {
    #[serde(default = "default_topic_path")]
    pub topic_path: String,
    #[serde(default = "default_request_path")]
    pub request_path: String,
    /// The string sent as each request.
    #[serde(default = "default_request")]
    pub request: String,
    /// The string the request handler answers with.
    #[serde(default = "default_response")]
    pub response: String,
    /// Number of value updates and requests to send.
    #[serde(default = "default_updates")]
    pub updates: usize,
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            topic_path: default_topic_path(),
            request_path: default_request_path(),
            request: default_request(),
            response: default_response(),
            updates: default_updates(),
            interval: default_interval(),
        }
    }
}

fn default_topic_path() -> String {
    "random/Int64".to_string()
}
fn default_request_path() -> String {
    "echo".to_string()
}
fn default_request() -> String {
    "Hello".to_string()
}
fn default_response() -> String {
    "Hello, world".to_string()
}
fn default_updates() -> usize {
    5
}
fn default_interval() -> Duration {
    Duration::from_millis(500)
}

/// The resolved configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            session: SessionConfig::default(),
            dispatch: DispatchConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.log_level.trim().is_empty() {
            return Err(anyhow!("log_level cannot be empty"));
        }
        if self.session.request_timeout.is_zero() {
            return Err(anyhow!("session.request_timeout cannot be 0"));
        }
        if self.session.inbound_queue_capacity == 0 {
            return Err(anyhow!("session.inbound_queue_capacity cannot be 0"));
        }
        if self.session.max_pending_conversations == 0 {
            warn!("session.max_pending_conversations is 0; pending requests are unbounded");
        }
        if self.demo.topic_path.trim_matches('/').is_empty() {
            return Err(anyhow!("demo.topic_path cannot be empty"));
        }
        if self.demo.request_path.trim().is_empty() {
            return Err(anyhow!("demo.request_path cannot be empty"));
        }
        if self.demo.interval.is_zero() {
            return Err(anyhow!("demo.interval cannot be 0"));
        }
        Ok(())
    }

    /// The correlator tunables derived from this configuration.
    pub fn correlator_settings(&self) -> CorrelatorSettings {
        CorrelatorSettings {
            default_timeout: self.session.request_timeout,
            max_pending: self.session.max_pending_conversations,
            catch_handler_panics: self.dispatch.catch_handler_panics,
        }
    }
}
