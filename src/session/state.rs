// src/session/state.rs

//! Session lifecycle state and the listeners told about its transitions.

use crate::core::protocol::SessionId;
use serde::{Deserialize, Serialize};

/// The lifecycle of a session. `Closed` is terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
}

impl ConnectionState {
    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

/// Observes session state transitions.
pub trait SessionListener: Send + Sync {
    fn on_state_changed(&self, session: &SessionId, old: ConnectionState, new: ConnectionState);
}

impl<F> SessionListener for F
where
    F: Fn(&SessionId, ConnectionState, ConnectionState) + Send + Sync,
{
    fn on_state_changed(&self, session: &SessionId, old: ConnectionState, new: ConnectionState) {
        self(session, old, new)
    }
}
