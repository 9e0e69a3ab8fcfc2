// src/session/mod.rs

//! The session façade: the single handle callers use for subscriptions,
//! requests, request streams and platform service calls.

mod facade;
mod services;
mod state;

pub use facade::Session;
pub use state::{ConnectionState, SessionListener};
