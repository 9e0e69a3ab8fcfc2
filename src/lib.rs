// src/lib.rs

pub mod config;
pub mod core;
pub mod session;
pub mod transport;

// Re-export
pub use crate::core::{DataType, MessagingError, Value};
pub use crate::session::Session;
