// src/transport/mod.rs

//! Transports shipped with the crate.

mod loopback;

pub use loopback::{LOOPBACK_ERROR_CODE, LoopbackTransport};
