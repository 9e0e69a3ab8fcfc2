// src/core/protocol/transport.rs

use super::OutboundFrame;
use crate::core::errors::MessagingError;

/// The outbound half of the connected, ordered duplex channel to the platform.
///
/// Implementations must not block: `send_frame` enqueues the frame and returns.
/// Inbound frames are pushed into the owning session by the transport's own
/// ingestion path.
pub trait Transport: Send + Sync {
    fn send_frame(&self, frame: OutboundFrame) -> Result<(), MessagingError>;

    /// Releases the channel. Called once when the owning session closes.
    fn close(&self) {}
}
