//! # Link Supervisor
//!
//! Owns each serial connection: open, read, detect failure, back off, reconnect.
//!
//! ```text
//! Disconnected -> Connecting -> Syncing -> Streaming
//!                    ^   |          |          |
//!                    |   v          v          v
//!                    +-- Backoff <--+----------+
//! ```
//!
//! `Syncing` only becomes `Streaming` once the decoder has validated a frame, so an
//! open port that emits garbage (wrong baud rate, boot log) is not mistaken for a
//! healthy link.

pub mod connector;
pub mod state;
pub mod supervisor;

#[cfg(feature = "serial")]
pub use connector::SerialConnector;
pub use connector::{LinkConnector, LinkIo};
pub use state::{Backoff, LinkEvent, LinkState, LinkStateMachine};
pub use supervisor::{LinkFailure, LinkHandle, LinkSettings, LinkSupervisor};

use crate::meshtastic::framer::Frame;

/// A validated frame together with the device it arrived on.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub source: String,
    pub frame: Frame,
}
