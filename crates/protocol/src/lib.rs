//! Wire types shared by the pawlink control plane.
//!
//! Covers the hub/device data model returned by the REST API, the tagged
//! union of events pushed by the hub relay, the command envelope sent back
//! to it, and the JSON frame that carries both over the socket.

pub mod commands;
pub mod constants;
pub mod envelope;
pub mod events;
pub mod types;

// Re-export primary types for convenience.
pub use commands::{Command, CommandRequest};
pub use envelope::Frame;
pub use events::{ConnectionState, EventKind, ServerEvent};
pub use types::{ConnectedPet, Device, Hub, LinkStatus, addresses_match};
