//! Realtime link to the hub relay.
//!
//! Owns the single WebSocket session ([`ConnectionManager`]), routes named
//! server events to subscribers ([`EventBus`]), and correlates outbound
//! commands with their replies ([`CommandCorrelator`]).

pub mod bus;
pub mod correlator;
pub mod dialer;
pub mod error;
pub mod loopback;
pub mod manager;
pub(crate) mod pumps {
    pub(crate) mod read;
    pub(crate) mod write;
}
pub mod realtime;
pub(crate) mod reconnection;
pub mod types;
pub mod ws_client;

pub use bus::{EventBus, Handler, Subscription};
pub use correlator::{CommandCorrelator, PendingReply, reply_for, request_id};
pub use dialer::{Dialer, WebSocketDialer};
pub use error::{CommandError, ConnectionError, WsError};
pub use loopback::LoopbackLink;
pub use manager::ConnectionManager;
pub use pawlink_protocol::ConnectionState;
pub use realtime::Realtime;
pub use types::{ReconnectConfig, SessionConfig};
pub use ws_client::{DisconnectReason, SessionHandlers, WsClient};
