//! Session factory seam between the connection manager and the socket.

use std::future::Future;
use std::pin::Pin;

use crate::error::WsError;
use crate::types::SessionConfig;
use crate::ws_client::{SessionHandlers, WsClient};

/// Boxed future returned by [`Dialer::dial`].
pub type DialFuture<'a> = Pin<Box<dyn Future<Output = Result<WsClient, WsError>> + Send + 'a>>;

/// Opens one relay session with the given handlers already attached.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, handlers: SessionHandlers) -> DialFuture<'_>;
}

/// Dials the relay over a real WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    config: SessionConfig,
}

impl WebSocketDialer {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

impl Dialer for WebSocketDialer {
    fn dial(&self, handlers: SessionHandlers) -> DialFuture<'_> {
        Box::pin(WsClient::connect(&self.config, handlers))
    }
}
