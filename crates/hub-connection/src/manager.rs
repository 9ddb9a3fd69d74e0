//! Connection manager owning the single relay session.
//!
//! Collapses concurrent connect calls onto one in-flight attempt, routes
//! inbound events to subscribers, and reconnects automatically with
//! exponential backoff when an established session drops.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::watch;
use tracing::{debug, info};

use pawlink_protocol::{CommandRequest, ConnectionState, EventKind, Frame, ServerEvent};

use crate::bus::{EventBus, Handler, Subscription};
use crate::dialer::{Dialer, WebSocketDialer};
use crate::error::ConnectionError;
use crate::realtime::{LinkFuture, Realtime};
use crate::reconnection::{LinkContext, cancel_reconnect};
use crate::types::{ReconnectConfig, SessionConfig};

/// Owner of the process-wide relay session.
pub struct ConnectionManager {
    pub(crate) ctx: LinkContext,
}

impl ConnectionManager {
    /// Creates a manager that opens sessions through `dialer`.
    pub fn new(dialer: Arc<dyn Dialer>, reconnect_config: ReconnectConfig) -> Self {
        Self {
            ctx: LinkContext::new(dialer, reconnect_config),
        }
    }

    /// Creates a manager for a real WebSocket relay.
    pub fn websocket(session: SessionConfig, reconnect_config: ReconnectConfig) -> Self {
        Self::new(Arc::new(WebSocketDialer::new(session)), reconnect_config)
    }

    /// Ensures a session is established.
    ///
    /// Resolves immediately when already connected. Concurrent callers share
    /// one attempt and all receive its outcome. A failed attempt is not
    /// retried here; callers decide whether to try again.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        if self.ctx.disposed.is_cancelled() {
            return Err(ConnectionError::Disposed);
        }
        self.ctx.manual_disconnect.store(false, Ordering::Relaxed);
        self.ctx.connect_shared().await?;
        cancel_reconnect(&self.ctx.reconnect_cancel);
        Ok(())
    }

    /// Closes the session without scheduling a reconnect.
    pub async fn disconnect(&self) {
        self.ctx.manual_disconnect.store(true, Ordering::Relaxed);
        cancel_reconnect(&self.ctx.reconnect_cancel);
        // Invalidate callbacks from the session being torn down.
        self.ctx.generation.fetch_add(1, Ordering::SeqCst);

        let client = self.ctx.client.lock().await.take();
        if let Some(client) = client {
            info!("closing hub relay session");
            client.close().await;
        }
        self.ctx.set_state(ConnectionState::Disconnected);
    }

    /// Permanently shuts the manager down. Later connects fail with
    /// [`ConnectionError::Disposed`].
    pub async fn dispose(&self) {
        if self.ctx.disposed.is_cancelled() {
            return;
        }
        debug!("disposing connection manager");
        self.ctx.disposed.cancel();
        self.disconnect().await;
    }

    pub fn is_disposed(&self) -> bool {
        self.ctx.disposed.is_cancelled()
    }

    /// Registers `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.ctx.bus.on(kind, handler)
    }

    /// The bus that inbound events are dispatched on.
    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    /// Sends a control request on the current session.
    ///
    /// Does not connect; fails with [`ConnectionError::NotConnected`] when
    /// no healthy session exists.
    pub async fn control_request(&self, req: &CommandRequest) -> Result<(), ConnectionError> {
        let frame = Frame::control_request(uuid::Uuid::new_v4().to_string(), req)
            .map_err(|e| ConnectionError::Encode(e.to_string()))?;

        let guard = self.ctx.client.lock().await;
        let client = guard
            .as_ref()
            .filter(|c| !c.is_closed())
            .ok_or(ConnectionError::NotConnected)?;
        client.send(&frame).await?;
        debug!(
            request_id = %req.request_id,
            action = req.command.action(),
            hub = %req.hub_id,
            device = %req.device_id,
            "control request sent"
        );
        Ok(())
    }

    /// Current session state.
    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state_tx.subscribe()
    }
}

impl Realtime for ConnectionManager {
    fn connect(&self) -> LinkFuture<'_> {
        Box::pin(ConnectionManager::connect(self))
    }

    fn control_request<'a>(&'a self, req: &'a CommandRequest) -> LinkFuture<'a> {
        Box::pin(ConnectionManager::control_request(self, req))
    }

    fn subscribe(&self, kind: EventKind, handler: Handler) -> Subscription {
        self.ctx.bus.subscribe(kind, handler)
    }
}
