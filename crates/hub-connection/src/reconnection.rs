//! Session lifecycle shared by the manager and its reconnect loop.
//!
//! Contains the shared [`LinkContext`], the single-flight connect slot,
//! session callback wiring, and the reconnect loop.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pawlink_protocol::{ConnectionState, ServerEvent};

use crate::bus::EventBus;
use crate::dialer::Dialer;
use crate::error::ConnectionError;
use crate::types::ReconnectConfig;
use crate::ws_client::{DisconnectReason, SessionHandlers, WsClient};

/// A connect attempt that every concurrent caller awaits.
pub(crate) type ConnectAttempt = Shared<BoxFuture<'static, Result<(), ConnectionError>>>;

/// Shared state passed to the free functions below so that session
/// callbacks can outlive any borrow of the manager.
#[derive(Clone)]
pub(crate) struct LinkContext {
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) bus: EventBus,
    pub(crate) client: Arc<Mutex<Option<WsClient>>>,
    pub(crate) in_flight: Arc<std::sync::Mutex<Option<ConnectAttempt>>>,
    pub(crate) state_tx: Arc<watch::Sender<ConnectionState>>,
    /// Cancel token for the active reconnect loop, tagged with its id.
    pub(crate) reconnect_cancel: Arc<std::sync::Mutex<Option<(u64, CancellationToken)>>>,
    /// Set when the user explicitly disconnects.
    pub(crate) manual_disconnect: Arc<AtomicBool>,
    pub(crate) disposed: CancellationToken,
    /// Bumped for every dial and every explicit teardown. Callbacks from a
    /// session whose generation is no longer current are ignored.
    pub(crate) generation: Arc<AtomicU64>,
    pub(crate) reconnect_config: ReconnectConfig,
}

fn lock_slot<T>(m: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cancels the active reconnect loop, if any.
pub(crate) fn cancel_reconnect(
    reconnect_cancel: &std::sync::Mutex<Option<(u64, CancellationToken)>>,
) {
    if let Some((_, token)) = lock_slot(reconnect_cancel).take() {
        token.cancel();
    }
}

impl LinkContext {
    pub(crate) fn new(dialer: Arc<dyn Dialer>, reconnect_config: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            dialer,
            bus: EventBus::new(),
            client: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(std::sync::Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            reconnect_cancel: Arc::new(std::sync::Mutex::new(None)),
            manual_disconnect: Arc::new(AtomicBool::new(false)),
            disposed: CancellationToken::new(),
            generation: Arc::new(AtomicU64::new(0)),
            reconnect_config,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Publishes a state change on the watch channel and as a
    /// `connection_state` event.
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "connection state changed");
            self.bus.dispatch(&ServerEvent::ConnectionState(state));
        }
    }

    /// Returns immediately when a session is up, otherwise joins the
    /// in-flight attempt or starts one.
    pub(crate) async fn connect_shared(&self) -> Result<(), ConnectionError> {
        if self.disposed.is_cancelled() {
            return Err(ConnectionError::Disposed);
        }
        let attempt = {
            let mut slot = lock_slot(&self.in_flight);
            if self.state() == ConnectionState::Connected {
                return Ok(());
            }
            match slot.as_ref() {
                Some(attempt) => {
                    debug!("joining in-flight connect attempt");
                    attempt.clone()
                }
                None => {
                    let attempt = self.clone().establish().boxed().shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    async fn establish(self) -> Result<(), ConnectionError> {
        let result = self.open_session().await;
        // State is already final here, so a caller that finds the slot
        // empty also sees `Connected` (or retries after a failure).
        lock_slot(&self.in_flight).take();
        result
    }

    async fn open_session(&self) -> Result<(), ConnectionError> {
        let reconnecting = matches!(self.state(), ConnectionState::Reconnecting { .. });
        if !reconnecting {
            self.set_state(ConnectionState::Connecting);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handlers = self.session_handlers(generation);
        let dialed = tokio::select! {
            r = self.dialer.dial(handlers) => r,
            _ = self.disposed.cancelled() => return Err(ConnectionError::Disposed),
        };

        let client = match dialed {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "hub relay connection failed");
                if !reconnecting {
                    self.set_state(ConnectionState::Disconnected);
                }
                return Err(e.into());
            }
        };

        let aborted = if self.disposed.is_cancelled() {
            Some(ConnectionError::Disposed)
        } else if self.manual_disconnect.load(Ordering::Relaxed) {
            Some(ConnectionError::NotConnected)
        } else {
            None
        };
        if let Some(e) = aborted {
            debug!(generation, "session opened after teardown, closing it");
            client.close().await;
            if !reconnecting {
                self.set_state(ConnectionState::Disconnected);
            }
            return Err(e);
        }

        let previous = self.client.lock().await.replace(client);
        if let Some(previous) = previous {
            previous.close().await;
        }
        self.set_state(ConnectionState::Connected);
        info!(generation, "hub relay session established");
        Ok(())
    }

    fn session_handlers(&self, generation: u64) -> SessionHandlers {
        let bus = self.bus.clone();
        let ctx = self.clone();
        SessionHandlers {
            on_event: Box::new(move |event| {
                bus.dispatch(&event);
            }),
            on_disconnect: Box::new(move |reason| ctx.handle_disconnect(generation, reason)),
        }
    }

    /// Called from a session's read pump when it stops.
    fn handle_disconnect(&self, generation: u64, reason: DisconnectReason) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "superseded session closed");
            return;
        }

        let ctx = self.clone();
        tokio::spawn(async move {
            let mut client = ctx.client.lock().await;
            if ctx.generation.load(Ordering::SeqCst) == generation {
                client.take();
            }
        });

        let no_reconnect = reason == DisconnectReason::Closed
            || self.manual_disconnect.load(Ordering::Relaxed)
            || self.disposed.is_cancelled();
        if no_reconnect {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        warn!(generation, "hub relay session lost");
        self.set_state(ConnectionState::Reconnecting { attempt: 1 });

        let cancel = CancellationToken::new();
        cancel_reconnect(&self.reconnect_cancel);
        *lock_slot(&self.reconnect_cancel) = Some((generation, cancel.clone()));
        tokio::spawn(reconnect_loop(generation, self.clone(), cancel));
    }
}

/// Reconnection loop with exponential backoff.
///
/// Returns a boxed future to break the recursive type cycle with
/// `session_handlers` (whose disconnect callback spawns this function).
pub(crate) fn reconnect_loop(
    loop_id: u64,
    ctx: LinkContext,
    cancel: CancellationToken,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let max_attempts = ctx.reconnect_config.max_attempts;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if attempt > max_attempts {
                info!(max_attempts, "giving up on hub relay");
                ctx.set_state(ConnectionState::Disconnected);
                break;
            }

            let delay = ctx.reconnect_config.delay_for_attempt(attempt);
            let delay_secs = delay.as_secs_f64();
            ctx.set_state(ConnectionState::Reconnecting { attempt });
            info!(
                attempt,
                delay_secs = format_args!("{delay_secs:.1}"),
                "reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if cancel.is_cancelled() {
                return;
            }

            match ctx.connect_shared().await {
                Ok(()) => {
                    info!(attempt, "reconnected successfully");
                    break;
                }
                Err(ConnectionError::Disposed) => return,
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }

            if cancel.is_cancelled() {
                return;
            }
        }

        let mut guard = lock_slot(&ctx.reconnect_cancel);
        if guard.as_ref().is_some_and(|(id, _)| *id == loop_id) {
            *guard = None;
        }
    })
}
