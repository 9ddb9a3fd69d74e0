//! In-process [`Realtime`] implementation.
//!
//! Records every control request instead of sending it and lets the owner
//! inject server events directly. Used to drive the store and workflows
//! without a relay.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use pawlink_protocol::{CommandRequest, EventKind, ServerEvent};

use crate::bus::{EventBus, Handler, Subscription};
use crate::error::ConnectionError;
use crate::realtime::{LinkFuture, Realtime};

type Responder = Box<dyn Fn(&CommandRequest) -> Vec<ServerEvent> + Send + Sync>;

/// A relay stand-in that lives entirely in memory.
pub struct LoopbackLink {
    bus: EventBus,
    sent: Mutex<Vec<CommandRequest>>,
    online: AtomicBool,
    connect_calls: AtomicUsize,
    refuse_connects: AtomicUsize,
    responder: Mutex<Option<Responder>>,
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackLink {
    /// A link that is already connected.
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            sent: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            connect_calls: AtomicUsize::new(0),
            refuse_connects: AtomicUsize::new(0),
            responder: Mutex::new(None),
        }
    }

    /// A link with no session until [`Realtime::connect`] is called.
    pub fn offline() -> Self {
        let link = Self::new();
        link.online.store(false, Ordering::SeqCst);
        link
    }

    /// Delivers `event` to subscribers. Returns how many handlers ran.
    pub fn emit(&self, event: ServerEvent) -> usize {
        self.bus.dispatch(&event)
    }

    /// Installs a function that produces the events the "relay" answers each
    /// control request with. Replies are dispatched before
    /// `control_request` returns.
    pub fn respond_with<F>(&self, f: F)
    where
        F: Fn(&CommandRequest) -> Vec<ServerEvent> + Send + Sync + 'static,
    {
        *lock(&self.responder) = Some(Box::new(f));
    }

    /// Control requests received so far.
    pub fn sent(&self) -> Vec<CommandRequest> {
        lock(&self.sent).clone()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Makes the next `n` connect calls fail with a transport error.
    pub fn refuse_next_connects(&self, n: usize) {
        self.refuse_connects.store(n, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.bus.handler_count(kind)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Realtime for LoopbackLink {
    fn connect(&self) -> LinkFuture<'_> {
        Box::pin(async move {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .refuse_connects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(ConnectionError::Transport("loopback refused".into()));
            }
            self.online.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn control_request<'a>(&'a self, req: &'a CommandRequest) -> LinkFuture<'a> {
        Box::pin(async move {
            if !self.is_online() {
                return Err(ConnectionError::NotConnected);
            }
            lock(&self.sent).push(req.clone());
            let replies = lock(&self.responder)
                .as_ref()
                .map(|respond| respond(req))
                .unwrap_or_default();
            for reply in &replies {
                self.bus.dispatch(reply);
            }
            Ok(())
        })
    }

    fn subscribe(&self, kind: EventKind, handler: Handler) -> Subscription {
        self.bus.subscribe(kind, handler)
    }
}
