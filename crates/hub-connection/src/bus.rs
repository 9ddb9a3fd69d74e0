//! Named-event fan-out to registered handlers.
//!
//! Handlers are invoked synchronously on the task that dispatches, in
//! registration order. A panicking handler is logged and skipped; it never
//! prevents the remaining handlers from running.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{trace, warn};

use pawlink_protocol::{EventKind, ServerEvent};

/// A registered event handler.
pub type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Routes events to the handlers subscribed to their [`EventKind`].
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`. The handler stays registered until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(handler))
    }

    /// Registers an already-shared handler.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> Subscription {
        let mut reg = lock(&self.registry);
        reg.next_id += 1;
        let id = reg.next_id;
        reg.handlers.entry(kind.clone()).or_default().push((id, handler));
        trace!(event = kind.name(), id, "handler registered");
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
            active: true,
        }
    }

    /// Delivers `event` to every handler of its kind. Returns how many
    /// handlers were invoked.
    ///
    /// Handlers registered during the dispatch first see the next event; a
    /// handler unregistered during the dispatch is not called again.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may (un)subscribe while being called.
        let handlers: Vec<(u64, Handler)> = match lock(&self.registry).handlers.get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for (id, handler) in &handlers {
            if !self.is_registered(&kind, *id) {
                trace!(event = kind.name(), id, "handler unregistered mid-dispatch");
                continue;
            }
            invoked += 1;
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = kind.name(), "event handler panicked");
            }
        }
        invoked
    }

    fn is_registered(&self, kind: &EventKind, id: u64) -> bool {
        lock(&self.registry)
            .handlers
            .get(kind)
            .is_some_and(|list| list.iter().any(|(i, _)| *i == id))
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: &EventKind) -> usize {
        lock(&self.registry).handlers.get(kind).map_or(0, Vec::len)
    }
}

/// Handle for one registered handler.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: EventKind,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Unregisters the handler. Equivalent to dropping the subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut reg = lock(&registry);
        if let Some(list) = reg.handlers.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                reg.handlers.remove(&self.kind);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawlink_protocol::LinkStatus;
    use pawlink_protocol::events::HubStatusUpdate;

    fn hub_status(addr: &str) -> ServerEvent {
        ServerEvent::HubStatus(HubStatusUpdate {
            hub_address: addr.into(),
            status: LinkStatus::Online,
        })
    }

    #[test]
    fn dispatch_reaches_only_matching_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = bus.on(EventKind::HubStatus, move |ev| {
            s.lock().unwrap().push(ev.hub_address().unwrap_or_default().to_string());
        });

        assert_eq!(bus.dispatch(&hub_status("HUB-1")), 1);
        let other = ServerEvent::Other {
            name: "noise".into(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(bus.dispatch(&other), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["HUB-1".to_string()]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(0));
        let _a = bus.on(EventKind::HubStatus, |_| panic!("boom"));
        let h = hits.clone();
        let _b = bus.on(EventKind::HubStatus, move |_| *h.lock().unwrap() += 1);

        assert_eq!(bus.dispatch(&hub_status("HUB-1")), 2);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn drop_and_unsubscribe_remove_handlers() {
        let bus = EventBus::new();
        let a = bus.on(EventKind::HubStatus, |_| {});
        let b = bus.on(EventKind::HubStatus, |_| {});
        assert_eq!(bus.handler_count(&EventKind::HubStatus), 2);

        drop(a);
        assert_eq!(bus.handler_count(&EventKind::HubStatus), 1);
        b.unsubscribe();
        assert_eq!(bus.handler_count(&EventKind::HubStatus), 0);
        assert_eq!(bus.dispatch(&hub_status("HUB-1")), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let sub = bus.on(EventKind::HubStatus, move |_| {
            s.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        assert_eq!(bus.dispatch(&hub_status("HUB-1")), 1);
        assert_eq!(bus.dispatch(&hub_status("HUB-1")), 0);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let o = order.clone();
                bus.on(EventKind::HubStatus, move |_| o.lock().unwrap().push(i))
            })
            .collect();

        assert_eq!(bus.dispatch(&hub_status("HUB-1")), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn handler_dropped_mid_dispatch_is_skipped() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let (h, v) = (hits.clone(), victim.clone());
        let _first = bus.on(EventKind::HubStatus, move |_| {
            h.lock().unwrap().push("first");
            v.lock().unwrap().take();
        });
        let h = hits.clone();
        *victim.lock().unwrap() = Some(bus.on(EventKind::HubStatus, move |_| {
            h.lock().unwrap().push("second");
        }));
        let h = hits.clone();
        let _third = bus.on(EventKind::HubStatus, move |_| h.lock().unwrap().push("third"));

        assert_eq!(bus.dispatch(&hub_status("HUB-1")), 2);
        assert_eq!(*hits.lock().unwrap(), vec!["first", "third"]);
        assert_eq!(bus.handler_count(&EventKind::HubStatus), 2);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.on(EventKind::HubStatus, |_| {});
        drop(bus);
        drop(sub);
    }
}
