//! The process-wide hub/device store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pawlink_api::DeviceApi;
use pawlink_hub_connection::{Handler, Realtime, Subscription};
use pawlink_protocol::{ConnectionState, Device, EventKind, Hub, LinkStatus, ServerEvent};

use crate::error::StoreError;
use crate::state::StoreState;
use crate::status::{self, OFFLINE_THRESHOLD};
use crate::view::HubView;

/// Store tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Age of `lastSeenAt` beyond which a device is shown offline.
    pub offline_threshold: Duration,
    /// Minimum spacing between non-forced polls.
    pub poll_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            offline_threshold: OFFLINE_THRESHOLD,
            poll_interval: Duration::from_secs(45),
        }
    }
}

/// Result of [`HubStore::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The previous poll was too recent.
    Skipped { since_last: Duration },
    /// Hubs were re-fetched. Hubs whose device fetch failed keep their
    /// previous devices and are listed here.
    Refreshed { hubs: usize, failed_hubs: Vec<String> },
}

const SUBSCRIBED_KINDS: [EventKind; 6] = [
    EventKind::DeviceStatusUpdated,
    EventKind::DeviceDisconnected,
    EventKind::DeviceDataDeleted,
    EventKind::ConnectedDevices,
    EventKind::HubStatus,
    EventKind::ConnectionState,
];

struct Inner {
    api: Arc<dyn DeviceApi>,
    link: Arc<dyn Realtime>,
    config: StoreConfig,
    state: Mutex<StoreState>,
    changes: watch::Sender<u64>,
    subscriptions: Mutex<Vec<Subscription>>,
    loaded: AtomicBool,
    disposed: AtomicBool,
    last_poll: Mutex<Option<Instant>>,
}

impl Inner {
    fn notify(&self) {
        self.changes.send_modify(|tick| *tick += 1);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hubs, devices and their live status, reconciled from REST and realtime
/// events. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HubStore {
    inner: Arc<Inner>,
}

impl HubStore {
    pub fn new(api: Arc<dyn DeviceApi>, link: Arc<dyn Realtime>, config: StoreConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                api,
                link,
                config,
                state: Mutex::new(StoreState::default()),
                changes,
                subscriptions: Mutex::new(Vec::new()),
                loaded: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                last_poll: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.inner.state)
    }

    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        Ok(())
    }

    /// Registers the event subscriptions and loads hubs and their devices.
    ///
    /// Subscriptions are registered once. Once a load has succeeded, later
    /// calls return immediately.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.ensure_live()?;
        {
            let mut subs = lock(&self.inner.subscriptions);
            if subs.is_empty() {
                let weak = Arc::downgrade(&self.inner);
                for kind in SUBSCRIBED_KINDS {
                    subs.push(self.inner.link.subscribe(kind, event_handler(weak.clone())));
                }
                debug!(count = subs.len(), "store subscriptions registered");
            }
        }
        if self.inner.loaded.load(Ordering::SeqCst) {
            return Ok(());
        }

        let failed = self.refresh_all().await?;
        self.inner.loaded.store(true, Ordering::SeqCst);
        info!(
            hubs = self.state().hub_addresses().len(),
            failed_hubs = failed.len(),
            "hub store initialized"
        );
        Ok(())
    }

    /// Removes every subscription and cancels suppression timers. Later
    /// refreshes fail with [`StoreError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subs = std::mem::take(&mut *lock(&self.inner.subscriptions));
        for sub in subs {
            sub.unsubscribe();
        }
        self.state().clear_suppressions();
        debug!("hub store disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Re-fetches the hub list. On failure the cached list is kept.
    pub async fn refresh_hubs(&self) -> Result<(), StoreError> {
        self.ensure_live()?;
        let hubs = self.inner.api.list_hubs().await.inspect_err(|e| {
            warn!(error = %e, "hub refresh failed");
        })?;
        let changed = self.state().replace_hubs(hubs);
        if changed {
            self.inner.notify();
        }
        Ok(())
    }

    /// Re-fetches one hub's devices and merges them field by field.
    pub async fn refresh_devices(&self, hub: &str) -> Result<(), StoreError> {
        self.ensure_live()?;
        let (address, started) = {
            let state = self.state();
            let entry = state
                .hub(hub)
                .ok_or_else(|| StoreError::UnknownHub(hub.to_string()))?;
            (entry.hub.address.clone(), state.revision())
        };

        let devices = self
            .inner
            .api
            .list_devices(&address)
            .await
            .inspect_err(|e| warn!(hub = %address, error = %e, "device refresh failed"))?;
        debug!(hub = %address, count = devices.len(), "devices fetched");

        let merged = self.state().merge_devices(&address, devices, started);
        match merged {
            None => Err(StoreError::UnknownHub(address)),
            Some(changed) => {
                if changed {
                    self.inner.notify();
                }
                Ok(())
            }
        }
    }

    /// Refreshes hubs, then every hub's devices. Returns the hubs whose
    /// device fetch failed.
    async fn refresh_all(&self) -> Result<Vec<String>, StoreError> {
        self.refresh_hubs().await?;
        let mut failed = Vec::new();
        // Collected first: refresh_devices takes the state lock itself.
        let hubs = self.state().hub_addresses();
        for hub in hubs {
            if let Err(e) = self.refresh_devices(&hub).await {
                if e == StoreError::Disposed {
                    return Err(e);
                }
                failed.push(hub);
            }
        }
        Ok(failed)
    }

    /// Polling fallback for when realtime events are missed.
    ///
    /// Skips when the previous poll was less than the poll interval ago,
    /// unless `force` is set.
    pub async fn poll(&self, force: bool) -> Result<PollOutcome, StoreError> {
        self.ensure_live()?;
        let now = Instant::now();
        {
            let mut last = lock(&self.inner.last_poll);
            if !force
                && let Some(prev) = *last
                && now.duration_since(prev) < self.inner.config.poll_interval
            {
                let since_last = now.duration_since(prev);
                debug!(?since_last, "poll skipped");
                return Ok(PollOutcome::Skipped { since_last });
            }
            *last = Some(now);
        }

        let failed_hubs = self.refresh_all().await?;
        let hubs = self.state().hub_addresses().len();
        debug!(hubs, failed = failed_hubs.len(), "poll complete");
        Ok(PollOutcome::Refreshed { hubs, failed_hubs })
    }

    pub fn hubs(&self) -> Vec<Hub> {
        self.state().hubs()
    }

    /// Devices of `hub`, empty when the hub is unknown.
    pub fn devices(&self, hub: &str) -> Vec<Device> {
        self.state().devices(hub).unwrap_or_default()
    }

    pub fn device(&self, address: &str) -> Option<Device> {
        self.state().device(address).cloned()
    }

    pub fn hub_of_device(&self, address: &str) -> Option<String> {
        self.state().hub_of_device(address)
    }

    /// MACs from the hub's latest `CONNECTED_DEVICES` event.
    pub fn get_connected_devices(&self, hub: &str) -> Vec<String> {
        self.state().connected_devices(hub)
    }

    /// Derived hub status; `unknown` for hubs the store does not hold.
    pub fn hub_status(&self, hub: &str) -> LinkStatus {
        self.state()
            .hub_status(hub, Utc::now(), Instant::now(), self.inner.config.offline_threshold)
            .unwrap_or(LinkStatus::Unknown)
    }

    /// Derived display status of a device.
    pub fn device_status(&self, address: &str) -> Option<LinkStatus> {
        self.state()
            .device(address)
            .map(|d| status::device_status(d, Utc::now(), self.inner.config.offline_threshold))
    }

    /// Ignores status downgrades for `hub` for `duration`; the latest one is
    /// applied when the window closes. Re-arming replaces the expiry.
    ///
    /// Fails with [`StoreError::NoRuntime`] outside a tokio runtime.
    pub fn suppress_hub(&self, hub: &str, duration: Duration) -> Result<(), StoreError> {
        self.ensure_live()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| StoreError::NoRuntime("suppression"))?;
        let until = Instant::now() + duration;
        {
            let mut state = self.state();
            let id = state
                .arm_suppression(hub, until)
                .ok_or_else(|| StoreError::UnknownHub(hub.to_string()))?;

            let weak = Arc::downgrade(&self.inner);
            let hub_key = hub.to_string();
            let timer = runtime.spawn(async move {
                tokio::time::sleep_until(until).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let expired = lock(&inner.state).expire_suppression(&hub_key, id);
                if expired {
                    debug!(hub = %hub_key, "suppression window closed");
                    inner.notify();
                }
            });
            state.attach_timer(hub, id, timer);
        }
        debug!(hub, ?duration, "hub status suppressed");
        self.inner.notify();
        Ok(())
    }

    pub fn is_suppressed(&self, hub: &str) -> bool {
        self.state()
            .hub(hub)
            .is_some_and(|e| e.is_suppressed(Instant::now()))
    }

    /// A consistent view of every hub as of now.
    pub fn snapshot(&self) -> Vec<HubView> {
        self.state()
            .views(Utc::now(), Instant::now(), self.inner.config.offline_threshold)
    }

    /// Ticks on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Applies one realtime event. Called by the store's own subscriptions.
    pub fn apply_event(&self, event: &ServerEvent) {
        if self.is_disposed() {
            return;
        }
        let changed = match event {
            ServerEvent::DeviceStatusUpdated(update) => {
                self.state().apply_status_update(update, Utc::now())
            }
            ServerEvent::DeviceDisconnected(e) => {
                debug!(device = %e.device_mac, "device disconnected");
                self.state().apply_disconnected(&e.device_mac, Utc::now())
            }
            ServerEvent::DeviceDataDeleted(e) => {
                let targets = {
                    let state = self.state();
                    let by_hub = e
                        .hub_address
                        .as_deref()
                        .and_then(|h| state.hub(h))
                        .map(|entry| entry.hub.address.clone());
                    let by_device = || {
                        e.device_address
                            .as_deref()
                            .and_then(|d| state.hub_of_device(d))
                    };
                    match by_hub.or_else(by_device) {
                        Some(hub) => vec![hub],
                        None => state.hub_addresses(),
                    }
                };
                self.spawn_refresh(targets);
                false
            }
            ServerEvent::ConnectedDevices(e) => {
                let known = self.state().replace_snapshot(
                    &e.hub_address,
                    e.connected_devices.clone(),
                    Utc::now(),
                );
                if known {
                    debug!(hub = %e.hub_address, count = e.connected_devices.len(), "connected devices snapshot");
                    self.spawn_refresh(vec![e.hub_address.clone()]);
                }
                known
            }
            ServerEvent::HubStatus(e) => {
                self.state()
                    .apply_hub_status(&e.hub_address, e.status, Instant::now())
            }
            ServerEvent::ConnectionState(ConnectionState::Disconnected) => {
                debug!("relay link lost, hub statuses unknown");
                self.state().mark_all_unknown()
            }
            ServerEvent::ConnectionState(_)
            | ServerEvent::CommandResult(_)
            | ServerEvent::Other { .. } => false,
        };
        if changed {
            self.inner.notify();
        }
    }

    /// Refreshes the given hubs' devices in the background.
    fn spawn_refresh(&self, hubs: Vec<String>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(?hubs, "no runtime for background device refresh");
            return;
        };
        let store = self.clone();
        runtime.spawn(async move {
            for hub in hubs {
                if let Err(e) = store.refresh_devices(&hub).await {
                    debug!(hub = %hub, error = %e, "background device refresh failed");
                }
            }
        });
    }
}

fn event_handler(weak: Weak<Inner>) -> Handler {
    Arc::new(move |event| {
        if let Some(inner) = weak.upgrade() {
            HubStore { inner }.apply_event(event);
        }
    })
}
