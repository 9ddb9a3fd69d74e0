//! Synchronous store state. All mutation happens under the store lock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use pawlink_protocol::events::DeviceStatusUpdate;
use pawlink_protocol::{Device, Hub, LinkStatus, addresses_match};

use crate::merge::TrackedDevice;
use crate::status;
use crate::view::{ConnectedSnapshot, DeviceView, HubView};

/// An armed suppression window. Dropping it cancels its expiry timer.
pub(crate) struct Suppression {
    pub(crate) id: u64,
    pub(crate) until: Instant,
    /// Latest downgrade received while armed.
    pub(crate) buffered: Option<LinkStatus>,
    pub(crate) timer: Option<JoinHandle<()>>,
}

impl Drop for Suppression {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

pub(crate) struct HubEntry {
    pub(crate) hub: Hub,
    pub(crate) status: LinkStatus,
    pub(crate) devices: Vec<TrackedDevice>,
    pub(crate) snapshot: Option<ConnectedSnapshot>,
    pub(crate) suppression: Option<Suppression>,
}

impl HubEntry {
    fn new(hub: Hub) -> Self {
        Self {
            hub,
            status: LinkStatus::Unknown,
            devices: Vec::new(),
            snapshot: None,
            suppression: None,
        }
    }

    pub(crate) fn is_suppressed(&self, now: Instant) -> bool {
        self.suppression.as_ref().is_some_and(|s| s.until > now)
    }

    fn derived_status(&self, now: DateTime<Utc>, instant: Instant, threshold: Duration) -> LinkStatus {
        status::hub_status(
            self.status,
            self.is_suppressed(instant),
            self.devices.iter().map(|t| &t.device),
            now,
            threshold,
        )
    }
}

#[derive(Default)]
pub(crate) struct StoreState {
    revision: u64,
    hubs: Vec<HubEntry>,
    next_window: u64,
}

impl StoreState {
    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn hub(&self, address: &str) -> Option<&HubEntry> {
        self.hubs.iter().find(|e| addresses_match(&e.hub.address, address))
    }

    fn hub_mut(&mut self, address: &str) -> Option<&mut HubEntry> {
        self.hubs
            .iter_mut()
            .find(|e| addresses_match(&e.hub.address, address))
    }

    pub(crate) fn hubs(&self) -> Vec<Hub> {
        self.hubs.iter().map(|e| e.hub.clone()).collect()
    }

    pub(crate) fn hub_addresses(&self) -> Vec<String> {
        self.hubs.iter().map(|e| e.hub.address.clone()).collect()
    }

    pub(crate) fn devices(&self, hub: &str) -> Option<Vec<Device>> {
        self.hub(hub)
            .map(|e| e.devices.iter().map(|t| t.device.clone()).collect())
    }

    pub(crate) fn device(&self, address: &str) -> Option<&Device> {
        self.hubs
            .iter()
            .flat_map(|e| e.devices.iter())
            .map(|t| &t.device)
            .find(|d| addresses_match(&d.address, address))
    }

    fn device_mut(&mut self, address: &str) -> Option<&mut TrackedDevice> {
        self.hubs
            .iter_mut()
            .flat_map(|e| e.devices.iter_mut())
            .find(|t| addresses_match(&t.device.address, address))
    }

    /// Address of the hub whose device list holds `device`.
    pub(crate) fn hub_of_device(&self, device: &str) -> Option<String> {
        self.hubs
            .iter()
            .find(|e| e.devices.iter().any(|t| addresses_match(&t.device.address, device)))
            .map(|e| e.hub.address.clone())
    }

    /// Diffs the hub list by address. Removed hubs take their devices,
    /// snapshot, status and suppression window with them.
    pub(crate) fn replace_hubs(&mut self, fresh: Vec<Hub>) -> bool {
        let before = self.hub_addresses();
        let mut old = std::mem::take(&mut self.hubs);
        let mut renamed = false;

        for hub in fresh {
            if self.hub(&hub.address).is_some() {
                continue;
            }
            match old.iter().position(|e| addresses_match(&e.hub.address, &hub.address)) {
                Some(i) => {
                    let mut entry = old.remove(i);
                    if entry.hub.name != hub.name {
                        debug!(hub = %hub.address, name = %hub.name, "hub renamed");
                        entry.hub.name = hub.name;
                        renamed = true;
                    }
                    self.hubs.push(entry);
                }
                None => {
                    debug!(hub = %hub.address, "hub added");
                    self.hubs.push(HubEntry::new(hub));
                }
            }
        }
        for gone in &old {
            debug!(hub = %gone.hub.address, "hub removed");
        }

        let changed = renamed || before != self.hub_addresses();
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Merges one hub's REST device list fetched by a request that started
    /// at revision `started`. Devices absent from the list are removed,
    /// unless they entered the store after the request started. Returns
    /// `None` when the hub is not known.
    pub(crate) fn merge_devices(
        &mut self,
        hub: &str,
        fresh: Vec<Device>,
        started: u64,
    ) -> Option<bool> {
        let rev = self.revision + 1;
        let idx = self
            .hubs
            .iter()
            .position(|e| addresses_match(&e.hub.address, hub))?;

        // Placed under another hub after this request started.
        let claimed: Vec<String> = self
            .hubs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .flat_map(|(_, e)| e.devices.iter())
            .filter(|t| t.is_newer_than(started))
            .map(|t| t.device.address.clone())
            .collect();

        let entry = &mut self.hubs[idx];
        let hub_address = entry.hub.address.clone();
        let mut old = std::mem::take(&mut entry.devices);
        let mut changed = false;

        for mut device in fresh {
            if entry
                .devices
                .iter()
                .any(|t| addresses_match(&t.device.address, &device.address))
            {
                continue;
            }
            if claimed.iter().any(|a| addresses_match(a, &device.address)) {
                trace!(hub = %hub_address, device = %device.address, "device claimed by a newer list");
                continue;
            }
            if device.hub_address.is_empty() {
                device.hub_address = hub_address.clone();
            }
            match old
                .iter()
                .position(|t| addresses_match(&t.device.address, &device.address))
            {
                Some(i) => {
                    let mut tracked = old.remove(i);
                    changed |= tracked.merge_rest(device, started, rev);
                    entry.devices.push(tracked);
                }
                None => {
                    trace!(hub = %hub_address, device = %device.address, "device added");
                    entry.devices.push(TrackedDevice::new(device, rev));
                    changed = true;
                }
            }
        }

        let (kept, removed): (Vec<_>, Vec<_>) =
            old.into_iter().partition(|t| t.is_newer_than(started));
        entry.devices.extend(kept);
        if !removed.is_empty() {
            debug!(hub = %hub_address, removed = removed.len(), "devices removed");
            changed = true;
        }

        // A device listed here no longer belongs to any other hub.
        let listed: Vec<String> = entry.devices.iter().map(|t| t.device.address.clone()).collect();
        for other in self
            .hubs
            .iter_mut()
            .filter(|e| !addresses_match(&e.hub.address, &hub_address))
        {
            let count = other.devices.len();
            other.devices.retain(|t| {
                t.is_newer_than(started)
                    || !listed.iter().any(|a| addresses_match(a, &t.device.address))
            });
            changed |= other.devices.len() != count;
        }

        if changed {
            self.revision = rev;
        }
        Some(changed)
    }

    /// Applies a status push. Unknown addresses are ignored.
    pub(crate) fn apply_status_update(&mut self, update: &DeviceStatusUpdate, now: DateTime<Utc>) -> bool {
        let rev = self.revision + 1;
        let Some(tracked) = self.device_mut(&update.device_address) else {
            trace!(device = %update.device_address, "status update for unknown device ignored");
            return false;
        };
        let changed = tracked.apply_update(update, now, rev);
        // Stamps were written even if no value changed.
        self.revision = rev;
        changed
    }

    pub(crate) fn apply_disconnected(&mut self, device: &str, now: DateTime<Utc>) -> bool {
        let rev = self.revision + 1;
        let Some(tracked) = self.device_mut(device) else {
            trace!(device, "disconnect for unknown device ignored");
            return false;
        };
        tracked.mark_disconnected(now, rev);
        self.revision = rev;
        true
    }

    pub(crate) fn replace_snapshot(&mut self, hub: &str, addresses: Vec<String>, at: DateTime<Utc>) -> bool {
        let Some(entry) = self.hub_mut(hub) else {
            trace!(hub, "snapshot for unknown hub ignored");
            return false;
        };
        entry.snapshot = Some(ConnectedSnapshot {
            addresses,
            received_at: at,
        });
        self.revision += 1;
        true
    }

    pub(crate) fn connected_devices(&self, hub: &str) -> Vec<String> {
        self.hub(hub)
            .and_then(|e| e.snapshot.as_ref())
            .map(|s| s.addresses.clone())
            .unwrap_or_default()
    }

    /// Applies a `hub_status` push, buffering downgrades while suppressed.
    pub(crate) fn apply_hub_status(&mut self, hub: &str, status: LinkStatus, now: Instant) -> bool {
        let Some(entry) = self.hub_mut(hub) else {
            trace!(hub, "status for unknown hub ignored");
            return false;
        };
        // Close a window past its end even if its timer has not fired yet.
        // The buffered downgrade is older than this status and is dropped.
        if entry.suppression.as_ref().is_some_and(|w| w.until <= now) {
            entry.suppression = None;
        }
        if let Some(window) = entry.suppression.as_mut() {
            if entry.status.is_downgrade_to(status) {
                debug!(hub, %status, "hub downgrade buffered while suppressed");
                window.buffered = Some(status);
                return false;
            }
            window.buffered = None;
        }
        if entry.status == status {
            return false;
        }
        entry.status = status;
        self.revision += 1;
        true
    }

    /// Every hub becomes `unknown`.
    pub(crate) fn mark_all_unknown(&mut self) -> bool {
        let mut changed = false;
        for entry in &mut self.hubs {
            if entry.status != LinkStatus::Unknown {
                entry.status = LinkStatus::Unknown;
                changed = true;
            }
        }
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Arms (or re-arms) the hub's window. A downgrade buffered by the
    /// previous window carries over. Returns the new window id.
    pub(crate) fn arm_suppression(&mut self, hub: &str, until: Instant) -> Option<u64> {
        self.next_window += 1;
        let id = self.next_window;
        let entry = self.hub_mut(hub)?;
        let buffered = entry.suppression.take().and_then(|mut w| w.buffered.take());
        entry.suppression = Some(Suppression {
            id,
            until,
            buffered,
            timer: None,
        });
        self.revision += 1;
        Some(id)
    }

    pub(crate) fn attach_timer(&mut self, hub: &str, id: u64, timer: JoinHandle<()>) {
        match self.hub_mut(hub).and_then(|e| e.suppression.as_mut()) {
            Some(window) if window.id == id => window.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Ends window `id` and applies its buffered downgrade.
    pub(crate) fn expire_suppression(&mut self, hub: &str, id: u64) -> bool {
        let Some(entry) = self.hub_mut(hub) else {
            return false;
        };
        if entry.suppression.as_ref().is_none_or(|w| w.id != id) {
            return false;
        }
        let buffered = entry.suppression.take().and_then(|mut w| {
            // Called from the timer itself; nothing to abort.
            w.timer.take();
            w.buffered.take()
        });
        if let Some(status) = buffered {
            debug!(hub, %status, "applying buffered hub status");
            entry.status = status;
        }
        self.revision += 1;
        true
    }

    pub(crate) fn clear_suppressions(&mut self) {
        for entry in &mut self.hubs {
            entry.suppression = None;
        }
    }

    pub(crate) fn hub_status(
        &self,
        hub: &str,
        now: DateTime<Utc>,
        instant: Instant,
        threshold: Duration,
    ) -> Option<LinkStatus> {
        self.hub(hub).map(|e| e.derived_status(now, instant, threshold))
    }

    pub(crate) fn views(&self, now: DateTime<Utc>, instant: Instant, threshold: Duration) -> Vec<HubView> {
        self.hubs
            .iter()
            .map(|e| HubView {
                hub: e.hub.clone(),
                status: e.derived_status(now, instant, threshold),
                suppressed: e.is_suppressed(instant),
                devices: e
                    .devices
                    .iter()
                    .map(|t| DeviceView {
                        device: t.device.clone(),
                        display_status: status::device_status(&t.device, now, threshold),
                    })
                    .collect(),
                connected: e.snapshot.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::OFFLINE_THRESHOLD;

    fn hub(address: &str, name: &str) -> Hub {
        Hub {
            address: address.into(),
            name: name.into(),
        }
    }

    fn state_with(hubs: &[&str]) -> StoreState {
        let mut state = StoreState::default();
        state.replace_hubs(hubs.iter().map(|a| hub(a, a)).collect());
        state
    }

    #[test]
    fn replace_hubs_diffs_by_address() {
        let mut state = state_with(&["HUB-1", "HUB-2"]);
        let started = state.revision();
        state.merge_devices("HUB-2", vec![Device::new("AA:BB", "x", "HUB-2")], started);

        assert!(state.replace_hubs(vec![hub("hub-1", "Kitchen"), hub("HUB-3", "HUB-3")]));
        assert_eq!(state.hub("HUB-1").unwrap().hub.name, "Kitchen");
        assert!(state.hub("HUB-2").is_none());
        assert!(state.device("AA:BB").is_none(), "devices go with their hub");
        assert!(state.hub("HUB-3").is_some());

        let rev = state.revision();
        assert!(!state.replace_hubs(vec![hub("HUB-1", "Kitchen"), hub("HUB-3", "HUB-3")]));
        assert_eq!(state.revision(), rev);
    }

    #[test]
    fn merge_removes_devices_missing_from_rest() {
        let mut state = state_with(&["HUB-1"]);
        let r = state.revision();
        state.merge_devices(
            "HUB-1",
            vec![Device::new("AA", "a", "HUB-1"), Device::new("BB", "b", "HUB-1")],
            r,
        );
        let r = state.revision();
        assert_eq!(
            state.merge_devices("HUB-1", vec![Device::new("bb", "b", "")], r),
            Some(true)
        );
        let devices = state.devices("HUB-1").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, "BB", "existing identity kept");
        assert_eq!(state.merge_devices("HUB-9", vec![], r), None);
    }

    #[test]
    fn device_moving_hubs_is_not_duplicated() {
        let mut state = state_with(&["HUB-1", "HUB-2"]);
        let r = state.revision();
        state.merge_devices("HUB-1", vec![Device::new("AA", "a", "HUB-1")], r);
        let r = state.revision();
        state.merge_devices("HUB-2", vec![Device::new("AA", "a", "HUB-2")], r);

        assert!(state.devices("HUB-1").unwrap().is_empty());
        assert_eq!(state.hub_of_device("aa").as_deref(), Some("HUB-2"));
    }

    #[test]
    fn older_list_keeps_devices_added_after_it_started() {
        let mut state = state_with(&["HUB-1", "HUB-2"]);
        let started = state.revision();
        state.merge_devices("HUB-1", vec![Device::new("AA:BB:CC:11", "Tag", "HUB-1")], started);

        assert_eq!(state.merge_devices("HUB-1", vec![], started), Some(false));
        assert_eq!(state.hub_of_device("AA:BB:CC:11").as_deref(), Some("HUB-1"));

        state.merge_devices("HUB-2", vec![Device::new("AA:BB:CC:11", "Tag", "HUB-2")], started);
        assert_eq!(state.hub_of_device("AA:BB:CC:11").as_deref(), Some("HUB-1"));
        assert!(state.devices("HUB-2").unwrap().is_empty());

        let r = state.revision();
        assert_eq!(state.merge_devices("HUB-1", vec![], r), Some(true));
        assert!(state.device("AA:BB:CC:11").is_none());
    }

    #[test]
    fn unknown_device_update_creates_nothing() {
        let mut state = state_with(&["HUB-1"]);
        let update = DeviceStatusUpdate {
            device_address: "ZZ:ZZ".into(),
            status: Some(LinkStatus::Online),
            last_seen_at: None,
            battery: None,
        };
        assert!(!state.apply_status_update(&update, Utc::now()));
        assert!(state.device("ZZ:ZZ").is_none());
        assert!(!state.apply_disconnected("ZZ:ZZ", Utc::now()));
    }

    #[test]
    fn snapshots_are_per_hub() {
        let mut state = state_with(&["h1", "h2"]);
        state.replace_snapshot("h2", vec!["CC".into()], Utc::now());
        state.replace_snapshot("h1", vec!["AA".into(), "BB".into()], Utc::now());
        state.replace_snapshot("h1", vec!["DD".into()], Utc::now());

        assert_eq!(state.connected_devices("h1"), vec!["DD".to_string()]);
        assert_eq!(state.connected_devices("h2"), vec!["CC".to_string()]);
        assert!(state.connected_devices("h3").is_empty());
    }

    #[test]
    fn suppression_buffers_latest_downgrade() {
        let mut state = state_with(&["HUB-1"]);
        let now = Instant::now();
        state.apply_hub_status("HUB-1", LinkStatus::Online, now);

        let id = state
            .arm_suppression("HUB-1", now + Duration::from_secs(30))
            .unwrap();
        assert!(!state.apply_hub_status("HUB-1", LinkStatus::Offline, now));
        assert!(!state.apply_hub_status("HUB-1", LinkStatus::Unknown, now));
        assert_eq!(state.hub("HUB-1").unwrap().status, LinkStatus::Online);

        assert!(state.expire_suppression("HUB-1", id));
        assert_eq!(state.hub("HUB-1").unwrap().status, LinkStatus::Unknown);
        assert!(!state.hub("HUB-1").unwrap().is_suppressed(now));
    }

    #[test]
    fn upgrade_during_suppression_clears_buffer() {
        let mut state = state_with(&["HUB-1"]);
        let now = Instant::now();
        state.apply_hub_status("HUB-1", LinkStatus::Online, now);
        let id = state
            .arm_suppression("HUB-1", now + Duration::from_secs(30))
            .unwrap();
        state.apply_hub_status("HUB-1", LinkStatus::Offline, now);
        state.apply_hub_status("HUB-1", LinkStatus::Online, now);

        state.expire_suppression("HUB-1", id);
        assert_eq!(state.hub("HUB-1").unwrap().status, LinkStatus::Online);
    }

    #[test]
    fn status_after_window_end_drops_buffer() {
        let mut state = state_with(&["HUB-1"]);
        let now = Instant::now();
        state.apply_hub_status("HUB-1", LinkStatus::Online, now);
        let id = state
            .arm_suppression("HUB-1", now + Duration::from_secs(10))
            .unwrap();
        state.apply_hub_status("HUB-1", LinkStatus::Offline, now);

        state.apply_hub_status("HUB-1", LinkStatus::Online, now + Duration::from_secs(10));

        assert!(state.hub("HUB-1").unwrap().suppression.is_none());
        assert!(!state.expire_suppression("HUB-1", id), "late timer finds no window");
        assert_eq!(state.hub("HUB-1").unwrap().status, LinkStatus::Online);
    }

    #[test]
    fn rearming_replaces_window_and_keeps_buffer() {
        let mut state = state_with(&["HUB-1"]);
        let now = Instant::now();
        state.apply_hub_status("HUB-1", LinkStatus::Online, now);
        let first = state
            .arm_suppression("HUB-1", now + Duration::from_secs(5))
            .unwrap();
        state.apply_hub_status("HUB-1", LinkStatus::Offline, now);
        let second = state
            .arm_suppression("HUB-1", now + Duration::from_secs(60))
            .unwrap();

        assert!(!state.expire_suppression("HUB-1", first), "stale window id");
        assert_eq!(state.hub("HUB-1").unwrap().status, LinkStatus::Online);
        assert!(state.expire_suppression("HUB-1", second));
        assert_eq!(state.hub("HUB-1").unwrap().status, LinkStatus::Offline);
    }

    #[test]
    fn stale_hub_is_offline_unless_suppressed() {
        let mut state = state_with(&["HUB-1"]);
        let now = Utc::now();
        let instant = Instant::now();
        state.apply_hub_status("HUB-1", LinkStatus::Online, instant);
        let mut d = Device::new("AA", "a", "HUB-1");
        d.last_seen_at = Some(now - chrono::TimeDelta::minutes(5));
        let r = state.revision();
        state.merge_devices("HUB-1", vec![d], r);

        assert_eq!(
            state.hub_status("HUB-1", now, instant, OFFLINE_THRESHOLD),
            Some(LinkStatus::Offline)
        );
        state.arm_suppression("HUB-1", instant + Duration::from_secs(10));
        assert_eq!(
            state.hub_status("HUB-1", now, instant, OFFLINE_THRESHOLD),
            Some(LinkStatus::Online)
        );
        let views = state.views(now, instant, OFFLINE_THRESHOLD);
        assert!(views[0].suppressed);
        assert_eq!(views[0].devices[0].display_status, LinkStatus::Offline);
    }

    #[test]
    fn link_loss_marks_every_hub_unknown() {
        let mut state = state_with(&["h1", "h2"]);
        let now = Instant::now();
        state.apply_hub_status("h1", LinkStatus::Online, now);
        state.apply_hub_status("h2", LinkStatus::Offline, now);

        assert!(state.mark_all_unknown());
        assert!(state.hubs.iter().all(|e| e.status == LinkStatus::Unknown));
        assert!(!state.mark_all_unknown());
    }
}
