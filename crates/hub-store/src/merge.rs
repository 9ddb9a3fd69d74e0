//! Field-level reconciliation of REST snapshots with realtime pushes.
//!
//! Every field remembers the store revision at which it was last written.
//! A REST result carries the revision at which its request started and may
//! only overwrite fields that have not been written since. `last_seen_at`
//! additionally never moves backwards.

use chrono::{DateTime, Utc};

use pawlink_protocol::events::DeviceStatusUpdate;
use pawlink_protocol::{Device, LinkStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FieldStamps {
    pub(crate) name: u64,
    pub(crate) status: u64,
    pub(crate) last_connected_at: u64,
    pub(crate) last_disconnected_at: u64,
    pub(crate) battery: u64,
    pub(crate) connected_pet: u64,
}

impl FieldStamps {
    fn all(rev: u64) -> Self {
        Self {
            name: rev,
            status: rev,
            last_connected_at: rev,
            last_disconnected_at: rev,
            battery: rev,
            connected_pet: rev,
        }
    }
}

/// A device plus the write revision of each mutable field.
#[derive(Debug, Clone)]
pub(crate) struct TrackedDevice {
    pub(crate) device: Device,
    pub(crate) stamps: FieldStamps,
    /// Revision at which the device entered the store.
    pub(crate) created: u64,
}

/// Writes `value` unless the slot was written after `started`.
fn write_if_older<T: PartialEq>(
    slot: &mut T,
    stamp: &mut u64,
    value: T,
    started: u64,
    rev: u64,
) -> bool {
    if *stamp > started || *slot == value {
        return false;
    }
    *slot = value;
    *stamp = rev;
    true
}

impl TrackedDevice {
    pub(crate) fn new(device: Device, rev: u64) -> Self {
        Self {
            device,
            stamps: FieldStamps::all(rev),
            created: rev,
        }
    }

    /// True when the device was added after a request that started at
    /// `started`, so that request's list cannot speak for it.
    pub(crate) fn is_newer_than(&self, started: u64) -> bool {
        self.created > started
    }

    /// Merges a REST record fetched by a request that started at `started`.
    pub(crate) fn merge_rest(&mut self, fresh: Device, started: u64, rev: u64) -> bool {
        let d = &mut self.device;
        let s = &mut self.stamps;
        let mut changed = false;

        changed |= write_if_older(&mut d.name, &mut s.name, fresh.name, started, rev);
        changed |= write_if_older(&mut d.status, &mut s.status, fresh.status, started, rev);
        changed |= write_if_older(
            &mut d.last_connected_at,
            &mut s.last_connected_at,
            fresh.last_connected_at,
            started,
            rev,
        );
        changed |= write_if_older(
            &mut d.last_disconnected_at,
            &mut s.last_disconnected_at,
            fresh.last_disconnected_at,
            started,
            rev,
        );
        changed |= write_if_older(&mut d.battery, &mut s.battery, fresh.battery, started, rev);
        changed |= write_if_older(
            &mut d.connected_pet,
            &mut s.connected_pet,
            fresh.connected_pet,
            started,
            rev,
        );

        if fresh.last_seen_at > d.last_seen_at {
            d.last_seen_at = fresh.last_seen_at;
            changed = true;
        }
        if !fresh.hub_address.is_empty() && d.hub_address != fresh.hub_address {
            d.hub_address = fresh.hub_address;
            changed = true;
        }
        changed
    }

    /// Applies the fields present in a `device_status_updated` push.
    pub(crate) fn apply_update(
        &mut self,
        update: &DeviceStatusUpdate,
        now: DateTime<Utc>,
        rev: u64,
    ) -> bool {
        let mut changed = false;

        if let Some(status) = update.status {
            if status == LinkStatus::Online && self.device.status != LinkStatus::Online {
                self.device.last_connected_at = Some(now);
                self.stamps.last_connected_at = rev;
                changed = true;
            }
            if self.device.status != status {
                self.device.status = status;
                changed = true;
            }
            self.stamps.status = rev;
        }
        if let Some(seen) = update.last_seen_at
            && Some(seen) > self.device.last_seen_at
        {
            self.device.last_seen_at = Some(seen);
            changed = true;
        }
        if let Some(battery) = update.battery {
            let battery = battery.min(100);
            if self.device.battery != Some(battery) {
                self.device.battery = Some(battery);
                changed = true;
            }
            self.stamps.battery = rev;
        }
        changed
    }

    /// The hub lost its link to this device.
    pub(crate) fn mark_disconnected(&mut self, now: DateTime<Utc>, rev: u64) -> bool {
        self.device.status = LinkStatus::Offline;
        self.device.last_disconnected_at = Some(now);
        self.stamps.status = rev;
        self.stamps.last_disconnected_at = rev;
        true
    }
}
