//! Read-only projections handed to observers.

use chrono::{DateTime, Utc};

use pawlink_protocol::{Device, Hub, LinkStatus};

/// MAC addresses a hub reported during a scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedSnapshot {
    pub addresses: Vec<String>,
    pub received_at: DateTime<Utc>,
}

/// A device with its derived display status.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceView {
    pub device: Device,
    pub display_status: LinkStatus,
}

/// A hub, its derived status, and its devices, as of one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct HubView {
    pub hub: Hub,
    pub status: LinkStatus,
    pub suppressed: bool,
    pub devices: Vec<DeviceView>,
    pub connected: Option<ConnectedSnapshot>,
}

impl HubView {
    pub fn device(&self, address: &str) -> Option<&DeviceView> {
        self.devices
            .iter()
            .find(|d| pawlink_protocol::addresses_match(&d.device.address, address))
    }
}
