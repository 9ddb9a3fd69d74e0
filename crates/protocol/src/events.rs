//! Server-pushed events as a tagged union keyed by [`EventKind`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::{
    EVENT_COMMAND_RESULT, EVENT_CONNECTED_DEVICES, EVENT_CONNECTION_STATE,
    EVENT_DEVICE_DATA_DELETED, EVENT_DEVICE_DISCONNECTED, EVENT_DEVICE_STATUS_UPDATED,
    EVENT_HUB_STATUS,
};
use crate::types::LinkStatus;

/// Name of a realtime event. Handlers subscribe by kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceStatusUpdated,
    DeviceDisconnected,
    DeviceDataDeleted,
    ConnectedDevices,
    HubStatus,
    CommandResult,
    /// Reserved for the client's own session state changes.
    ConnectionState,
    Other(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            EVENT_DEVICE_STATUS_UPDATED => Self::DeviceStatusUpdated,
            EVENT_DEVICE_DISCONNECTED => Self::DeviceDisconnected,
            EVENT_DEVICE_DATA_DELETED => Self::DeviceDataDeleted,
            EVENT_CONNECTED_DEVICES => Self::ConnectedDevices,
            EVENT_HUB_STATUS => Self::HubStatus,
            EVENT_COMMAND_RESULT => Self::CommandResult,
            EVENT_CONNECTION_STATE => Self::ConnectionState,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::DeviceStatusUpdated => EVENT_DEVICE_STATUS_UPDATED,
            Self::DeviceDisconnected => EVENT_DEVICE_DISCONNECTED,
            Self::DeviceDataDeleted => EVENT_DEVICE_DATA_DELETED,
            Self::ConnectedDevices => EVENT_CONNECTED_DEVICES,
            Self::HubStatus => EVENT_HUB_STATUS,
            Self::CommandResult => EVENT_COMMAND_RESULT,
            Self::ConnectionState => EVENT_CONNECTION_STATE,
            Self::Other(name) => name,
        }
    }
}

/// `device_status_updated` payload. Absent fields leave the stored value alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusUpdate {
    pub device_address: String,
    #[serde(default)]
    pub status: Option<LinkStatus>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub battery: Option<u8>,
}

/// `device_disconnected` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDisconnected {
    pub device_mac: String,
}

/// `device_data_deleted` payload. Informational; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDataDeleted {
    #[serde(default)]
    pub hub_address: Option<String>,
    #[serde(default, alias = "deviceMac")]
    pub device_address: Option<String>,
}

/// `CONNECTED_DEVICES` payload: MACs a hub currently sees during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevices {
    #[serde(rename = "hubAddress")]
    pub hub_address: String,
    #[serde(default)]
    pub connected_devices: Vec<String>,
}

/// `hub_status` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatusUpdate {
    pub hub_address: String,
    pub status: LinkStatus,
}

/// `command_result` payload. The relay may or may not echo the request id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub hub_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// State of the client's realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Session handshake in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Session lost, automatic reconnection in progress.
    Reconnecting { attempt: u32 },
    /// No session and no reconnection pending.
    Disconnected,
}

/// An inbound realtime event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    DeviceStatusUpdated(DeviceStatusUpdate),
    DeviceDisconnected(DeviceDisconnected),
    DeviceDataDeleted(DeviceDataDeleted),
    ConnectedDevices(ConnectedDevices),
    HubStatus(HubStatusUpdate),
    CommandResult(CommandResult),
    ConnectionState(ConnectionState),
    Other {
        name: String,
        payload: serde_json::Value,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceStatusUpdated(_) => EventKind::DeviceStatusUpdated,
            Self::DeviceDisconnected(_) => EventKind::DeviceDisconnected,
            Self::DeviceDataDeleted(_) => EventKind::DeviceDataDeleted,
            Self::ConnectedDevices(_) => EventKind::ConnectedDevices,
            Self::HubStatus(_) => EventKind::HubStatus,
            Self::CommandResult(_) => EventKind::CommandResult,
            Self::ConnectionState(_) => EventKind::ConnectionState,
            Self::Other { name, .. } => EventKind::Other(name.clone()),
        }
    }

    /// Decodes a named event and its raw JSON payload.
    ///
    /// `connection_state` is client-only; a server frame using that name is
    /// delivered as [`ServerEvent::Other`] rather than trusted.
    pub fn decode(name: &str, payload: Option<&RawValue>) -> Result<Self, serde_json::Error> {
        let raw = payload.map(RawValue::get).unwrap_or("{}");
        let event = match EventKind::from_name(name) {
            EventKind::DeviceStatusUpdated => Self::DeviceStatusUpdated(serde_json::from_str(raw)?),
            EventKind::DeviceDisconnected => Self::DeviceDisconnected(serde_json::from_str(raw)?),
            EventKind::DeviceDataDeleted => Self::DeviceDataDeleted(serde_json::from_str(raw)?),
            EventKind::ConnectedDevices => Self::ConnectedDevices(serde_json::from_str(raw)?),
            EventKind::HubStatus => Self::HubStatus(serde_json::from_str(raw)?),
            EventKind::CommandResult => Self::CommandResult(serde_json::from_str(raw)?),
            EventKind::ConnectionState | EventKind::Other(_) => Self::Other {
                name: name.to_string(),
                payload: serde_json::from_str(raw)?,
            },
        };
        Ok(event)
    }

    /// Hub address the event concerns, when the payload names one.
    pub fn hub_address(&self) -> Option<&str> {
        match self {
            Self::ConnectedDevices(e) => Some(&e.hub_address),
            Self::HubStatus(e) => Some(&e.hub_address),
            Self::DeviceDataDeleted(e) => e.hub_address.as_deref(),
            Self::CommandResult(e) => e.hub_id.as_deref(),
            _ => None,
        }
    }
}
