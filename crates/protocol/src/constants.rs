use std::time::Duration;

/// Device telemetry pushed by a hub (status, last seen, battery).
pub const EVENT_DEVICE_STATUS_UPDATED: &str = "device_status_updated";

/// A hub lost its Bluetooth link to a device.
pub const EVENT_DEVICE_DISCONNECTED: &str = "device_disconnected";

/// A device's stored data was wiped server-side.
pub const EVENT_DEVICE_DATA_DELETED: &str = "device_data_deleted";

/// Devices visible to a hub during a scan window.
pub const EVENT_CONNECTED_DEVICES: &str = "CONNECTED_DEVICES";

/// Online/offline transitions of a hub itself.
pub const EVENT_HUB_STATUS: &str = "hub_status";

/// Reply to a control request (blink, rename).
pub const EVENT_COMMAND_RESULT: &str = "command_result";

/// Reserved client-side event carrying session state changes.
pub const EVENT_CONNECTION_STATE: &str = "connection_state";

/// Event name of outbound control requests.
pub const EVENT_CONTROL_REQUEST: &str = "control_request";

/// How often the client pings the relay.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(10);

/// Read deadline: if nothing at all arrives within this window the session
/// is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(45);

/// Maximum accepted inbound frame size in bytes (1 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
