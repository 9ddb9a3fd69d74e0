use serde::{Deserialize, Serialize};

/// Instruction forwarded by the relay to a hub.
///
/// Serialised with the action name inline: `{"action": "blink", "mac_address": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Start a discovery scan lasting `duration` milliseconds.
    ConnectDevices { duration: u64 },
    /// Flash a device's LED so the user can identify it.
    Blink { mac_address: String },
    /// Push a new display name to a device.
    Rename { mac_address: String, name: String },
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Command::ConnectDevices { .. } => "connect_devices",
            Command::Blink { .. } => "blink",
            Command::Rename { .. } => "rename",
        }
    }
}

/// Envelope for every outbound control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub hub_id: String,
    pub device_id: String,
    pub command: Command,
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_request_shape() {
        let req = CommandRequest {
            hub_id: "HUB-1".into(),
            device_id: "all".into(),
            command: Command::ConnectDevices { duration: 20_000 },
            request_id: "scan_HUB-1_all_1700000000000_0".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["hubId"], "HUB-1");
        assert_eq!(v["deviceId"], "all");
        assert_eq!(v["requestId"], "scan_HUB-1_all_1700000000000_0");
        assert_eq!(v["command"]["action"], "connect_devices");
        assert_eq!(v["command"]["duration"], 20_000);
    }

    #[test]
    fn blink_keeps_snake_case_params() {
        let cmd = Command::Blink {
            mac_address: "AA:BB".into(),
        };
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["action"], "blink");
        assert_eq!(v["mac_address"], "AA:BB");
        assert_eq!(cmd.action(), "blink");
    }
}
