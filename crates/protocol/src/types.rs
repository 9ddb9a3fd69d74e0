use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Online/offline state of a hub or a device.
///
/// Unrecognised strings from the server decode as [`LinkStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

impl LinkStatus {
    /// Whether moving from `self` to `next` loses the online state.
    pub fn is_downgrade_to(self, next: LinkStatus) -> bool {
        self == LinkStatus::Online && next != LinkStatus::Online
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkStatus::Online => "online",
            LinkStatus::Offline => "offline",
            LinkStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A gateway bridging Bluetooth peripherals to the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    pub address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// Pet profile a device is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pet_code: Option<String>,
}

/// A peripheral registered under exactly one hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hub_address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: LinkStatus,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_disconnected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub battery: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_pet: Option<ConnectedPet>,
}

impl Device {
    /// A freshly registered device with no observations yet.
    pub fn new(address: impl Into<String>, name: impl Into<String>, hub_address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            hub_address: hub_address.into(),
            status: LinkStatus::Unknown,
            last_seen_at: None,
            last_connected_at: None,
            last_disconnected_at: None,
            battery: None,
            connected_pet: None,
        }
    }
}

/// MAC-like addresses compare case-insensitively, ignoring surrounding whitespace.
pub fn addresses_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decodes_unknown_strings() {
        let s: LinkStatus = serde_json::from_str(r#""rebooting""#).unwrap();
        assert_eq!(s, LinkStatus::Unknown);
        let s: LinkStatus = serde_json::from_str(r#""online""#).unwrap();
        assert_eq!(s, LinkStatus::Online);
    }

    #[test]
    fn downgrade_only_from_online() {
        assert!(LinkStatus::Online.is_downgrade_to(LinkStatus::Offline));
        assert!(LinkStatus::Online.is_downgrade_to(LinkStatus::Unknown));
        assert!(!LinkStatus::Offline.is_downgrade_to(LinkStatus::Unknown));
        assert!(!LinkStatus::Unknown.is_downgrade_to(LinkStatus::Online));
    }

    #[test]
    fn device_tolerates_nulls_and_missing_fields() {
        let json = r#"{
            "address": "AA:BB:CC:11",
            "name": null,
            "hubAddress": "HUB-1",
            "status": null,
            "lastSeenAt": "2024-05-01T10:00:00Z",
            "battery": 42
        }"#;
        let d: Device = serde_json::from_str(json).unwrap();
        assert_eq!(d.name, "");
        assert_eq!(d.status, LinkStatus::Unknown);
        assert_eq!(d.battery, Some(42));
        assert!(d.last_seen_at.is_some());
        assert!(d.last_connected_at.is_none());
        assert!(d.connected_pet.is_none());
    }

    #[test]
    fn device_with_pet() {
        let json = r#"{"address":"AA","connectedPet":{"id":"p1","name":"Rex","petCode":"RX-1"}}"#;
        let d: Device = serde_json::from_str(json).unwrap();
        let pet = d.connected_pet.unwrap();
        assert_eq!(pet.name.as_deref(), Some("Rex"));
        assert_eq!(pet.pet_code.as_deref(), Some("RX-1"));
    }

    #[test]
    fn address_matching_ignores_case() {
        assert!(addresses_match("aa:bb:cc:11", "AA:BB:CC:11"));
        assert!(addresses_match(" AA:BB ", "aa:bb"));
        assert!(!addresses_match("AA:BB", "AA:BC"));
    }
}
