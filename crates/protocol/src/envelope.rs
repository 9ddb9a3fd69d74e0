use serde::{Deserialize, Serialize};

use crate::commands::CommandRequest;
use crate::constants::EVENT_CONTROL_REQUEST;
use crate::events::ServerEvent;

/// JSON frame carried over the relay socket in both directions.
///
/// `data` stays a `RawValue` so decoding is deferred until the event name
/// is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
}

impl Frame {
    /// Creates a frame with the given event name and payload.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        event: impl Into<String>,
        data: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match data {
            Some(d) => Some(serde_json::value::to_raw_value(d)?),
            None => None,
        };
        Ok(Self {
            id: id.into(),
            event: event.into(),
            data: raw,
        })
    }

    /// Wraps a control request.
    pub fn control_request(
        id: impl Into<String>,
        req: &CommandRequest,
    ) -> Result<Self, serde_json::Error> {
        Frame::new(id, EVENT_CONTROL_REQUEST, Some(req))
    }

    /// Deserializes the payload into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Decodes this frame as a typed server event.
    pub fn to_event(&self) -> Result<ServerEvent, serde_json::Error> {
        ServerEvent::decode(&self.event, self.data.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::events::{EventKind, HubStatusUpdate};
    use crate::types::LinkStatus;

    #[test]
    fn control_request_frame() {
        let req = CommandRequest {
            hub_id: "HUB-1".into(),
            device_id: "AA:BB".into(),
            command: Command::Blink {
                mac_address: "AA:BB".into(),
            },
            request_id: "blink_HUB-1_AA:BB_1_0".into(),
        };
        let frame = Frame::control_request("f-1", &req).unwrap();
        assert_eq!(frame.event, "control_request");
        let parsed: CommandRequest = frame.parse_data().unwrap().unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn frame_omits_missing_data() {
        let frame = Frame::new::<()>("f-2", "ping", None).unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("data"));
    }

    #[test]
    fn inbound_frame_without_id_decodes() {
        let json = r#"{"event":"hub_status","data":{"hubAddress":"HUB-1","status":"offline"}}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert!(frame.id.is_empty());
        let ev = frame.to_event().unwrap();
        assert_eq!(ev.kind(), EventKind::HubStatus);
        assert_eq!(
            ev,
            ServerEvent::HubStatus(HubStatusUpdate {
                hub_address: "HUB-1".into(),
                status: LinkStatus::Offline,
            })
        );
    }
}
