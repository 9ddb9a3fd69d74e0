//! Display-status derivation.

use std::time::Duration;

use chrono::{DateTime, Utc};

use pawlink_protocol::{Device, LinkStatus};

/// Age of `lastSeenAt` beyond which a device is presumed offline.
pub const OFFLINE_THRESHOLD: Duration = Duration::from_secs(120);

fn is_stale(last_seen: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    match (now - last_seen).to_std() {
        Ok(age) => age > threshold,
        // last_seen in the future
        Err(_) => false,
    }
}

/// Status to show for a device.
pub fn device_status(device: &Device, now: DateTime<Utc>, threshold: Duration) -> LinkStatus {
    if device.status == LinkStatus::Offline {
        return LinkStatus::Offline;
    }
    match device.last_seen_at {
        Some(seen) if is_stale(seen, now, threshold) => LinkStatus::Offline,
        _ => device.status,
    }
}

/// Status to show for a hub.
///
/// A suppressed hub shows its stored status. Otherwise the hub is offline
/// when even its most recently seen device has gone stale.
pub fn hub_status<'a>(
    stored: LinkStatus,
    suppressed: bool,
    devices: impl IntoIterator<Item = &'a Device>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> LinkStatus {
    if suppressed {
        return stored;
    }
    let freshest = devices.into_iter().filter_map(|d| d.last_seen_at).max();
    match freshest {
        Some(seen) if is_stale(seen, now, threshold) => LinkStatus::Offline,
        _ => stored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn seen(device: &mut Device, now: DateTime<Utc>, secs_ago: i64) {
        device.last_seen_at = Some(now - TimeDelta::seconds(secs_ago));
    }

    #[test]
    fn explicit_offline_wins() {
        let now = Utc::now();
        let mut d = Device::new("AA", "a", "H");
        d.status = LinkStatus::Offline;
        seen(&mut d, now, 1);
        assert_eq!(device_status(&d, now, OFFLINE_THRESHOLD), LinkStatus::Offline);
    }

    #[test]
    fn stale_device_is_offline() {
        let now = Utc::now();
        let mut d = Device::new("AA", "a", "H");
        d.status = LinkStatus::Online;
        seen(&mut d, now, 121);
        assert_eq!(device_status(&d, now, OFFLINE_THRESHOLD), LinkStatus::Offline);
        seen(&mut d, now, 119);
        assert_eq!(device_status(&d, now, OFFLINE_THRESHOLD), LinkStatus::Online);
    }

    #[test]
    fn never_seen_keeps_stored_status() {
        let now = Utc::now();
        let d = Device::new("AA", "a", "H");
        assert_eq!(device_status(&d, now, OFFLINE_THRESHOLD), LinkStatus::Unknown);
    }

    #[test]
    fn future_timestamp_is_not_stale() {
        let now = Utc::now();
        let mut d = Device::new("AA", "a", "H");
        d.status = LinkStatus::Online;
        seen(&mut d, now, -30);
        assert_eq!(device_status(&d, now, OFFLINE_THRESHOLD), LinkStatus::Online);
    }

    #[test]
    fn hub_follows_freshest_device() {
        let now = Utc::now();
        let mut a = Device::new("AA", "a", "H");
        let mut b = Device::new("BB", "b", "H");
        seen(&mut a, now, 600);
        seen(&mut b, now, 10);
        let devices = [a.clone(), b];
        assert_eq!(
            hub_status(LinkStatus::Online, false, &devices, now, OFFLINE_THRESHOLD),
            LinkStatus::Online
        );

        let devices = [a];
        assert_eq!(
            hub_status(LinkStatus::Online, false, &devices, now, OFFLINE_THRESHOLD),
            LinkStatus::Offline
        );
        assert_eq!(
            hub_status(LinkStatus::Online, true, &devices, now, OFFLINE_THRESHOLD),
            LinkStatus::Online,
            "suppressed hub shows stored status"
        );
    }

    #[test]
    fn hub_without_observations_is_stored_status() {
        let now = Utc::now();
        let devices: [Device; 0] = [];
        assert_eq!(
            hub_status(LinkStatus::Unknown, false, &devices, now, OFFLINE_THRESHOLD),
            LinkStatus::Unknown
        );
    }
}
