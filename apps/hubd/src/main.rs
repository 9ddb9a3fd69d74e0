//! pawlink hub daemon.
//!
//! Keeps the relay session and the hub store alive, polls REST as a
//! fallback for missed events, and shuts down cleanly on Ctrl-C.
//!
//! `pawlink-hubd scan <hub> [seconds]` runs one discovery scan instead and
//! prints the MACs the hub sees that are not registered yet.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use pawlink_api::HttpDeviceApi;
use pawlink_device_registration::DeviceRegistrar;
use pawlink_hub_connection::{ConnectionManager, ConnectionState};
use pawlink_hub_store::{HubStore, PollOutcome};

use config::HubdConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pawlink=debug")),
        )
        .init();

    let cfg = HubdConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        HubdConfig::default()
    });
    if cfg.token.is_empty() {
        warn!("no API token configured; requests will be rejected");
    }

    let manager = Arc::new(ConnectionManager::websocket(
        cfg.session_config(),
        cfg.reconnect_config(),
    ));
    let api = Arc::new(HttpDeviceApi::new(&cfg.api_base_url, &cfg.token)?);
    let store = HubStore::new(api.clone(), manager.clone(), cfg.store_config());

    if let Err(e) = manager.connect().await {
        warn!(error = %e, "hub relay unavailable, relying on polling");
    }
    if let Err(e) = store.initialize().await {
        warn!(error = %e, "initial hub load failed");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("scan") => {
            let registrar =
                DeviceRegistrar::new(api, manager.clone(), store.clone(), cfg.registration_config());
            scan(&registrar, &args[1..]).await
        }
        Some(other) => Err(anyhow::anyhow!("unknown command: {other}")),
        None => {
            run(&manager, &store, Duration::from_secs(cfg.poll_interval_secs)).await;
            Ok(())
        }
    };

    store.dispose();
    manager.dispose().await;
    info!("pawlink-hubd stopped");
    result
}

/// Polls until Ctrl-C, reconnecting the relay when it has given up.
async fn run(manager: &ConnectionManager, store: &HubStore, poll_interval: Duration) {
    let mut states = manager.watch_state();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.tick().await;
    info!(?poll_interval, hubs = store.hubs().len(), "pawlink-hubd running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(?state, "hub relay state changed");
            }
            _ = ticker.tick() => {
                if manager.state() == ConnectionState::Disconnected
                    && let Err(e) = manager.connect().await
                {
                    debug!(error = %e, "hub relay still unavailable");
                }
                poll_tick(store).await;
            }
        }
    }
}

/// One poll per tick. The ticker sets the cadence, so the store's own
/// interval guard is bypassed.
async fn poll_tick(store: &HubStore) -> Option<PollOutcome> {
    match store.poll(true).await {
        Ok(outcome) => {
            if let PollOutcome::Refreshed { hubs, failed_hubs } = &outcome {
                debug!(hubs, failed = failed_hubs.len(), "poll refreshed");
            }
            Some(outcome)
        }
        Err(e) => {
            warn!(error = %e, "poll failed");
            None
        }
    }
}

/// Scans one hub and prints the unregistered MACs it reports.
async fn scan(registrar: &DeviceRegistrar, args: &[String]) -> anyhow::Result<()> {
    let hub = args
        .first()
        .ok_or_else(|| anyhow::anyhow!("usage: pawlink-hubd scan <hub> [seconds]"))?;
    let secs = match args.get(1) {
        Some(s) => s.parse()?,
        None => 20,
    };

    let session = registrar.start_scan(hub, Duration::from_secs(secs)).await?;
    let visible = session.finish().await;
    for mac in registrar.new_devices(hub, &visible) {
        println!("{mac}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pawlink_api::{ApiCall, MemoryDeviceApi};
    use pawlink_hub_connection::LoopbackLink;
    use pawlink_hub_store::StoreConfig;

    #[tokio::test]
    async fn every_tick_refreshes() {
        let api = Arc::new(MemoryDeviceApi::new());
        api.add_hub("HUB-1", "Living room");
        let store = HubStore::new(api.clone(), Arc::new(LoopbackLink::new()), StoreConfig::default());

        for _ in 0..2 {
            assert!(matches!(
                poll_tick(&store).await,
                Some(PollOutcome::Refreshed { hubs: 1, .. })
            ));
        }
        let lists = api.calls().iter().filter(|c| **c == ApiCall::ListHubs).count();
        assert_eq!(lists, 2);

        store.dispose();
        assert!(poll_tick(&store).await.is_none());
    }
}
