//! Discovery and create-or-update registration.
//!
//! Registration of one MAC is an explicit loop: create, fall back to an
//! update on 409, pause and retry on server-side failures up to the
//! [`RetryPolicy`](crate::RetryPolicy) bound, stop on anything else.
//! Batches run strictly one MAC at a time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pawlink_api::{ApiError, CreateDevice, DeviceApi};
use pawlink_hub_connection::{
    CommandCorrelator, ConnectionError, Handler, Realtime, request_id,
};
use pawlink_hub_store::HubStore;
use pawlink_protocol::{Command, CommandRequest, Device, EventKind, ServerEvent, addresses_match};

use crate::error::RegistrationError;
use crate::scan::ScanSession;
use crate::types::{
    BatchFailure, BatchReport, NewDevice, RegistrationConfig, RegistrationEvent,
    RegistrationOutcome, RegistrationPhase,
};

/// MACs in `visible` that match none of `known`, in order, each reported
/// once. Blank entries are dropped.
pub fn diff_new_devices(visible: &[String], known: &[Device]) -> Vec<String> {
    let mut fresh: Vec<String> = Vec::new();
    for mac in visible.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
        let is_known = known.iter().any(|d| addresses_match(&d.address, mac));
        let seen = fresh.iter().any(|m| addresses_match(m, mac));
        if !is_known && !seen {
            fresh.push(mac.to_string());
        }
    }
    fresh
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), RegistrationError> {
    if value.trim().is_empty() {
        return Err(RegistrationError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Runs device discovery, registration and device actions for one account.
pub struct DeviceRegistrar {
    pub(crate) api: Arc<dyn DeviceApi>,
    pub(crate) store: HubStore,
    pub(crate) correlator: CommandCorrelator,
    pub(crate) config: RegistrationConfig,
    events_tx: mpsc::Sender<RegistrationEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<RegistrationEvent>>>,
    cancel: Mutex<CancellationToken>,
}

impl DeviceRegistrar {
    pub fn new(
        api: Arc<dyn DeviceApi>,
        link: Arc<dyn Realtime>,
        store: HubStore,
        config: RegistrationConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            api,
            store,
            correlator: CommandCorrelator::new(link),
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Takes the progress receiver. Can only be called once.
    ///
    /// Events are dropped when nobody drains the channel.
    pub fn take_events(&self) -> Option<mpsc::Receiver<RegistrationEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Token that stops the current or next batch before its next MAC.
    /// A batch that stopped on it replaces it with a fresh one, so take a new
    /// token for each batch.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn renew_cancel_token(&self) {
        let mut current = self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
    }

    fn link(&self) -> &Arc<dyn Realtime> {
        self.correlator.link()
    }

    fn emit(&self, address: &str, phase: RegistrationPhase) {
        let _ = self.events_tx.try_send(RegistrationEvent {
            address: address.to_string(),
            phase,
        });
    }

    /// Makes sure the relay session is up, retrying with doubling delays.
    pub async fn ensure_connected(&self) -> Result<(), RegistrationError> {
        let policy = self.config.connect;
        let mut delay = policy.initial_delay;
        let mut attempt = 1;
        loop {
            match self.link().connect().await {
                Ok(()) => return Ok(()),
                Err(ConnectionError::Disposed) => return Err(ConnectionError::Disposed.into()),
                Err(e) if attempt >= policy.attempts => {
                    warn!(attempts = attempt, error = %e, "could not connect to hub relay");
                    return Err(e.into());
                }
                Err(e) => {
                    debug!(attempt, error = %e, ?delay, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Starts a discovery scan of `duration` on `hub`.
    ///
    /// Hub status downgrades are suppressed for the scan plus a margin. The
    /// returned session yields the hub's `CONNECTED_DEVICES` lists.
    pub async fn start_scan(
        &self,
        hub: &str,
        duration: Duration,
    ) -> Result<ScanSession, RegistrationError> {
        require("hub address", hub)?;
        self.ensure_connected().await?;
        self.store
            .suppress_hub(hub, duration + self.config.scan_margin)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let target = hub.to_string();
        let handler: Handler = Arc::new(move |event| {
            if let ServerEvent::ConnectedDevices(e) = event
                && addresses_match(&e.hub_address, &target)
            {
                let _ = tx.send(e.connected_devices.clone());
            }
        });
        // Listen before sending so an immediate report is not lost.
        let subscription = self.link().subscribe(EventKind::ConnectedDevices, handler);

        let req = CommandRequest {
            hub_id: hub.to_string(),
            device_id: "all".into(),
            command: Command::ConnectDevices {
                duration: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            },
            request_id: request_id("scan", hub, "all"),
        };
        self.correlator.fire(&req).await?;
        info!(hub, ?duration, request_id = %req.request_id, "device scan started");

        Ok(ScanSession::new(
            hub.to_string(),
            req.request_id,
            Instant::now() + duration,
            rx,
            subscription,
        ))
    }

    /// MACs in `visible` that `hub` does not own yet, per the store.
    pub fn new_devices(&self, hub: &str, visible: &[String]) -> Vec<String> {
        let known = self.store.devices(hub);
        let fresh = diff_new_devices(visible, &known);
        for mac in &fresh {
            self.emit(mac, RegistrationPhase::Discovered);
        }
        fresh
    }

    /// Registers `address` under `hub` as `name`.
    ///
    /// An existing record is renamed instead of duplicated.
    pub async fn register(
        &self,
        hub: &str,
        address: &str,
        name: &str,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        require("hub address", hub)?;
        require("device address", address)?;
        require("device name", name)?;

        let req = CreateDevice {
            address: address.trim().to_string(),
            name: name.trim().to_string(),
            hub_address: hub.to_string(),
        };
        let policy = self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.emit(address, RegistrationPhase::Submitting { attempt });

            match self.submit(&req).await {
                Ok(outcome) => {
                    self.emit(address, RegistrationPhase::Registered);
                    debug!(hub, device = address, attempt, "device registered");
                    return Ok(outcome);
                }
                Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                    self.emit(
                        address,
                        RegistrationPhase::Failed {
                            retryable: true,
                            message: e.to_string(),
                        },
                    );
                    debug!(device = address, attempt, error = %e, "registration failed, retrying");
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => {
                    let err = RegistrationError::from_api(e, attempt);
                    self.emit(
                        address,
                        RegistrationPhase::Failed {
                            retryable: false,
                            message: err.to_string(),
                        },
                    );
                    warn!(hub, device = address, error = %err, "device registration failed");
                    return Err(err);
                }
            }
        }
    }

    /// One create, with the update fallback on conflict.
    async fn submit(&self, req: &CreateDevice) -> Result<RegistrationOutcome, ApiError> {
        match self.api.create_device(req).await {
            Ok(device) => Ok(RegistrationOutcome::Created(device)),
            Err(ApiError::Conflict { message }) => {
                self.emit(&req.address, RegistrationPhase::Conflict);
                debug!(device = %req.address, %message, "device exists, updating");
                self.emit(&req.address, RegistrationPhase::Updating);
                let device = self.api.rename_device(&req.address, &req.name).await?;
                Ok(RegistrationOutcome::Updated(device))
            }
            Err(e) => Err(e),
        }
    }

    /// Registers each device in turn, then reloads the hub's devices.
    pub async fn register_batch(&self, hub: &str, devices: &[NewDevice]) -> BatchReport {
        let cancel = self.cancel_token();
        let mut report = BatchReport::default();
        for (i, device) in devices.iter().enumerate() {
            if cancel.is_cancelled() {
                report
                    .skipped
                    .extend(devices[i..].iter().map(|d| d.address.clone()));
                self.renew_cancel_token();
                break;
            }
            match self.register(hub, &device.address, &device.name).await {
                Ok(_) => report.succeeded.push(device.address.clone()),
                Err(e) => report.failed.push(BatchFailure {
                    address: device.address.clone(),
                    message: e.to_string(),
                }),
            }
        }

        if let Err(e) = self.store.refresh_devices(hub).await {
            warn!(hub, error = %e, "device refresh after registration failed");
        }
        info!(
            hub,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "registration batch finished"
        );
        report
    }
}
