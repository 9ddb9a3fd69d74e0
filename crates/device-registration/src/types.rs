use std::time::Duration;

use pawlink_protocol::Device;

/// Bounded retry for server-side (5xx / network) failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(500),
        }
    }
}

/// Retry used when a workflow needs the relay session up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

/// Config for [`DeviceRegistrar`](crate::DeviceRegistrar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationConfig {
    pub retry: RetryPolicy,
    pub connect: ConnectPolicy,
    /// Added to a scan's duration when suppressing hub status.
    pub scan_margin: Duration,
    /// How long to wait for a `command_result` to a blink.
    pub blink_timeout: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect: ConnectPolicy::default(),
            scan_margin: Duration::from_secs(5),
            blink_timeout: Duration::from_secs(10),
        }
    }
}

/// A device selected for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevice {
    pub address: String,
    pub name: String,
}

impl NewDevice {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

/// Where one MAC is in its registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationPhase {
    Discovered,
    Submitting { attempt: u32 },
    /// The create hit an existing record.
    Conflict,
    Updating,
    Registered,
    Failed { retryable: bool, message: String },
}

/// Progress report for one MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEvent {
    pub address: String,
    pub phase: RegistrationPhase,
}

/// How a registration succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Created(Device),
    /// The device already existed and was renamed instead.
    Updated(Device),
}

impl RegistrationOutcome {
    pub fn device(&self) -> &Device {
        match self {
            RegistrationOutcome::Created(d) | RegistrationOutcome::Updated(d) => d,
        }
    }
}

/// One failed MAC in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub address: String,
    pub message: String,
}

/// Result of a sequential batch registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
    /// MACs never attempted because the batch was cancelled.
    pub skipped: Vec<String>,
}

impl BatchReport {
    /// The failure shown as representative of the batch.
    pub fn first_failure(&self) -> Option<&BatchFailure> {
        self.failed.first()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}
