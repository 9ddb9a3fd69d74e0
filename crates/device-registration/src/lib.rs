//! Device discovery and registration.
//!
//! A scan asks a hub to report the peripherals it can see, the visible
//! MACs are diffed against the hub's persisted devices, and the new ones
//! are registered one at a time:
//!
//! 1. **Scan**: connect, suppress hub status, send `connect_devices`
//! 2. **Diff**: keep MACs the hub does not already own
//! 3. **Submit**: `POST` create, falling back to `PUT` on 409
//! 4. **Retry**: 5xx and network failures, within a bounded policy
//! 5. **Refresh**: reload the hub's devices into the store
//!
//! The same registrar also carries the per-device actions (blink, rename,
//! delete data, link pet).

pub mod actions;
pub mod error;
pub mod registrar;
pub mod scan;
pub mod types;

pub use error::RegistrationError;
pub use registrar::{DeviceRegistrar, diff_new_devices};
pub use scan::ScanSession;
pub use types::{
    BatchFailure, BatchReport, ConnectPolicy, NewDevice, RegistrationConfig, RegistrationEvent,
    RegistrationOutcome, RegistrationPhase, RetryPolicy,
};
