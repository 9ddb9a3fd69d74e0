//! Single source of truth for hubs, devices and their live status.
//!
//! [`HubStore`] reconciles the REST hub and device lists with realtime
//! pushes, derives display statuses, and notifies observers on every change.

pub mod error;
mod merge;
mod state;
pub mod status;
pub mod store;
pub mod view;

pub use error::StoreError;
pub use status::OFFLINE_THRESHOLD;
pub use store::{HubStore, PollOutcome, StoreConfig};
pub use view::{ConnectedSnapshot, DeviceView, HubView};
