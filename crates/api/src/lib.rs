//! REST collaborator for hubs and devices.
//!
//! [`DeviceApi`] is the seam the store and the registration workflow depend
//! on; [`HttpDeviceApi`] implements it over JSON/HTTP with bearer-token auth.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use pawlink_protocol::{Device, Hub};

pub use client::HttpDeviceApi;
pub use error::ApiError;
pub use memory::{ApiCall, ApiOp, MemoryDeviceApi};
pub use types::{ApiResponse, CreateDevice, PetLink, RenameDevice};

/// Boxed future returned by [`DeviceApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Abstract device REST API.
///
/// Implemented by [`HttpDeviceApi`] and by the in-memory [`MemoryDeviceApi`].
pub trait DeviceApi: Send + Sync {
    /// `GET /hub`
    fn list_hubs(&self) -> ApiFuture<'_, Vec<Hub>>;

    /// `GET /device?hubAddress=<addr>`
    fn list_devices<'a>(&'a self, hub_address: &'a str) -> ApiFuture<'a, Vec<Device>>;

    /// `POST /device`. Fails with [`ApiError::Conflict`] when the address exists.
    fn create_device<'a>(&'a self, req: &'a CreateDevice) -> ApiFuture<'a, Device>;

    /// `PUT /device/:address`
    fn rename_device<'a>(&'a self, address: &'a str, name: &'a str) -> ApiFuture<'a, Device>;

    /// `POST /device/:address/delete_data`
    fn delete_device_data<'a>(&'a self, address: &'a str) -> ApiFuture<'a, ()>;

    /// `PUT /device/:address/pet`
    fn link_pet<'a>(&'a self, address: &'a str, pet: &'a PetLink) -> ApiFuture<'a, ()>;
}
