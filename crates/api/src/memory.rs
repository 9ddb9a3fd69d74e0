//! In-memory [`DeviceApi`] backed by plain vectors.
//!
//! Behaves like the server for the calls the control plane makes (409 on a
//! duplicate create, 404 on unknown devices) and can be told to fail the
//! next call of a given kind.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use pawlink_protocol::{ConnectedPet, Device, Hub, addresses_match};

use crate::error::ApiError;
use crate::types::{CreateDevice, PetLink};
use crate::{ApiFuture, DeviceApi};

/// Kind of API call, used to script failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    ListHubs,
    ListDevices,
    Create,
    Rename,
    DeleteData,
    LinkPet,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListHubs,
    ListDevices(String),
    Create(CreateDevice),
    Rename { address: String, name: String },
    DeleteData(String),
    LinkPet { address: String, pet: PetLink },
}

#[derive(Default)]
struct Inner {
    hubs: Vec<Hub>,
    devices: Vec<Device>,
    calls: Vec<ApiCall>,
    failures: HashMap<ApiOp, VecDeque<ApiError>>,
}

#[derive(Default)]
pub struct MemoryDeviceApi {
    inner: Mutex<Inner>,
}

impl MemoryDeviceApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_hub(&self, address: &str, name: &str) {
        self.lock().hubs.push(Hub {
            address: address.into(),
            name: name.into(),
        });
    }

    pub fn remove_hub(&self, address: &str) {
        let mut inner = self.lock();
        inner.hubs.retain(|h| !addresses_match(&h.address, address));
        inner.devices.retain(|d| !addresses_match(&d.hub_address, address));
    }

    pub fn rename_hub(&self, address: &str, name: &str) {
        if let Some(hub) = self
            .lock()
            .hubs
            .iter_mut()
            .find(|h| addresses_match(&h.address, address))
        {
            hub.name = name.into();
        }
    }

    /// Inserts or replaces a device record.
    pub fn put_device(&self, device: Device) {
        let mut inner = self.lock();
        inner.devices.retain(|d| !addresses_match(&d.address, &device.address));
        inner.devices.push(device);
    }

    pub fn remove_device(&self, address: &str) {
        self.lock()
            .devices
            .retain(|d| !addresses_match(&d.address, address));
    }

    pub fn device(&self, address: &str) -> Option<Device> {
        self.lock()
            .devices
            .iter()
            .find(|d| addresses_match(&d.address, address))
            .cloned()
    }

    /// Fails the next call of kind `op` with `error`. Queues in order.
    pub fn fail_next(&self, op: ApiOp, error: ApiError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    fn begin(&self, op: ApiOp, call: ApiCall) -> Result<MutexGuard<'_, Inner>, ApiError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        match inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(e) => Err(e),
            None => Ok(inner),
        }
    }
}

fn not_found() -> ApiError {
    ApiError::Terminal {
        status: 404,
        message: "Device not found".into(),
    }
}

impl DeviceApi for MemoryDeviceApi {
    fn list_hubs(&self) -> ApiFuture<'_, Vec<Hub>> {
        let result = self
            .begin(ApiOp::ListHubs, ApiCall::ListHubs)
            .map(|inner| inner.hubs.clone());
        Box::pin(async move { result })
    }

    fn list_devices<'a>(&'a self, hub_address: &'a str) -> ApiFuture<'a, Vec<Device>> {
        let result = self
            .begin(ApiOp::ListDevices, ApiCall::ListDevices(hub_address.into()))
            .map(|inner| {
                inner
                    .devices
                    .iter()
                    .filter(|d| addresses_match(&d.hub_address, hub_address))
                    .cloned()
                    .collect()
            });
        Box::pin(async move { result })
    }

    fn create_device<'a>(&'a self, req: &'a CreateDevice) -> ApiFuture<'a, Device> {
        let result = self
            .begin(ApiOp::Create, ApiCall::Create(req.clone()))
            .and_then(|mut inner| {
                if inner
                    .devices
                    .iter()
                    .any(|d| addresses_match(&d.address, &req.address))
                {
                    return Err(ApiError::Conflict {
                        message: "Device already exists".into(),
                    });
                }
                let device = Device::new(&req.address, &req.name, &req.hub_address);
                inner.devices.push(device.clone());
                Ok(device)
            });
        Box::pin(async move { result })
    }

    fn rename_device<'a>(&'a self, address: &'a str, name: &'a str) -> ApiFuture<'a, Device> {
        let call = ApiCall::Rename {
            address: address.into(),
            name: name.into(),
        };
        let result = self.begin(ApiOp::Rename, call).and_then(|mut inner| {
            let device = inner
                .devices
                .iter_mut()
                .find(|d| addresses_match(&d.address, address))
                .ok_or_else(not_found)?;
            device.name = name.into();
            Ok(device.clone())
        });
        Box::pin(async move { result })
    }

    fn delete_device_data<'a>(&'a self, address: &'a str) -> ApiFuture<'a, ()> {
        let result = self
            .begin(ApiOp::DeleteData, ApiCall::DeleteData(address.into()))
            .and_then(|mut inner| {
                let device = inner
                    .devices
                    .iter_mut()
                    .find(|d| addresses_match(&d.address, address))
                    .ok_or_else(not_found)?;
                device.last_seen_at = None;
                device.battery = None;
                Ok(())
            });
        Box::pin(async move { result })
    }

    fn link_pet<'a>(&'a self, address: &'a str, pet: &'a PetLink) -> ApiFuture<'a, ()> {
        let call = ApiCall::LinkPet {
            address: address.into(),
            pet: pet.clone(),
        };
        let result = self.begin(ApiOp::LinkPet, call).and_then(|mut inner| {
            let device = inner
                .devices
                .iter_mut()
                .find(|d| addresses_match(&d.address, address))
                .ok_or_else(not_found)?;
            device.connected_pet = Some(match pet {
                PetLink::PetId(id) => ConnectedPet {
                    id: Some(id.clone()),
                    name: None,
                    pet_code: None,
                },
                PetLink::PetCode(code) => ConnectedPet {
                    id: None,
                    name: None,
                    pet_code: Some(code.clone()),
                },
            });
            Ok(())
        });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(address: &str) -> CreateDevice {
        CreateDevice {
            address: address.into(),
            name: "Tailing".into(),
            hub_address: "HUB-1".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_case_insensitively() {
        let api = MemoryDeviceApi::new();
        api.create_device(&create("AA:BB")).await.unwrap();
        let err = api.create_device(&create("aa:bb")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(api.list_devices("HUB-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_fire_once_in_order() {
        let api = MemoryDeviceApi::new();
        api.add_hub("HUB-1", "Kitchen");
        api.fail_next(
            ApiOp::ListHubs,
            ApiError::Transient {
                status: Some(503),
                message: "busy".into(),
            },
        );

        assert!(api.list_hubs().await.unwrap_err().is_transient());
        assert_eq!(api.list_hubs().await.unwrap().len(), 1);
        assert_eq!(api.calls(), vec![ApiCall::ListHubs, ApiCall::ListHubs]);
    }

    #[tokio::test]
    async fn rename_unknown_device_is_not_found() {
        let api = MemoryDeviceApi::new();
        let err = api.rename_device("AA:BB", "x").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn link_pet_sets_reference() {
        let api = MemoryDeviceApi::new();
        api.put_device(Device::new("AA:BB", "Collar", "HUB-1"));
        api.link_pet("aa:bb", &PetLink::PetCode("RX-9".into()))
            .await
            .unwrap();
        let pet = api.device("AA:BB").unwrap().connected_pet.unwrap();
        assert_eq!(pet.pet_code.as_deref(), Some("RX-9"));
    }
}
