//! Per-device actions: blink, rename, delete data, link pet.

use tracing::{debug, info, warn};

use pawlink_api::PetLink;
use pawlink_hub_connection::{reply_for, request_id};
use pawlink_protocol::events::CommandResult;
use pawlink_protocol::{Command, CommandRequest, Device, EventKind, ServerEvent};

use crate::error::RegistrationError;
use crate::registrar::{DeviceRegistrar, require};

impl DeviceRegistrar {
    /// Flashes the device's LED and waits for the hub to confirm.
    pub async fn blink(&self, hub: &str, address: &str) -> Result<CommandResult, RegistrationError> {
        require("hub address", hub)?;
        require("device address", address)?;
        self.ensure_connected().await?;

        let req = CommandRequest {
            hub_id: hub.to_string(),
            device_id: address.to_string(),
            command: Command::Blink {
                mac_address: address.to_string(),
            },
            request_id: request_id("blink", hub, address),
        };
        let reply = self
            .correlator
            .issue(&req, EventKind::CommandResult, reply_for(&req), self.config.blink_timeout)
            .await?;

        let ServerEvent::CommandResult(result) = reply else {
            return Err(RegistrationError::Rejected {
                message: format!("unexpected reply {}", reply.kind().name()),
            });
        };
        if !result.success {
            let message = result.message.unwrap_or_else(|| "blink failed".into());
            return Err(RegistrationError::Rejected { message });
        }
        debug!(hub, device = address, "blink confirmed");
        Ok(result)
    }

    /// Renames a registered device and tells its hub.
    pub async fn rename(&self, address: &str, name: &str) -> Result<Device, RegistrationError> {
        require("device address", address)?;
        require("device name", name)?;
        let name = name.trim();

        let device = self.api.rename_device(address, name).await?;
        info!(device = address, name, "device renamed");

        let hub = self.owning_hub(address, &device);
        if let Some(hub) = &hub {
            let req = CommandRequest {
                hub_id: hub.clone(),
                device_id: address.to_string(),
                command: Command::Rename {
                    mac_address: address.to_string(),
                    name: name.to_string(),
                },
                request_id: request_id("rename", hub, address),
            };
            if let Err(e) = self.correlator.fire(&req).await {
                debug!(hub = %hub, device = address, error = %e, "rename not pushed to hub");
            }
        }
        self.refresh_hub(hub.as_deref()).await;
        Ok(device)
    }

    /// Erases the device's recorded data. The device stays registered.
    pub async fn delete_device_data(&self, address: &str) -> Result<(), RegistrationError> {
        require("device address", address)?;
        let hub = self.store.hub_of_device(address);
        self.api.delete_device_data(address).await?;
        info!(device = address, "device data deleted");
        self.refresh_hub(hub.as_deref()).await;
        Ok(())
    }

    /// Links the device to a pet by id or public pet code.
    pub async fn link_pet(&self, address: &str, pet: &PetLink) -> Result<(), RegistrationError> {
        require("device address", address)?;
        match pet {
            PetLink::PetId(id) => require("pet id", id)?,
            PetLink::PetCode(code) => require("pet code", code)?,
        }
        let hub = self.store.hub_of_device(address);
        self.api.link_pet(address, pet).await?;
        info!(device = address, "device linked to pet");
        self.refresh_hub(hub.as_deref()).await;
        Ok(())
    }

    fn owning_hub(&self, address: &str, device: &Device) -> Option<String> {
        self.store.hub_of_device(address).or_else(|| {
            (!device.hub_address.is_empty()).then(|| device.hub_address.clone())
        })
    }

    async fn refresh_hub(&self, hub: Option<&str>) {
        let Some(hub) = hub else {
            return;
        };
        if let Err(e) = self.store.refresh_devices(hub).await {
            warn!(hub, error = %e, "device refresh after action failed");
        }
    }
}
