//! Device registry.

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use portico_core::Device;

use crate::AuthError;
use crate::store::{NewDevice, SharedStore};

#[derive(Clone, Debug)]
pub struct DeviceRegistry {
    store: SharedStore,
}

impl DeviceRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Register a device, or refresh the metadata of a known one.
    ///
    /// Re-registering never reactivates a device an administrator turned off.
    #[instrument(skip(self, device), fields(device_uid = %device.device_uid), err)]
    pub async fn register(&self, device: NewDevice) -> Result<Device, AuthError> {
        if device.device_uid.trim().is_empty() {
            return Err(AuthError::InvalidInput("device_uid must not be empty".into()));
        }
        let device = self
            .store
            .within("register_device", self.store.get().register_device(device, Utc::now()))
            .await?;
        info!(device_id = %device.id, active = device.is_active, "device registered");
        Ok(device)
    }

    /// The device behind `device_uid`, if registered and active.
    pub async fn verify(&self, device_uid: &str) -> Result<Device, AuthError> {
        let device = self
            .store
            .within("find_device_by_uid", self.store.get().find_device_by_uid(device_uid))
            .await?
            .ok_or(AuthError::DeviceNotFound)?;
        if !device.is_active {
            return Err(AuthError::DeviceNotActive);
        }
        Ok(device)
    }

    /// Record a heartbeat without blocking the caller.
    pub fn heartbeat(&self, device_uid: &str) -> JoinHandle<()> {
        let store = self.store.clone();
        let device_uid = device_uid.to_string();
        tokio::spawn(async move {
            if let Err(e) = store
                .within("record_heartbeat", store.get().record_heartbeat(&device_uid, Utc::now()))
                .await
            {
                warn!(device_uid = %device_uid, error = %e, "heartbeat not recorded");
            }
        })
    }
}
