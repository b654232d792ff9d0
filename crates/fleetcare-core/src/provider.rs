use async_trait::async_trait;

use crate::error::ProviderError;
use crate::snapshot::DeviceSnapshot;

/// Device roster collaborator. A scan reads the roster once, then asks for a
/// fresh snapshot of each device right before diagnosing it.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn roster(&self) -> Result<Vec<String>, ProviderError>;
    async fn snapshot(&self, device_id: &str) -> Result<DeviceSnapshot, ProviderError>;
}

/// Fixed set of snapshots handed over by the caller.
#[derive(Debug, Clone, Default)]
pub struct StaticFleet {
    devices: Vec<DeviceSnapshot>,
}

impl StaticFleet {
    pub fn new(devices: Vec<DeviceSnapshot>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[DeviceSnapshot] {
        &self.devices
    }
}

#[async_trait]
impl SnapshotProvider for StaticFleet {
    async fn roster(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.devices.iter().map(|d| d.id.clone()).collect())
    }

    async fn snapshot(&self, device_id: &str) -> Result<DeviceSnapshot, ProviderError> {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
            .ok_or_else(|| ProviderError::DeviceNotFound(device_id.to_string()))
    }
}
