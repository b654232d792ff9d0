use serde::{Deserialize, Serialize};

/// Point-in-time view of one device as supplied by the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub owner_id: String,
    pub status: DeviceStatus,
    /// Uptime percentage, 0-100.
    pub uptime: f64,
    /// Health score, 0-100.
    pub health_score: u8,
}

impl DeviceSnapshot {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[serde(rename = "maintenance")]
    UnderMaintenance,
}
