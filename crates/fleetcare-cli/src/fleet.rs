use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use fleetcare_core::{DeviceSnapshot, DeviceStatus};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum FleetFile {
    Devices(Vec<DeviceSnapshot>),
    Wrapped { devices: Vec<DeviceSnapshot> },
}

/// Reads a fleet file: either a JSON array of device snapshots or an object
/// with a `devices` array.
pub fn load_fleet(path: &Path) -> Result<Vec<DeviceSnapshot>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading fleet file {}", path.display()))?;
    parse_fleet(&raw).with_context(|| format!("parsing fleet file {}", path.display()))
}

pub fn parse_fleet(raw: &str) -> Result<Vec<DeviceSnapshot>> {
    let devices = match serde_json::from_str::<FleetFile>(raw)? {
        FleetFile::Devices(devices) => devices,
        FleetFile::Wrapped { devices } => devices,
    };
    validate(&devices)?;
    Ok(devices)
}

fn validate(devices: &[DeviceSnapshot]) -> Result<()> {
    let mut seen = HashSet::new();
    for device in devices {
        if device.id.trim().is_empty() {
            bail!("device with empty id");
        }
        if !seen.insert(device.id.as_str()) {
            bail!("duplicate device id {}", device.id);
        }
        if device.owner_id.trim().is_empty() {
            bail!("device {} has no owner", device.id);
        }
        if device.health_score > 100 {
            bail!("device {} health score {} exceeds 100", device.id, device.health_score);
        }
        if !device.uptime.is_finite() || !(0.0..=100.0).contains(&device.uptime) {
            bail!("device {} uptime {} outside 0-100", device.id, device.uptime);
        }
    }
    Ok(())
}

/// Four mannequins across three clients; only the second one is degraded.
pub fn demo_fleet() -> Vec<DeviceSnapshot> {
    let device = |id: &str, owner: &str, status, uptime, health_score| DeviceSnapshot {
        id: id.to_string(),
        name: format!("RoboQuin-00{id}"),
        owner_id: owner.to_string(),
        status,
        uptime,
        health_score,
    };

    vec![
        device("1", "client1", DeviceStatus::Online, 98.5, 87),
        device("2", "client2", DeviceStatus::UnderMaintenance, 85.2, 62),
        device("3", "client3", DeviceStatus::Online, 92.1, 94),
        device("4", "client1", DeviceStatus::Online, 96.8, 91),
    ]
}
