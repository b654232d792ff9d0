use chrono::{DateTime, Duration, Utc};

use crate::issue::{Category, Impact, IssueCandidate};
use crate::snapshot::{DeviceSnapshot, DeviceStatus};

pub const HEALTH_THRESHOLD: u8 = 70;
pub const UPTIME_THRESHOLD: f64 = 90.0;

/// Maps a device snapshot to candidate issues. Implementations must be pure
/// and must not block; `now` is passed in so results are reproducible.
pub trait DiagnosticRules: Send + Sync {
    fn evaluate(&self, snapshot: &DeviceSnapshot, now: DateTime<Utc>) -> Vec<IssueCandidate>;
}

/// Health, uptime and maintenance-status rules. All applicable rules fire.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRules;

impl DiagnosticRules for ReferenceRules {
    fn evaluate(&self, snapshot: &DeviceSnapshot, now: DateTime<Utc>) -> Vec<IssueCandidate> {
        let mut candidates = Vec::new();

        if snapshot.health_score < HEALTH_THRESHOLD {
            candidates.push(motor_degradation(snapshot, now));
        }
        if snapshot.uptime < UPTIME_THRESHOLD {
            candidates.push(power_degradation(snapshot, now));
        }
        if snapshot.status == DeviceStatus::UnderMaintenance {
            candidates.push(maintenance_underway());
        }

        candidates
    }
}

/// Severity grows with the health deficit, one point per five missing points.
pub fn health_severity(health_score: u8) -> u8 {
    let deficit = 100_u32.saturating_sub(u32::from(health_score.min(100)));
    deficit.div_ceil(5).clamp(1, 10) as u8
}

fn motor_degradation(snapshot: &DeviceSnapshot, now: DateTime<Utc>) -> IssueCandidate {
    let deficit = 100_u8.saturating_sub(snapshot.health_score.min(100));
    IssueCandidate {
        category: Category::Critical,
        component: "Motor System".to_string(),
        description: format!(
            "Motor efficiency has dropped by {deficit}% over the last 30 days; failure expected within 2-3 weeks."
        ),
        severity: health_severity(snapshot.health_score),
        confidence: 92,
        impact: Impact::High,
        estimated_cost: Some(250.0),
        estimated_time: Some("3-4 hours".to_string()),
        predicted_failure_date: Some(now + Duration::days(14)),
    }
}

fn power_degradation(snapshot: &DeviceSnapshot, now: DateTime<Utc>) -> IssueCandidate {
    IssueCandidate {
        category: Category::Warning,
        component: "Battery System".to_string(),
        description: format!(
            "Battery health is at {:.1}%; plan a replacement within 1-2 months.",
            snapshot.uptime
        ),
        severity: 5,
        confidence: 78,
        impact: Impact::Medium,
        estimated_cost: Some(180.0),
        estimated_time: Some("1-2 hours".to_string()),
        predicted_failure_date: Some(now + Duration::days(45)),
    }
}

fn maintenance_underway() -> IssueCandidate {
    IssueCandidate {
        category: Category::Info,
        component: "General System".to_string(),
        description: "Device is currently under maintenance; all other systems nominal.".to_string(),
        severity: 2,
        confidence: 95,
        impact: Impact::Low,
        estimated_cost: None,
        estimated_time: None,
        predicted_failure_date: None,
    }
}
