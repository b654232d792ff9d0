use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;

use crate::clock::FixedClock;
use crate::config::WorkflowConfig;
use crate::error::{MaintenanceError, ProviderError};
use crate::issue::{Category, Impact, Issue, IssueCandidate, IssueId, ManualReport};
use crate::provider::{SnapshotProvider, StaticFleet};
use crate::snapshot::{DeviceSnapshot, DeviceStatus};
use crate::store::{IssueFilter, IssueStore, MemoryIssueStore, TransitionRequest};
use crate::workflow::Actor;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid date")
}

pub fn device(id: &str, owner: &str, status: DeviceStatus, uptime: f64, health: u8) -> DeviceSnapshot {
    DeviceSnapshot {
        id: id.to_string(),
        name: format!("RoboQuin {id}"),
        owner_id: owner.to_string(),
        status,
        uptime,
        health_score: health,
    }
}

pub fn healthy(id: &str, owner: &str) -> DeviceSnapshot {
    device(id, owner, DeviceStatus::Online, 98.5, 91)
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(t0()))
}

pub fn memory_store(clock: Arc<FixedClock>) -> Arc<MemoryIssueStore> {
    Arc::new(MemoryIssueStore::new(clock, WorkflowConfig::default()))
}

/// A fresh critical issue on a device owned by `owner`.
pub fn pending_issue(owner: &str) -> Issue {
    let snapshot = device("MQ-100", owner, DeviceStatus::Online, 97.0, 55);
    let candidate = IssueCandidate {
        category: Category::Critical,
        component: "Motor System".to_string(),
        description: "motor drift".to_string(),
        severity: 9,
        confidence: 92,
        impact: Impact::High,
        estimated_cost: Some(250.0),
        estimated_time: Some("3-4 hours".to_string()),
        predicted_failure_date: Some(t0() + chrono::Duration::days(14)),
    };
    Issue::detected(&snapshot, candidate, t0())
}

/// Holds every snapshot read until the test hands out permits.
pub struct GatedFleet {
    fleet: StaticFleet,
    pub gate: Arc<Semaphore>,
}

impl GatedFleet {
    pub fn new(devices: Vec<DeviceSnapshot>) -> Self {
        Self {
            fleet: StaticFleet::new(devices),
            gate: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl SnapshotProvider for GatedFleet {
    async fn roster(&self) -> Result<Vec<String>, ProviderError> {
        self.fleet.roster().await
    }

    async fn snapshot(&self, device_id: &str) -> Result<DeviceSnapshot, ProviderError> {
        self.gate
            .acquire()
            .await
            .map_err(|err| ProviderError::Read(err.to_string()))?
            .forget();
        self.fleet.snapshot(device_id).await
    }
}

/// Fails to read one device, or the whole roster.
pub struct FlakyFleet {
    fleet: StaticFleet,
    broken_device: Option<String>,
    broken_roster: bool,
}

impl FlakyFleet {
    pub fn failing_on(devices: Vec<DeviceSnapshot>, device_id: &str) -> Self {
        Self {
            fleet: StaticFleet::new(devices),
            broken_device: Some(device_id.to_string()),
            broken_roster: false,
        }
    }

    pub fn without_roster() -> Self {
        Self {
            fleet: StaticFleet::default(),
            broken_device: None,
            broken_roster: true,
        }
    }
}

#[async_trait]
impl SnapshotProvider for FlakyFleet {
    async fn roster(&self) -> Result<Vec<String>, ProviderError> {
        if self.broken_roster {
            return Err(ProviderError::RosterUnavailable("roster service down".to_string()));
        }
        self.fleet.roster().await
    }

    async fn snapshot(&self, device_id: &str) -> Result<DeviceSnapshot, ProviderError> {
        if self.broken_device.as_deref() == Some(device_id) {
            return Err(ProviderError::Read(format!("{device_id} telemetry timeout")));
        }
        self.fleet.snapshot(device_id).await
    }
}

/// Accepts `accepted` creates, then rejects every further one.
pub struct FailingStore {
    store: MemoryIssueStore,
    accepted: AtomicUsize,
}

impl FailingStore {
    pub fn after(accepted: usize, clock: Arc<FixedClock>) -> Self {
        Self {
            store: MemoryIssueStore::new(clock, WorkflowConfig::default()),
            accepted: AtomicUsize::new(accepted),
        }
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }
}

#[async_trait]
impl IssueStore for FailingStore {
    async fn create(&self, issue: Issue) -> Result<Issue, MaintenanceError> {
        let granted = self
            .accepted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(MaintenanceError::DuplicateIssue(issue.id));
        }
        self.store.create(issue).await
    }

    async fn report_manual(
        &self,
        actor: &Actor,
        report: ManualReport,
    ) -> Result<Issue, MaintenanceError> {
        self.store.report_manual(actor, report).await
    }

    async fn get(&self, actor: &Actor, id: IssueId) -> Result<Issue, MaintenanceError> {
        self.store.get(actor, id).await
    }

    async fn list(&self, actor: &Actor, filter: &IssueFilter) -> Vec<Issue> {
        self.store.list(actor, filter).await
    }

    async fn transition(&self, request: TransitionRequest) -> Result<Issue, MaintenanceError> {
        self.store.transition(request).await
    }
}
