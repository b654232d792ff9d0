use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ScanConfig;
use crate::error::MaintenanceError;
use crate::issue::Issue;
use crate::provider::{SnapshotProvider, StaticFleet};
use crate::rules::DiagnosticRules;
use crate::snapshot::DeviceSnapshot;
use crate::store::IssueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// What pollers and subscribers see while a scan runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub scan_id: Option<Uuid>,
    pub state: ScanState,
    /// 0-100, counted in finished stages across all devices.
    pub progress: f64,
    pub stages_done: usize,
    pub scanned_count: usize,
    pub total_count: usize,
    pub last_scan: Option<DateTime<Utc>>,
    pub next_scan: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFailure {
    pub device_id: Option<String>,
    pub reason: String,
    pub unreached: Vec<String>,
}

/// Run descriptor of one finished (or failed) scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: Uuid,
    pub state: ScanState,
    pub progress: f64,
    pub scanned_count: usize,
    pub total_count: usize,
    pub started_at: DateTime<Utc>,
    pub last_scan: Option<DateTime<Utc>>,
    pub next_scan: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScanFailure>,
}

pub struct ScanHandle {
    id: Uuid,
    status: watch::Receiver<ScanStatus>,
    task: JoinHandle<Result<Scan, MaintenanceError>>,
}

impl ScanHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.status.clone()
    }

    /// Resolves once the scan completes or fails. A failed scan still leaves
    /// its descriptor in [`ScanOrchestrator::last_scan`].
    pub async fn wait(self) -> Result<Scan, MaintenanceError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(MaintenanceError::ScanAborted(err.to_string())),
        }
    }
}

struct Inner {
    store: Arc<dyn IssueStore>,
    rules: Arc<dyn DiagnosticRules>,
    clock: Arc<dyn Clock>,
    config: ScanConfig,
    running: AtomicBool,
    status: watch::Sender<ScanStatus>,
    last_scan: Mutex<Option<Scan>>,
}

/// Drives fleet-wide scans. At most one scan runs at a time.
#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn IssueStore>,
        rules: Arc<dyn DiagnosticRules>,
        clock: Arc<dyn Clock>,
        config: ScanConfig,
    ) -> Self {
        let initial = ScanStatus {
            scan_id: None,
            state: ScanState::Idle,
            progress: 0.0,
            stages_done: 0,
            scanned_count: 0,
            total_count: 0,
            last_scan: None,
            next_scan: Some(clock.now() + interval(&config)),
            duration_seconds: None,
        };
        let (status, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                store,
                rules,
                clock,
                config,
                running: AtomicBool::new(false),
                status,
                last_scan: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn last_scan(&self) -> Option<Scan> {
        self.inner
            .last_scan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Scans a fixed list of snapshots. Device ids must be unique.
    pub fn start_scan(&self, devices: Vec<DeviceSnapshot>) -> Result<ScanHandle, MaintenanceError> {
        if let Some(id) = first_duplicate(devices.iter().map(|d| d.id.as_str())) {
            warn!(device_id = id, "scan rejected: duplicate device id");
            return Err(MaintenanceError::DuplicateDevice(id.to_string()));
        }
        self.start_scan_with(Arc::new(StaticFleet::new(devices)))
    }

    /// Starts a scan on a background task and returns immediately.
    pub fn start_scan_with(
        &self,
        provider: Arc<dyn SnapshotProvider>,
    ) -> Result<ScanHandle, MaintenanceError> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("scan requested while another scan is running");
            return Err(MaintenanceError::ScanInProgress);
        }

        let id = Uuid::new_v4();
        let started_at = self.inner.clock.now();
        self.inner.status.send_modify(|status| {
            status.scan_id = Some(id);
            status.state = ScanState::Running;
            status.progress = 0.0;
            status.stages_done = 0;
            status.scanned_count = 0;
            status.total_count = 0;
            status.duration_seconds = None;
        });
        info!(scan_id=%id, "scan started");

        let guard = RunGuard {
            inner: self.inner.clone(),
            scan_id: id,
        };
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = run_scan(inner, provider, id, started_at).await;
            drop(guard);
            result
        });

        Ok(ScanHandle {
            id,
            status: self.inner.status.subscribe(),
            task,
        })
    }
}

/// Fails the scan if its task died before publishing a final status. The
/// slot is released together with that status, never after it.
struct RunGuard {
    inner: Arc<Inner>,
    scan_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let scan_id = self.scan_id;
        let running = &self.inner.running;
        self.inner.status.send_if_modified(|status| {
            if status.scan_id == Some(scan_id) && status.state == ScanState::Running {
                status.state = ScanState::Failed;
                running.store(false, Ordering::Release);
                true
            } else {
                false
            }
        });
    }
}

enum DeviceOutcome {
    Scanned(Vec<Issue>),
    /// Issues recorded before the failure are kept.
    Failed(MaintenanceError, Vec<Issue>),
    Skipped,
}

async fn run_scan(
    inner: Arc<Inner>,
    provider: Arc<dyn SnapshotProvider>,
    scan_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<Scan, MaintenanceError> {
    let roster = match provider.roster().await {
        Ok(roster) => roster,
        Err(err) => {
            let error = MaintenanceError::DeviceSnapshotUnavailable {
                device_id: None,
                reason: err.to_string(),
                unreached: Vec::new(),
            };
            return finish(&inner, scan_id, started_at, 0, Vec::new(), Some(error), Vec::new());
        }
    };

    let total = roster.len();
    inner.status.send_modify(|status| status.total_count = total);
    if let Some(id) = first_duplicate(roster.iter().map(String::as_str)) {
        let error = MaintenanceError::DuplicateDevice(id.to_string());
        return finish(&inner, scan_id, started_at, total, Vec::new(), Some(error), roster);
    }
    debug!(scan_id=%scan_id, devices=total, stages=inner.config.stages.len(), "roster loaded");

    let semaphore = Arc::new(Semaphore::new(inner.config.max_parallel_devices.max(1)));
    let aborted = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for (index, device_id) in roster.iter().enumerate() {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        if aborted.load(Ordering::Acquire) {
            break;
        }

        let inner = inner.clone();
        let provider = provider.clone();
        let aborted = aborted.clone();
        let device_id = device_id.clone();
        tasks.spawn(async move {
            let outcome = scan_device(&inner, provider.as_ref(), &device_id, &aborted, permit).await;
            (index, device_id, outcome)
        });
    }

    let mut scanned: BTreeMap<usize, Vec<Issue>> = BTreeMap::new();
    let mut reached = HashSet::new();
    let mut error: Option<MaintenanceError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, device_id, DeviceOutcome::Scanned(issues))) => {
                reached.insert(device_id);
                scanned.insert(index, issues);
            }
            Ok((index, _, DeviceOutcome::Failed(err, partial))) => {
                scanned.insert(index, partial);
                error.get_or_insert(err);
            }
            Ok((_, _, DeviceOutcome::Skipped)) => {}
            Err(err) => {
                aborted.store(true, Ordering::Release);
                error.get_or_insert(MaintenanceError::ScanAborted(format!(
                    "device task aborted: {err}"
                )));
            }
        }
    }

    let unreached = if error.is_some() {
        not_reached(&roster, &reached)
    } else {
        Vec::new()
    };
    if let Some(MaintenanceError::DeviceSnapshotUnavailable {
        unreached: listed, ..
    }) = error.as_mut()
    {
        listed.clone_from(&unreached);
    }

    let issues = scanned.into_values().flatten().collect();
    finish(&inner, scan_id, started_at, total, issues, error, unreached)
}

async fn scan_device(
    inner: &Inner,
    provider: &dyn SnapshotProvider,
    device_id: &str,
    aborted: &AtomicBool,
    _permit: OwnedSemaphorePermit,
) -> DeviceOutcome {
    if aborted.load(Ordering::Acquire) {
        return DeviceOutcome::Skipped;
    }

    let snapshot = match provider.snapshot(device_id).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            aborted.store(true, Ordering::Release);
            warn!(device_id, error=%err, "device snapshot unavailable; stopping scan");
            let error = MaintenanceError::DeviceSnapshotUnavailable {
                device_id: Some(device_id.to_string()),
                reason: err.to_string(),
                unreached: Vec::new(),
            };
            return DeviceOutcome::Failed(error, Vec::new());
        }
    };

    let total_stages = inner.config.stages.len();
    for stage in &inner.config.stages {
        inner.clock.sleep(stage.duration).await;
        inner.status.send_modify(|status| {
            status.stages_done += 1;
            let planned = status.total_count * total_stages;
            if planned > 0 {
                let progress = (status.stages_done as f64 / planned as f64 * 100.0).min(100.0);
                status.progress = status.progress.max(progress);
            }
        });
        debug!(device_id, stage=%stage.name, "stage finished");
    }

    let now = inner.clock.now();
    let mut issues = Vec::new();
    for candidate in inner.rules.evaluate(&snapshot, now) {
        match inner.store.create(Issue::detected(&snapshot, candidate, now)).await {
            Ok(issue) => issues.push(issue),
            Err(err) => {
                aborted.store(true, Ordering::Release);
                warn!(device_id, error=%err, "failed to record issue; stopping scan");
                let error = MaintenanceError::IssueNotRecorded {
                    device_id: device_id.to_string(),
                    source: Box::new(err),
                };
                return DeviceOutcome::Failed(error, issues);
            }
        }
    }

    inner.status.send_modify(|status| status.scanned_count += 1);
    debug!(device_id, issues = issues.len(), "device scanned");
    DeviceOutcome::Scanned(issues)
}

/// Publishes the final status and releases the single-scan slot in the same
/// watch update, so anyone who observes the settled state can start again.
fn finish(
    inner: &Inner,
    scan_id: Uuid,
    started_at: DateTime<Utc>,
    total: usize,
    issues: Vec<Issue>,
    error: Option<MaintenanceError>,
    unreached: Vec<String>,
) -> Result<Scan, MaintenanceError> {
    let finished_at = inner.clock.now();
    let duration_seconds = (finished_at - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    let previous = inner.status.borrow().clone();

    let (state, progress, last_scan, next_scan) = match error {
        None => (
            ScanState::Completed,
            100.0,
            Some(finished_at),
            Some(finished_at + interval(&inner.config)),
        ),
        Some(_) => (
            ScanState::Failed,
            previous.progress,
            previous.last_scan,
            previous.next_scan,
        ),
    };

    let failure = error.as_ref().map(|err| ScanFailure {
        device_id: failed_device(err),
        reason: match err {
            MaintenanceError::DeviceSnapshotUnavailable { reason, .. } => reason.clone(),
            other => other.to_string(),
        },
        unreached,
    });

    let scan = Scan {
        id: scan_id,
        state,
        progress,
        scanned_count: previous.scanned_count,
        total_count: total,
        started_at,
        last_scan,
        next_scan,
        duration_seconds,
        issues,
        failure,
    };

    *inner
        .last_scan
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(scan.clone());

    inner.status.send_modify(|status| {
        status.state = state;
        status.progress = progress;
        status.total_count = total;
        status.last_scan = last_scan;
        status.next_scan = next_scan;
        status.duration_seconds = Some(duration_seconds);
        inner.running.store(false, Ordering::Release);
    });

    match error {
        None => {
            info!(scan_id=%scan_id, devices=total, issues=scan.issues.len(), duration_seconds, "scan completed");
            Ok(scan)
        }
        Some(err) => {
            warn!(
                scan_id=%scan_id,
                kind=?err.kind(),
                unreached=scan.failure.as_ref().map_or(0, |f| f.unreached.len()),
                issues=scan.issues.len(),
                error=%err,
                "scan failed"
            );
            Err(err)
        }
    }
}

fn failed_device(err: &MaintenanceError) -> Option<String> {
    match err {
        MaintenanceError::DeviceSnapshotUnavailable { device_id, .. } => device_id.clone(),
        MaintenanceError::IssueNotRecorded { device_id, .. } => Some(device_id.clone()),
        MaintenanceError::DuplicateDevice(device_id) => Some(device_id.clone()),
        _ => None,
    }
}

fn not_reached(roster: &[String], reached: &HashSet<String>) -> Vec<String> {
    roster
        .iter()
        .filter(|id| !reached.contains(*id))
        .cloned()
        .collect()
}

fn first_duplicate<'a>(ids: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}

fn interval(config: &ScanConfig) -> chrono::Duration {
    chrono::Duration::from_std(config.scan_interval).unwrap_or_else(|_| chrono::Duration::days(1))
}
