use std::sync::Arc;

use chrono::Duration;

use crate::clock::FixedClock;
use crate::config::ScanConfig;
use crate::error::{ErrorKind, MaintenanceError};
use crate::issue::{Category, StateKind};
use crate::rules::ReferenceRules;
use crate::scanner::{ScanOrchestrator, ScanState};
use crate::snapshot::DeviceStatus;
use crate::store::{IssueFilter, IssueStore, MemoryIssueStore};
use crate::test_support::{
    device, fixed_clock, healthy, memory_store, t0, FailingStore, FlakyFleet, GatedFleet,
};
use crate::workflow::Actor;

fn orchestrator(
    store: Arc<MemoryIssueStore>,
    clock: Arc<FixedClock>,
    max_parallel_devices: usize,
) -> ScanOrchestrator {
    ScanOrchestrator::new(
        store,
        Arc::new(ReferenceRules),
        clock,
        ScanConfig {
            max_parallel_devices,
            ..ScanConfig::default()
        },
    )
}

#[tokio::test]
async fn degraded_maintenance_device_yields_three_issues() {
    // Arrange
    let clock = fixed_clock();
    let store = memory_store(clock.clone());
    let scanner = orchestrator(store.clone(), clock, 1);
    let device = device("MQ-002", "client2", DeviceStatus::UnderMaintenance, 85.2, 62);

    // Act
    let scan = scanner
        .start_scan(vec![device])
        .expect("scan starts")
        .wait()
        .await
        .expect("scan completes");

    // Assert
    assert_eq!(scan.issues.len(), 3);
    let categories: Vec<_> = scan.issues.iter().map(|i| (i.category, i.component.as_str())).collect();
    assert_eq!(
        categories,
        vec![
            (Category::Critical, "Motor System"),
            (Category::Warning, "Battery System"),
            (Category::Info, "General System"),
        ]
    );
    assert!(scan.issues[0].severity >= 7);
    for issue in &scan.issues {
        assert_eq!(issue.owner_id, "client2");
        assert_eq!(issue.device_id, "MQ-002");
        assert_eq!(issue.state_kind(), StateKind::Pending);
    }
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn completed_scan_records_timing_and_counts() {
    // Arrange
    let clock = fixed_clock();
    let store = memory_store(clock.clone());
    let scanner = orchestrator(store, clock, 1);
    let fleet = vec![healthy("MQ-001", "client1"), healthy("MQ-003", "client3")];

    // Act
    let scan = scanner
        .start_scan(fleet)
        .expect("scan starts")
        .wait()
        .await
        .expect("scan completes");
    let status = scanner.status();

    // Assert
    assert_eq!(scan.state, ScanState::Completed);
    assert_eq!(scan.progress, 100.0);
    assert_eq!((scan.scanned_count, scan.total_count), (2, 2));
    assert_eq!(scan.last_scan, Some(t0()));
    assert_eq!(scan.next_scan, Some(t0() + Duration::hours(24)));
    assert!(scan.issues.is_empty());
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.stages_done, 12);
    assert_eq!(status.duration_seconds, Some(0.0));
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn empty_fleet_completes_immediately() {
    let clock = fixed_clock();
    let scanner = orchestrator(memory_store(clock.clone()), clock, 2);

    let scan = scanner
        .start_scan(Vec::new())
        .expect("scan starts")
        .wait()
        .await
        .expect("scan completes");

    assert_eq!(scan.state, ScanState::Completed);
    assert_eq!(scan.progress, 100.0);
    assert_eq!(scan.total_count, 0);
}

#[tokio::test]
async fn second_scan_is_rejected_while_one_runs() {
    // Arrange
    let clock = fixed_clock();
    let store = memory_store(clock.clone());
    let scanner = orchestrator(store.clone(), clock, 1);
    let fleet = Arc::new(GatedFleet::new(vec![
        device("MQ-001", "client1", DeviceStatus::Online, 95.0, 50),
        healthy("MQ-004", "client1"),
    ]));
    let handle = scanner.start_scan_with(fleet.clone()).expect("first scan starts");
    let mut status = handle.subscribe();
    status
        .wait_for(|s| s.total_count == 2)
        .await
        .expect("roster loaded");
    let before = scanner.status();

    // Act
    let second = scanner.start_scan(vec![healthy("MQ-009", "client9")]);

    // Assert
    assert!(matches!(second, Err(MaintenanceError::ScanInProgress)));
    assert_eq!(scanner.status(), before);
    assert_eq!(before.state, ScanState::Running);
    assert_eq!(before.scan_id, Some(handle.id()));

    fleet.gate.add_permits(2);
    let scan = handle.wait().await.expect("first scan completes");
    assert_eq!(scan.total_count, 2);
    assert_eq!(scan.issues.len(), 1);
    assert!(scan.issues.iter().all(|i| i.device_id == "MQ-001"));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn snapshot_failure_keeps_partial_issues() {
    // Arrange
    let clock = fixed_clock();
    let store = memory_store(clock.clone());
    let scanner = orchestrator(store.clone(), clock, 1);
    let fleet = Arc::new(FlakyFleet::failing_on(
        vec![
            device("MQ-001", "client1", DeviceStatus::Online, 97.0, 55),
            healthy("MQ-002", "client2"),
            healthy("MQ-003", "client3"),
            device("MQ-004", "client1", DeviceStatus::Online, 97.0, 40),
        ],
        "MQ-003",
    ));

    // Act
    let result = scanner
        .start_scan_with(fleet)
        .expect("scan starts")
        .wait()
        .await;

    // Assert
    let Err(MaintenanceError::DeviceSnapshotUnavailable {
        device_id,
        unreached,
        ..
    }) = &result
    else {
        panic!("expected DeviceSnapshotUnavailable, got {result:?}");
    };
    assert_eq!(device_id.as_deref(), Some("MQ-003"));
    assert_eq!(unreached, &vec!["MQ-003".to_string(), "MQ-004".to_string()]);
    assert!(result.as_ref().err().is_some_and(|e| e.is_retryable()));

    let failed = scanner.last_scan().expect("failed scan is kept");
    assert_eq!(failed.state, ScanState::Failed);
    assert_eq!(failed.scanned_count, 2);
    assert_eq!(failed.issues.len(), 1);
    assert!(failed.last_scan.is_none());
    assert_eq!(scanner.status().state, ScanState::Failed);

    let kept = store
        .list(&Actor::operator("ops-1"), &IssueFilter::default())
        .await;
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].device_id, "MQ-001");
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn roster_failure_fails_scan_and_frees_slot() {
    let clock = fixed_clock();
    let scanner = orchestrator(memory_store(clock.clone()), clock, 1);

    let result = scanner
        .start_scan_with(Arc::new(FlakyFleet::without_roster()))
        .expect("scan starts")
        .wait()
        .await;

    assert!(matches!(
        result,
        Err(MaintenanceError::DeviceSnapshotUnavailable { device_id: None, .. })
    ));
    let retry = scanner
        .start_scan(vec![healthy("MQ-001", "client1")])
        .expect("slot released");
    assert_eq!(retry.wait().await.expect("retry completes").state, ScanState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_scan_reports_monotonic_progress_and_exact_counts() {
    // Arrange
    let clock = fixed_clock();
    let store = memory_store(clock.clone());
    let scanner = orchestrator(store.clone(), clock, 4);
    let fleet: Vec<_> = (0..10)
        .map(|n| {
            let health = if n % 2 == 0 { 45 } else { 92 };
            device(&format!("MQ-{n:03}"), "client1", DeviceStatus::Online, 99.0, health)
        })
        .collect();
    let mut updates = scanner.subscribe();
    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().clone();
            let done = status.state != ScanState::Running;
            seen.push(status);
            if done {
                break;
            }
        }
        seen
    });

    // Act
    let scan = scanner
        .start_scan(fleet)
        .expect("scan starts")
        .wait()
        .await
        .expect("scan completes");
    let seen = collector.await.expect("collector joined");

    // Assert
    assert_eq!((scan.scanned_count, scan.total_count), (10, 10));
    assert_eq!(scan.issues.len(), 5);
    let devices: Vec<_> = scan.issues.iter().map(|i| i.device_id.clone()).collect();
    let mut sorted = devices.clone();
    sorted.sort();
    assert_eq!(devices, sorted, "issues follow roster order");
    assert_eq!(store.len().await, 5);

    assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
    let last = seen.last().expect("at least one update");
    assert_eq!(last.state, ScanState::Completed);
    assert_eq!(last.progress, 100.0);
}

#[tokio::test]
async fn store_keeps_issues_across_scans() {
    // Arrange
    let clock = fixed_clock();
    let store = memory_store(clock.clone());
    let scanner = orchestrator(store.clone(), clock.clone(), 1);
    let fleet = vec![device("MQ-002", "client2", DeviceStatus::Online, 80.0, 95)];

    // Act
    let first = scanner.start_scan(fleet.clone()).expect("starts").wait().await.expect("completes");
    clock.advance(Duration::hours(1));
    let second = scanner.start_scan(fleet).expect("starts").wait().await.expect("completes");

    // Assert
    assert_eq!(first.issues.len(), 1);
    assert_eq!(second.issues.len(), 1);
    assert_ne!(first.issues[0].id, second.issues[0].id);
    assert_eq!(second.last_scan, Some(t0() + Duration::hours(1)));
    assert_eq!(store.len().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn settled_status_means_next_scan_can_start() {
    let clock = fixed_clock();
    let scanner = orchestrator(memory_store(clock.clone()), clock, 2);
    let fleet = vec![
        device("MQ-001", "client1", DeviceStatus::Online, 99.0, 60),
        healthy("MQ-002", "client2"),
    ];

    for round in 0..200 {
        // Arrange
        let handle = scanner.start_scan(fleet.clone()).expect("previous scan settled");
        let mut status = handle.subscribe();

        // Act
        status
            .wait_for(|s| s.scan_id == Some(handle.id()) && s.state == ScanState::Completed)
            .await
            .expect("scan settles");
        let next = scanner.start_scan(vec![healthy("MQ-003", "client3")]);

        // Assert
        let next = next.unwrap_or_else(|err| panic!("round {round}: {err}"));
        next.wait().await.expect("follow-up scan completes");
        handle.wait().await.expect("scan completes");
    }
}

#[tokio::test]
async fn store_failure_fails_scan_with_typed_error() {
    // Arrange
    let clock = fixed_clock();
    let store = Arc::new(FailingStore::after(1, clock.clone()));
    let scanner = ScanOrchestrator::new(
        store.clone(),
        Arc::new(ReferenceRules),
        clock,
        ScanConfig::default(),
    );
    let fleet = vec![
        device("MQ-002", "client2", DeviceStatus::UnderMaintenance, 85.2, 62),
        healthy("MQ-005", "client1"),
    ];

    // Act
    let result = scanner.start_scan(fleet).expect("scan starts").wait().await;

    // Assert
    let Err(err) = &result else {
        panic!("expected a failed scan, got {result:?}");
    };
    assert_eq!(err.kind(), ErrorKind::IssueNotRecorded);
    assert!(matches!(
        err,
        MaintenanceError::IssueNotRecorded { device_id, .. } if device_id == "MQ-002"
    ));

    let failed = scanner.last_scan().expect("failed scan is kept");
    assert_eq!(failed.state, ScanState::Failed);
    assert_eq!(failed.scanned_count, 0);
    assert_eq!(failed.issues.len(), 1, "the recorded issue is still reported");
    let failure = failed.failure.expect("failure details");
    assert_eq!(failure.device_id.as_deref(), Some("MQ-002"));
    assert_eq!(failure.unreached, vec!["MQ-002".to_string(), "MQ-005".to_string()]);
    assert_eq!(store.len().await, 1);
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn duplicate_device_ids_are_rejected_up_front() {
    // Arrange
    let clock = fixed_clock();
    let store = memory_store(clock.clone());
    let scanner = orchestrator(store.clone(), clock, 1);
    let fleet = vec![
        healthy("MQ-001", "client1"),
        device("MQ-001", "client2", DeviceStatus::Online, 50.0, 30),
    ];

    // Act
    let result = scanner.start_scan(fleet);

    // Assert
    assert!(matches!(result, Err(MaintenanceError::DuplicateDevice(id)) if id == "MQ-001"));
    assert_eq!(scanner.status().state, ScanState::Idle);
    assert!(!scanner.is_running());
    assert!(store.is_empty().await);
}
