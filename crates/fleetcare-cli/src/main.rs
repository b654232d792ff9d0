use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use fleetcare_core::{
    Action, Actor, Category, Clock, DeviceSnapshot, DiagnosticRules, Issue, IssueFilter, IssueId,
    IssueStore, IssueView, MaintenanceError, MemoryIssueStore, ReferenceRules, Scan, ScanConfig,
    ScanOrchestrator, ScanState, ScanStatus, SystemClock, WorkflowConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod fleet;

#[derive(Debug, Parser)]
#[command(name = "fleetcare")]
#[command(about = "Predictive maintenance scans and repair workflow for a device fleet")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Skip the simulated per-stage diagnostic latency.
    #[arg(long)]
    no_delay: bool,

    /// Number of devices diagnosed at the same time.
    #[arg(long, default_value_t = 1)]
    parallel: usize,

    /// Enable the administrative revert action.
    #[arg(long)]
    allow_override: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    Scan {
        #[arg(long)]
        fleet: PathBuf,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
        #[arg(long, default_value = "operator")]
        actor: String,
        #[arg(long, value_enum, default_value = "operator")]
        role: RoleArg,
    },
    Rules {
        #[arg(long)]
        fleet: PathBuf,
    },
    Demo {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Operator,
    Owner,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let clock: Arc<dyn Clock> = if cli.no_delay {
        Arc::new(SystemClock::scaled(0.0))
    } else {
        Arc::new(SystemClock::new())
    };
    let scan_config = ScanConfig {
        max_parallel_devices: cli.parallel.max(1),
        ..ScanConfig::default()
    };
    let workflow_config = WorkflowConfig {
        allow_admin_override: cli.allow_override,
        ..WorkflowConfig::default()
    };

    let store: Arc<dyn IssueStore> = Arc::new(MemoryIssueStore::new(clock.clone(), workflow_config));
    let scanner = ScanOrchestrator::new(
        store.clone(),
        Arc::new(ReferenceRules),
        clock,
        scan_config,
    );

    match cli.command {
        Command::Scan {
            fleet,
            format,
            actor,
            role,
        } => {
            let devices = fleet::load_fleet(&fleet)?;
            let actor = match role {
                RoleArg::Operator => Actor::operator(actor),
                RoleArg::Owner => Actor::owner(actor),
            };
            let Some(_scan) = scan_and_wait(&scanner, devices, format).await? else {
                return Ok(());
            };
            let view = IssueView::new(store, actor);
            print_issues(&view.list(&IssueFilter::default()).await, format)?;
            if format == OutputFormat::Human {
                let summary = view.summary().await;
                println!(
                    "Visible:    {} issue(s), {} awaiting {}",
                    summary.total,
                    summary.awaiting_action,
                    view.actor().role
                );
            }
        }
        Command::Rules { fleet } => {
            let devices = fleet::load_fleet(&fleet)?;
            let now = Utc::now();
            let out: Vec<_> = devices
                .iter()
                .map(|device| {
                    serde_json::json!({
                        "deviceId": device.id,
                        "candidates": ReferenceRules.evaluate(device, now),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Demo { format } => {
            run_demo(&scanner, store, format, cli.allow_override).await?;
        }
    }

    Ok(())
}

/// Starts a scan and streams its status until it settles. `None` means the
/// user interrupted before the scan finished.
async fn scan_and_wait(
    scanner: &ScanOrchestrator,
    devices: Vec<DeviceSnapshot>,
    format: OutputFormat,
) -> Result<Option<Scan>> {
    let handle = scanner.start_scan(devices)?;
    let mut updates = handle.subscribe();
    let mut printed_stages = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                return Ok(None);
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                if printed_stages != Some(status.stages_done) || status.state != ScanState::Running {
                    print_status(&status, format)?;
                    printed_stages = Some(status.stages_done);
                }
                if status.state != ScanState::Running {
                    break;
                }
            }
        }
    }

    match handle.wait().await {
        Ok(scan) => {
            info!(scan_id=%scan.id, issues=scan.issues.len(), duration_seconds=scan.duration_seconds, "scan finished");
            Ok(Some(scan))
        }
        Err(err) => {
            print_error(&err, format)?;
            bail!("scan did not complete");
        }
    }
}

async fn run_demo(
    scanner: &ScanOrchestrator,
    store: Arc<dyn IssueStore>,
    format: OutputFormat,
    allow_override: bool,
) -> Result<()> {
    let Some(scan) = scan_and_wait(scanner, fleet::demo_fleet(), format).await? else {
        return Ok(());
    };
    print_issues(&scan.issues, format)?;

    let Some(target) = scan.issues.iter().find(|i| i.category == Category::Critical) else {
        println!("No critical issue to walk through.");
        return Ok(());
    };

    let ops = IssueView::new(store.clone(), Actor::operator("ops-desk"));
    let client = IssueView::new(store, Actor::owner(target.owner_id.clone()));
    let approve = Action::Decide {
        approve: true,
        comments: Some("go ahead".to_string()),
    };

    step(&ops, target.id, Action::RequestApproval, format).await?;
    // The operator cannot answer on the client's behalf.
    step(&ops, target.id, approve.clone(), format).await?;
    step(&client, target.id, approve.clone(), format).await?;
    if allow_override {
        step(
            &ops,
            target.id,
            Action::Revert {
                reason: Some("quote revised".to_string()),
            },
            format,
        )
        .await?;
        step(&ops, target.id, Action::RequestApproval, format).await?;
        step(&client, target.id, approve, format).await?;
    }
    step(&client, target.id, Action::ConfirmPayment, format).await?;
    step(
        &ops,
        target.id,
        Action::AssignTechnician {
            technician: "Field Team A".to_string(),
        },
        format,
    )
    .await?;
    step(
        &ops,
        target.id,
        Action::Complete {
            actual_cost: target.estimated_cost.unwrap_or_default(),
            notes: Some("motor assembly serviced".to_string()),
        },
        format,
    )
    .await?;

    if format == OutputFormat::Human {
        let summary = ops.summary().await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

/// Applies one action and prints the outcome. Workflow rejections are shown,
/// not propagated.
async fn step(
    view: &IssueView,
    id: IssueId,
    action: Action,
    format: OutputFormat,
) -> Result<()> {
    let kind = action.kind();
    let actor = view.actor();
    match view.transition(id, action).await {
        Ok(issue) => match format {
            OutputFormat::Human => {
                println!("{:<18} by {:<9} {:<8} -> {}", kind, actor.id, actor.role, issue.state_kind());
            }
            _ => print_issues(std::slice::from_ref(&issue), format)?,
        },
        Err(err) => {
            if format == OutputFormat::Human {
                print!("{:<18} by {:<9} {:<8} rejected: ", kind, actor.id, actor.role);
            }
            print_error(&err, format)?;
        }
    }
    Ok(())
}

fn print_status(status: &ScanStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {}
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(status)?);
        }
        OutputFormat::Human => {
            println!(
                "Scan:       {:>5.1}% devices={}/{} stages={} state={:?}",
                status.progress,
                status.scanned_count,
                status.total_count,
                status.stages_done,
                status.state,
            );
            if status.state == ScanState::Completed {
                if let Some(next) = status.next_scan {
                    println!("Next scan:  {}", next.to_rfc3339());
                }
            }
        }
    }
    Ok(())
}

fn print_issues(issues: &[Issue], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(issues)?);
        }
        OutputFormat::Ndjson => {
            for issue in issues {
                println!("{}", serde_json::to_string(issue)?);
            }
        }
        OutputFormat::Human => {
            println!("=== Issues ({}) ===", issues.len());
            for issue in issues {
                println!(
                    "[{:?}] {} on {} ({}) severity={} confidence={}% state={}",
                    issue.category,
                    issue.component,
                    issue.device_name,
                    issue.owner_id,
                    issue.severity,
                    issue.confidence,
                    issue.state_kind(),
                );
                println!("  {}", issue.description);
                if let Some(cost) = issue.estimated_cost {
                    println!(
                        "  estimate ${cost:.2}, {}",
                        issue.estimated_time.as_deref().unwrap_or("n/a")
                    );
                }
                if let Some(date) = issue.predicted_failure_date {
                    println!("  failure expected by {}", date.format("%Y-%m-%d"));
                }
            }
        }
    }
    Ok(())
}

fn print_error(err: &MaintenanceError, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => println!("{err}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&err.report())?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(&err.report())?),
    }
    Ok(())
}
