use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::DeviceSnapshot;

pub type IssueId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
}

/// Where an issue came from: a fleet scan or an owner's own report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Scan,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Invoice,
    CreditCard,
    BankTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
}

/// The client's answer to a maintenance proposal. Empty until decided.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSchedule {
    pub amount: f64,
    pub scheduled_date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub start_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technician: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub withdrawn_at: DateTime<Utc>,
    pub withdrawn_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Lifecycle position of an issue. Each variant carries exactly the records
/// that exist in that state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IssueState {
    Pending {
        /// Declined decision from an earlier proposal round, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approval: Option<ApprovalRecord>,
    },
    ClientApprovalRequested {
        approval: ApprovalRecord,
    },
    PaymentScheduled {
        approval: ApprovalRecord,
        payment: PaymentSchedule,
    },
    InProgress {
        approval: ApprovalRecord,
        payment: PaymentSchedule,
        execution: ExecutionRecord,
    },
    Resolved {
        approval: ApprovalRecord,
        payment: PaymentSchedule,
        execution: ExecutionRecord,
    },
    Withdrawn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approval: Option<ApprovalRecord>,
        withdrawal: WithdrawalRecord,
    },
}

/// Payload-free discriminant of [`IssueState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Pending,
    ClientApprovalRequested,
    PaymentScheduled,
    InProgress,
    Resolved,
    Withdrawn,
}

impl StateKind {
    pub const ALL: [StateKind; 6] = [
        StateKind::Pending,
        StateKind::ClientApprovalRequested,
        StateKind::PaymentScheduled,
        StateKind::InProgress,
        StateKind::Resolved,
        StateKind::Withdrawn,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, StateKind::Resolved | StateKind::Withdrawn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateKind::Pending => "pending",
            StateKind::ClientApprovalRequested => "client_approval_requested",
            StateKind::PaymentScheduled => "payment_scheduled",
            StateKind::InProgress => "in_progress",
            StateKind::Resolved => "resolved",
            StateKind::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IssueState {
    pub fn kind(&self) -> StateKind {
        match self {
            IssueState::Pending { .. } => StateKind::Pending,
            IssueState::ClientApprovalRequested { .. } => StateKind::ClientApprovalRequested,
            IssueState::PaymentScheduled { .. } => StateKind::PaymentScheduled,
            IssueState::InProgress { .. } => StateKind::InProgress,
            IssueState::Resolved { .. } => StateKind::Resolved,
            IssueState::Withdrawn { .. } => StateKind::Withdrawn,
        }
    }

    pub fn approval(&self) -> Option<&ApprovalRecord> {
        match self {
            IssueState::Pending { approval } | IssueState::Withdrawn { approval, .. } => {
                approval.as_ref()
            }
            IssueState::ClientApprovalRequested { approval }
            | IssueState::PaymentScheduled { approval, .. }
            | IssueState::InProgress { approval, .. }
            | IssueState::Resolved { approval, .. } => Some(approval),
        }
    }

    pub fn payment(&self) -> Option<&PaymentSchedule> {
        match self {
            IssueState::PaymentScheduled { payment, .. }
            | IssueState::InProgress { payment, .. }
            | IssueState::Resolved { payment, .. } => Some(payment),
            _ => None,
        }
    }

    pub fn execution(&self) -> Option<&ExecutionRecord> {
        match self {
            IssueState::InProgress { execution, .. } | IssueState::Resolved { execution, .. } => {
                Some(execution)
            }
            _ => None,
        }
    }
}

/// What a diagnostic rule reports about one device before it becomes a tracked issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCandidate {
    pub category: Category,
    pub component: String,
    pub description: String,
    pub severity: u8,
    pub confidence: u8,
    pub impact: Impact,
    pub estimated_cost: Option<f64>,
    pub estimated_time: Option<String>,
    pub predicted_failure_date: Option<DateTime<Utc>>,
}

/// A problem an owner reports about one of their own devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualReport {
    pub device_id: String,
    pub device_name: String,
    pub component: String,
    pub description: String,
}

const MANUAL_SEVERITY: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: IssueId,
    pub device_id: String,
    pub device_name: String,
    pub owner_id: String,
    pub source: IssueSource,
    pub category: Category,
    pub component: String,
    pub description: String,
    pub severity: u8,
    pub confidence: u8,
    pub impact: Impact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_failure_date: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: IssueState,
}

impl Issue {
    /// Builds a fresh `Pending` issue from a rule hit. The owner is copied
    /// from the snapshot and never changes afterwards.
    pub fn detected(
        snapshot: &DeviceSnapshot,
        candidate: IssueCandidate,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: snapshot.id.clone(),
            device_name: snapshot.display_name().to_string(),
            owner_id: snapshot.owner_id.clone(),
            source: IssueSource::Scan,
            category: candidate.category,
            component: candidate.component,
            description: candidate.description,
            severity: candidate.severity.clamp(1, 10),
            confidence: candidate.confidence.min(100),
            impact: candidate.impact,
            estimated_cost: candidate.estimated_cost,
            estimated_time: candidate.estimated_time,
            predicted_failure_date: candidate.predicted_failure_date,
            detected_at,
            state: IssueState::Pending { approval: None },
        }
    }

    pub fn reported(owner_id: &str, report: ManualReport, reported_at: DateTime<Utc>) -> Self {
        let device_name = if report.device_name.is_empty() {
            report.device_id.clone()
        } else {
            report.device_name
        };

        Self {
            id: Uuid::new_v4(),
            device_id: report.device_id,
            device_name,
            owner_id: owner_id.to_string(),
            source: IssueSource::Manual,
            category: Category::Info,
            component: report.component,
            description: report.description,
            severity: MANUAL_SEVERITY,
            confidence: 0,
            impact: Impact::Low,
            estimated_cost: None,
            estimated_time: None,
            predicted_failure_date: None,
            detected_at: reported_at,
            state: IssueState::Pending { approval: None },
        }
    }

    pub fn state_kind(&self) -> StateKind {
        self.state.kind()
    }
}
