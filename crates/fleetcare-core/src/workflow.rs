//! Issue lifecycle state machine.
//!
//! `apply` is pure: it validates an action against the current state, the
//! caller's role and identity, and returns the next issue. The input issue is
//! never touched, so a rejected action leaves nothing half-applied.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WorkflowConfig;
use crate::error::MaintenanceError;
use crate::issue::{
    ApprovalRecord, ExecutionRecord, Issue, IssueState, PaymentMethod, PaymentSchedule,
    PaymentStatus, StateKind, WithdrawalRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Manages the fleet; proposes and completes maintenance.
    Operator,
    /// Owns devices; approves and pays for maintenance on them.
    Owner,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Operator => f.write_str("operator"),
            Role::Owner => f.write_str("owner"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn operator(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Operator,
        }
    }

    pub fn owner(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Owner,
        }
    }

    /// Whether this actor may see the issue at all.
    pub fn can_view(&self, issue: &Issue) -> bool {
        match self.role {
            Role::Operator => true,
            Role::Owner => issue.owner_id == self.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Action {
    RequestApproval,
    Decide {
        approve: bool,
        #[serde(default)]
        comments: Option<String>,
    },
    SchedulePayment {
        method: PaymentMethod,
        scheduled_date: DateTime<Utc>,
    },
    MarkOverdue,
    ConfirmPayment,
    AssignTechnician {
        technician: String,
    },
    Complete {
        actual_cost: f64,
        #[serde(default)]
        notes: Option<String>,
    },
    Withdraw {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Administrative override, disabled unless configured.
    Revert {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RequestApproval,
    Decide,
    SchedulePayment,
    MarkOverdue,
    ConfirmPayment,
    AssignTechnician,
    Complete,
    Withdraw,
    Revert,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::RequestApproval,
        ActionKind::Decide,
        ActionKind::SchedulePayment,
        ActionKind::MarkOverdue,
        ActionKind::ConfirmPayment,
        ActionKind::AssignTechnician,
        ActionKind::Complete,
        ActionKind::Withdraw,
        ActionKind::Revert,
    ];
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::RequestApproval => "request_approval",
            ActionKind::Decide => "decide",
            ActionKind::SchedulePayment => "schedule_payment",
            ActionKind::MarkOverdue => "mark_overdue",
            ActionKind::ConfirmPayment => "confirm_payment",
            ActionKind::AssignTechnician => "assign_technician",
            ActionKind::Complete => "complete",
            ActionKind::Withdraw => "withdraw",
            ActionKind::Revert => "revert",
        };
        f.pad(name)
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::RequestApproval => ActionKind::RequestApproval,
            Action::Decide { .. } => ActionKind::Decide,
            Action::SchedulePayment { .. } => ActionKind::SchedulePayment,
            Action::MarkOverdue => ActionKind::MarkOverdue,
            Action::ConfirmPayment => ActionKind::ConfirmPayment,
            Action::AssignTechnician { .. } => ActionKind::AssignTechnician,
            Action::Complete { .. } => ActionKind::Complete,
            Action::Withdraw { .. } => ActionKind::Withdraw,
            Action::Revert { .. } => ActionKind::Revert,
        }
    }
}

/// The single role allowed to invoke an action.
pub fn authorized_role(action: ActionKind) -> Role {
    match action {
        ActionKind::Decide | ActionKind::SchedulePayment | ActionKind::ConfirmPayment => {
            Role::Owner
        }
        ActionKind::RequestApproval
        | ActionKind::MarkOverdue
        | ActionKind::AssignTechnician
        | ActionKind::Complete
        | ActionKind::Withdraw
        | ActionKind::Revert => Role::Operator,
    }
}

/// States an action may be invoked from.
pub fn valid_from(action: ActionKind) -> &'static [StateKind] {
    match action {
        ActionKind::RequestApproval => &[StateKind::Pending],
        ActionKind::Decide => &[StateKind::ClientApprovalRequested],
        ActionKind::SchedulePayment
        | ActionKind::MarkOverdue
        | ActionKind::ConfirmPayment
        | ActionKind::Revert => &[StateKind::PaymentScheduled],
        ActionKind::AssignTechnician | ActionKind::Complete => &[StateKind::InProgress],
        ActionKind::Withdraw => &[StateKind::Pending, StateKind::ClientApprovalRequested],
    }
}

pub fn is_valid_transition(from: StateKind, action: ActionKind) -> bool {
    valid_from(action).contains(&from)
}

/// Validate `action` against `issue` and return the next version of the issue.
pub fn apply(
    issue: &Issue,
    action: &Action,
    actor: &Actor,
    now: DateTime<Utc>,
    config: &WorkflowConfig,
) -> Result<Issue, MaintenanceError> {
    let kind = action.kind();
    let from = issue.state_kind();

    if !is_valid_transition(from, kind) {
        return Err(invalid(kind, from, "action not available from this state"));
    }

    if actor.role != authorized_role(kind) {
        return Err(unauthorized(kind, actor));
    }

    // Approval and payment belong to the client that owns the device.
    if actor.role == Role::Owner && actor.id != issue.owner_id {
        return Err(unauthorized(kind, actor));
    }

    let state = next_state(issue, action, actor, now, config)?;

    Ok(Issue {
        state,
        ..issue.clone()
    })
}

fn next_state(
    issue: &Issue,
    action: &Action,
    actor: &Actor,
    now: DateTime<Utc>,
    config: &WorkflowConfig,
) -> Result<IssueState, MaintenanceError> {
    let kind = action.kind();
    let from = issue.state_kind();

    let state = match (&issue.state, action) {
        (IssueState::Pending { .. }, Action::RequestApproval) => {
            IssueState::ClientApprovalRequested {
                approval: ApprovalRecord::default(),
            }
        }
        (IssueState::ClientApprovalRequested { .. }, Action::Decide { approve, comments }) => {
            let approval = ApprovalRecord {
                approved: *approve,
                decided_at: Some(now),
                decided_by: Some(actor.id.clone()),
                comments: comments.clone(),
            };

            if *approve {
                IssueState::PaymentScheduled {
                    approval,
                    payment: PaymentSchedule {
                        amount: issue
                            .estimated_cost
                            .filter(|cost| *cost > 0.0)
                            .unwrap_or(config.default_payment_amount),
                        scheduled_date: now + lead_time(config),
                        method: config.default_payment_method,
                        status: PaymentStatus::Pending,
                    },
                }
            } else {
                IssueState::Pending {
                    approval: Some(approval),
                }
            }
        }
        (
            IssueState::PaymentScheduled { approval, payment },
            Action::SchedulePayment {
                method,
                scheduled_date,
            },
        ) => {
            if payment.status == PaymentStatus::Paid {
                return Err(invalid(kind, from, "payment already settled"));
            }
            if *scheduled_date < now {
                return Err(invalid(kind, from, "scheduled date lies in the past"));
            }
            IssueState::PaymentScheduled {
                approval: approval.clone(),
                payment: PaymentSchedule {
                    method: *method,
                    scheduled_date: *scheduled_date,
                    status: PaymentStatus::Pending,
                    ..payment.clone()
                },
            }
        }
        (IssueState::PaymentScheduled { approval, payment }, Action::MarkOverdue) => {
            if payment.status != PaymentStatus::Pending {
                return Err(invalid(kind, from, "payment is not pending"));
            }
            if now <= payment.scheduled_date {
                return Err(invalid(kind, from, "payment is not yet due"));
            }
            IssueState::PaymentScheduled {
                approval: approval.clone(),
                payment: PaymentSchedule {
                    status: PaymentStatus::Overdue,
                    ..payment.clone()
                },
            }
        }
        (IssueState::PaymentScheduled { approval, payment }, Action::ConfirmPayment) => {
            IssueState::InProgress {
                approval: approval.clone(),
                payment: PaymentSchedule {
                    status: PaymentStatus::Paid,
                    ..payment.clone()
                },
                execution: ExecutionRecord {
                    start_date: now,
                    technician: None,
                    completed_date: None,
                    actual_cost: None,
                    notes: None,
                },
            }
        }
        (IssueState::PaymentScheduled { approval, .. }, Action::Revert { .. }) => {
            if !config.allow_admin_override {
                return Err(invalid(kind, from, "administrative override is disabled"));
            }
            IssueState::Pending {
                approval: Some(approval.clone()),
            }
        }
        (
            IssueState::InProgress {
                approval,
                payment,
                execution,
            },
            Action::AssignTechnician { technician },
        ) => {
            let technician = technician.trim();
            if technician.is_empty() {
                return Err(invalid(kind, from, "technician name is empty"));
            }
            IssueState::InProgress {
                approval: approval.clone(),
                payment: payment.clone(),
                execution: ExecutionRecord {
                    technician: Some(technician.to_string()),
                    ..execution.clone()
                },
            }
        }
        (
            IssueState::InProgress {
                approval,
                payment,
                execution,
            },
            Action::Complete { actual_cost, notes },
        ) => {
            if !actual_cost.is_finite() || *actual_cost < 0.0 {
                return Err(invalid(kind, from, "actual cost must be a non-negative amount"));
            }
            IssueState::Resolved {
                approval: approval.clone(),
                payment: payment.clone(),
                execution: ExecutionRecord {
                    completed_date: Some(now),
                    actual_cost: Some(*actual_cost),
                    notes: notes.clone(),
                    ..execution.clone()
                },
            }
        }
        (IssueState::Pending { approval }, Action::Withdraw { reason }) => IssueState::Withdrawn {
            approval: approval.clone(),
            withdrawal: withdrawal(actor, now, reason),
        },
        (IssueState::ClientApprovalRequested { approval }, Action::Withdraw { reason }) => {
            IssueState::Withdrawn {
                approval: Some(approval.clone()),
                withdrawal: withdrawal(actor, now, reason),
            }
        }
        _ => return Err(invalid(kind, from, "action not available from this state")),
    };

    Ok(state)
}

fn withdrawal(actor: &Actor, now: DateTime<Utc>, reason: &Option<String>) -> WithdrawalRecord {
    WithdrawalRecord {
        withdrawn_at: now,
        withdrawn_by: actor.id.clone(),
        reason: reason.clone(),
    }
}

fn lead_time(config: &WorkflowConfig) -> chrono::Duration {
    chrono::Duration::from_std(config.payment_lead_time).unwrap_or_else(|_| chrono::Duration::days(7))
}

fn invalid(action: ActionKind, state: StateKind, detail: &str) -> MaintenanceError {
    MaintenanceError::InvalidTransition {
        action,
        state,
        detail: detail.to_string(),
    }
}

fn unauthorized(action: ActionKind, actor: &Actor) -> MaintenanceError {
    MaintenanceError::Unauthorized {
        operation: action.to_string(),
        role: actor.role,
        actor_id: actor.id.clone(),
    }
}
