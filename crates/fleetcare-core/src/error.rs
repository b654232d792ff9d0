use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::issue::{IssueId, StateKind};
use crate::workflow::{ActionKind, Role};

/// Failures reported by the external snapshot collaborator.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("device {0} not found in roster")]
    DeviceNotFound(String),
    #[error("roster unavailable: {0}")]
    RosterUnavailable(String),
    #[error("snapshot read failed: {0}")]
    Read(String),
}

#[derive(Debug, Clone, Error)]
pub enum MaintenanceError {
    #[error("a scan is already running")]
    ScanInProgress,
    #[error("device snapshot unavailable: {reason}; {} device(s) not reached", .unreached.len())]
    DeviceSnapshotUnavailable {
        device_id: Option<String>,
        reason: String,
        unreached: Vec<String>,
    },
    #[error("cannot {action} an issue in state {state}: {detail}")]
    InvalidTransition {
        action: ActionKind,
        state: StateKind,
        detail: String,
    },
    #[error("{role} {actor_id} is not permitted to {operation}")]
    Unauthorized {
        operation: String,
        role: Role,
        actor_id: String,
    },
    #[error("issue {0} not found")]
    NotFound(IssueId),
    #[error("issue {0} already exists")]
    DuplicateIssue(IssueId),
    #[error("scan task aborted: {0}")]
    ScanAborted(String),
    #[error("could not record issue for device {device_id}: {source}")]
    IssueNotRecorded {
        device_id: String,
        #[source]
        source: Box<MaintenanceError>,
    },
    #[error("device {0} appears more than once in the fleet")]
    DuplicateDevice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ScanInProgress,
    DeviceSnapshotUnavailable,
    InvalidTransition,
    Unauthorized,
    NotFound,
    DuplicateIssue,
    ScanAborted,
    IssueNotRecorded,
    DuplicateDevice,
}

/// Wire shape handed to callers that surface errors verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl MaintenanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ScanInProgress => ErrorKind::ScanInProgress,
            Self::DeviceSnapshotUnavailable { .. } => ErrorKind::DeviceSnapshotUnavailable,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateIssue(_) => ErrorKind::DuplicateIssue,
            Self::ScanAborted(_) => ErrorKind::ScanAborted,
            Self::IssueNotRecorded { .. } => ErrorKind::IssueNotRecorded,
            Self::DuplicateDevice(_) => ErrorKind::DuplicateDevice,
        }
    }

    /// Scan-level failures clear on their own; transition rejections are caller bugs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ScanInProgress
                | Self::DeviceSnapshotUnavailable { .. }
                | Self::ScanAborted(_)
                | Self::IssueNotRecorded { .. }
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
