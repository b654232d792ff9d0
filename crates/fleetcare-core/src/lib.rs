pub mod clock;
pub mod config;
pub mod error;
pub mod issue;
pub mod provider;
pub mod rules;
pub mod scanner;
pub mod snapshot;
pub mod store;
pub mod view;
pub mod workflow;

#[cfg(test)]
mod scanner_tests;
#[cfg(test)]
mod test_support;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{DiagnosticStage, ScanConfig, WorkflowConfig};
pub use error::{ErrorKind, ErrorReport, MaintenanceError, ProviderError};
pub use issue::{
    ApprovalRecord, Category, ExecutionRecord, Impact, Issue, IssueCandidate, IssueId,
    IssueSource, IssueState, ManualReport, PaymentMethod, PaymentSchedule, PaymentStatus,
    StateKind, WithdrawalRecord,
};
pub use provider::{SnapshotProvider, StaticFleet};
pub use rules::{DiagnosticRules, ReferenceRules};
pub use scanner::{Scan, ScanFailure, ScanHandle, ScanOrchestrator, ScanState, ScanStatus};
pub use snapshot::{DeviceSnapshot, DeviceStatus};
pub use store::{IssueFilter, IssueStore, MemoryIssueStore, TransitionRequest};
pub use view::{IssueSummary, IssueView};
pub use workflow::{Action, ActionKind, Actor, Role};
