use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::MaintenanceError;
use crate::issue::{Category, Issue, IssueId, ManualReport, StateKind};
use crate::store::{IssueFilter, IssueStore, TransitionRequest};
use crate::workflow::{authorized_role, Action, ActionKind, Actor};

/// Counts behind the per-category and per-state tabs of a dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_state: BTreeMap<String, usize>,
    pub awaiting_action: usize,
}

/// Read projection of the store bound to one actor. Every path, including
/// search and export, is scoped the same way as `list`.
#[derive(Clone)]
pub struct IssueView {
    store: Arc<dyn IssueStore>,
    actor: Actor,
}

impl IssueView {
    pub fn new(store: Arc<dyn IssueStore>, actor: Actor) -> Self {
        Self { store, actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub async fn list(&self, filter: &IssueFilter) -> Vec<Issue> {
        self.store.list(&self.actor, filter).await
    }

    pub async fn get(&self, id: IssueId) -> Result<Issue, MaintenanceError> {
        self.store.get(&self.actor, id).await
    }

    /// Case-insensitive match on component, description and device name.
    pub async fn search(&self, text: &str) -> Vec<Issue> {
        let needle = text.trim().to_lowercase();
        let issues = self.list(&IssueFilter::default()).await;
        if needle.is_empty() {
            return issues;
        }

        issues
            .into_iter()
            .filter(|issue| {
                issue.component.to_lowercase().contains(&needle)
                    || issue.description.to_lowercase().contains(&needle)
                    || issue.device_name.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub async fn summary(&self) -> IssueSummary {
        let issues = self.list(&IssueFilter::default()).await;
        let mut summary = IssueSummary {
            total: issues.len(),
            ..IssueSummary::default()
        };

        for issue in &issues {
            *summary
                .by_category
                .entry(category_label(issue.category).to_string())
                .or_default() += 1;
            *summary
                .by_state
                .entry(issue.state_kind().to_string())
                .or_default() += 1;
            if self.awaits_actor(issue) {
                summary.awaiting_action += 1;
            }
        }

        summary
    }

    pub async fn export_json(&self, filter: &IssueFilter) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.list(filter).await)
    }

    pub async fn transition(&self, id: IssueId, action: Action) -> Result<Issue, MaintenanceError> {
        self.store
            .transition(TransitionRequest::new(id, action, self.actor.clone()))
            .await
    }

    pub async fn report(&self, report: ManualReport) -> Result<Issue, MaintenanceError> {
        self.store.report_manual(&self.actor, report).await
    }

    /// Whether the next step of the issue belongs to this view's actor.
    fn awaits_actor(&self, issue: &Issue) -> bool {
        let next = match issue.state_kind() {
            StateKind::Pending => ActionKind::RequestApproval,
            StateKind::ClientApprovalRequested => ActionKind::Decide,
            StateKind::PaymentScheduled => ActionKind::ConfirmPayment,
            StateKind::InProgress => ActionKind::Complete,
            StateKind::Resolved | StateKind::Withdrawn => return false,
        };
        authorized_role(next) == self.actor.role
    }
}

fn category_label(category: Category) -> &'static str {
    match category {
        Category::Critical => "critical",
        Category::Warning => "warning",
        Category::Info => "info",
    }
}
