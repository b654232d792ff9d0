use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::WorkflowConfig;
use crate::error::MaintenanceError;
use crate::issue::{Category, Issue, IssueId, IssueSource, ManualReport, StateKind};
use crate::workflow::{self, Action, Actor, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub issue_id: IssueId,
    #[serde(flatten)]
    pub action: Action,
    pub actor: Actor,
    /// Optimistic guard: reject unless the issue is still in this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_state: Option<StateKind>,
}

impl TransitionRequest {
    pub fn new(issue_id: IssueId, action: Action, actor: Actor) -> Self {
        Self {
            issue_id,
            action,
            actor,
            expected_state: None,
        }
    }

    pub fn expecting(mut self, state: StateKind) -> Self {
        self.expected_state = Some(state);
        self
    }
}

/// Narrows a listing after role scoping has been applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueFilter {
    pub category: Option<Category>,
    pub state: Option<StateKind>,
    pub device_id: Option<String>,
    pub source: Option<IssueSource>,
}

impl IssueFilter {
    pub fn matches(&self, issue: &Issue) -> bool {
        self.category.map_or(true, |c| issue.category == c)
            && self.state.map_or(true, |s| issue.state_kind() == s)
            && self
                .device_id
                .as_deref()
                .map_or(true, |d| issue.device_id == d)
            && self.source.map_or(true, |s| issue.source == s)
    }
}

/// Authoritative collection of issues. `transition` is the only way an
/// existing issue changes.
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn create(&self, issue: Issue) -> Result<Issue, MaintenanceError>;

    /// Owner-submitted problem report. Enters the lifecycle at `Pending`.
    async fn report_manual(
        &self,
        actor: &Actor,
        report: ManualReport,
    ) -> Result<Issue, MaintenanceError>;

    /// Issues the actor cannot see answer `NotFound`.
    async fn get(&self, actor: &Actor, id: IssueId) -> Result<Issue, MaintenanceError>;

    async fn list(&self, actor: &Actor, filter: &IssueFilter) -> Vec<Issue>;

    async fn transition(&self, request: TransitionRequest) -> Result<Issue, MaintenanceError>;
}

#[derive(Default)]
struct Table {
    order: Vec<IssueId>,
    by_id: HashMap<IssueId, Arc<Mutex<Issue>>>,
}

/// In-process store. Each issue sits behind its own lock so transitions on
/// one issue are serialized without blocking the others.
pub struct MemoryIssueStore {
    clock: Arc<dyn Clock>,
    config: WorkflowConfig,
    table: RwLock<Table>,
}

impl MemoryIssueStore {
    pub fn new(clock: Arc<dyn Clock>, config: WorkflowConfig) -> Self {
        Self {
            clock,
            config,
            table: RwLock::new(Table::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn entry(&self, id: IssueId) -> Option<Arc<Mutex<Issue>>> {
        self.table.read().await.by_id.get(&id).cloned()
    }
}

#[async_trait]
impl IssueStore for MemoryIssueStore {
    async fn create(&self, issue: Issue) -> Result<Issue, MaintenanceError> {
        let mut table = self.table.write().await;
        if table.by_id.contains_key(&issue.id) {
            return Err(MaintenanceError::DuplicateIssue(issue.id));
        }

        debug!(issue_id=%issue.id, device_id=%issue.device_id, category=?issue.category, "issue created");
        table.order.push(issue.id);
        table
            .by_id
            .insert(issue.id, Arc::new(Mutex::new(issue.clone())));
        Ok(issue)
    }

    async fn report_manual(
        &self,
        actor: &Actor,
        report: ManualReport,
    ) -> Result<Issue, MaintenanceError> {
        if actor.role != Role::Owner {
            warn!(actor=%actor.id, role=%actor.role, "manual report rejected: owner role required");
            return Err(MaintenanceError::Unauthorized {
                operation: "report_issue".to_string(),
                role: actor.role,
                actor_id: actor.id.clone(),
            });
        }

        let issue = Issue::reported(&actor.id, report, self.clock.now());
        info!(issue_id=%issue.id, device_id=%issue.device_id, owner=%actor.id, "manual issue reported");
        self.create(issue).await
    }

    async fn get(&self, actor: &Actor, id: IssueId) -> Result<Issue, MaintenanceError> {
        let entry = self.entry(id).await.ok_or(MaintenanceError::NotFound(id))?;
        let issue = entry.lock().await;
        if !actor.can_view(&issue) {
            return Err(MaintenanceError::NotFound(id));
        }
        Ok(issue.clone())
    }

    async fn list(&self, actor: &Actor, filter: &IssueFilter) -> Vec<Issue> {
        let entries = {
            let table = self.table.read().await;
            table
                .order
                .iter()
                .filter_map(|id| table.by_id.get(id).cloned())
                .collect::<Vec<_>>()
        };

        let mut visible = Vec::with_capacity(entries.len());
        for entry in entries {
            let issue = entry.lock().await;
            if actor.can_view(&issue) && filter.matches(&issue) {
                visible.push(issue.clone());
            }
        }
        visible
    }

    async fn transition(&self, request: TransitionRequest) -> Result<Issue, MaintenanceError> {
        let TransitionRequest {
            issue_id,
            action,
            actor,
            expected_state,
        } = request;

        let entry = self
            .entry(issue_id)
            .await
            .ok_or(MaintenanceError::NotFound(issue_id))?;
        let mut issue = entry.lock().await;

        if !actor.can_view(&issue) {
            warn!(issue_id=%issue_id, actor=%actor.id, role=%actor.role, action=%action.kind(), "transition on foreign issue rejected");
            return Err(MaintenanceError::NotFound(issue_id));
        }

        let current = issue.state_kind();
        if let Some(expected) = expected_state {
            if expected != current {
                warn!(issue_id=%issue_id, expected=%expected, actual=%current, "stale transition rejected");
                return Err(MaintenanceError::InvalidTransition {
                    action: action.kind(),
                    state: current,
                    detail: format!("expected state {expected}"),
                });
            }
        }

        match workflow::apply(&issue, &action, &actor, self.clock.now(), &self.config) {
            Ok(next) => {
                info!(
                    issue_id=%issue_id,
                    action=%action.kind(),
                    actor=%actor.id,
                    role=%actor.role,
                    from=%current,
                    to=%next.state_kind(),
                    "issue transitioned"
                );
                *issue = next.clone();
                Ok(next)
            }
            Err(err) => {
                match &err {
                    MaintenanceError::Unauthorized { .. } => {
                        warn!(issue_id=%issue_id, action=%action.kind(), actor=%actor.id, role=%actor.role, security=true, "unauthorized transition attempt");
                    }
                    _ => {
                        warn!(issue_id=%issue_id, action=%action.kind(), state=%current, error=%err, "transition rejected");
                    }
                }
                Err(err)
            }
        }
    }
}
