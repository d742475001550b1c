//! # Task Runtime Entity
//!
//! A `Task` is one graph node inside a job run. It snapshots everything the
//! engine needs at execution time (routes, dependency maps, step payloads,
//! targeting) so a run never reads its definition again. Dependency state
//! lives in `up_dep`/`down_dep`: a task becomes eligible when `up_dep`
//! empties, and `down_dep` tells the router which siblings to notify on
//! completion.

use super::job_definition::{Route, RoutePattern, StepDefinition, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet eligible or not yet dispatched.
    NotStarted,
    /// Eligible but no live agent matched; republished on agent heartbeat.
    WaitingForAgent,
    /// Delivered to at least one agent queue, no execution report yet.
    Published,
    Running,
    /// Interrupt requested, awaiting agent acknowledgement.
    Interrupting,
    Interrupted,
    /// Cancel requested while an agent holds the task.
    Canceling,
    Succeeded,
    Cancelled,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Cancelled | Self::Failed | Self::Skipped
        )
    }

    /// Statuses from which the dispatcher may publish the task.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::NotStarted | Self::WaitingForAgent)
    }

    /// Statuses that keep the parent job from settling.
    pub fn blocks_job_completion(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::WaitingForAgent => "waiting_for_agent",
            Self::Published => "published",
            Self::Running => "running",
            Self::Interrupting => "interrupting",
            Self::Interrupted => "interrupted",
            Self::Canceling => "canceling",
            Self::Succeeded => "succeeded",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Why a task (or its dispatch attempt) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    AgentCrashed,
    NoAgentAvailable,
    AgentExecError,
    QueuedTaskExpired,
    TargetAgentNotSpecified,
    MissingTargetTags,
    LaunchTaskError,
    TaskExecError,
}

impl FailureCode {
    /// Whether an auto-restart attempt can plausibly change the result.
    /// Structural failures (bad targeting, no agents) are not retried.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::AgentExecError | Self::LaunchTaskError | Self::TaskExecError
        )
    }
}

/// One graph node inside a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub team_id: Uuid,
    pub job_id: Uuid,
    /// Unique within the job; dependency maps are keyed by name.
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub failure_code: Option<FailureCode>,
    pub target: TargetKind,
    #[serde(default)]
    pub required_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub target_agent_id: Option<String>,
    /// Inbound edges snapshotted from the definition.
    #[serde(default)]
    pub from_routes: Vec<Route>,
    /// Outbound OR-trigger edges snapshotted from the definition.
    #[serde(default)]
    pub to_routes: Vec<Route>,
    /// Unsatisfied upstream dependencies, keyed by predecessor name. The
    /// task is eligible to run once this map is empty.
    #[serde(default)]
    pub up_dep: BTreeMap<String, RoutePattern>,
    /// Siblings that list this task as a dependency; their names and the
    /// pattern under which the dependency clears.
    #[serde(default)]
    pub down_dep: Vec<Route>,
    #[serde(default)]
    pub artifact_ids: Vec<Uuid>,
    #[serde(default)]
    pub step_defs: Vec<StepDefinition>,
    /// Task-level variable overrides, layered over job vars at dispatch.
    #[serde(default)]
    pub runtime_vars: BTreeMap<String, super::job::VarValue>,
    #[serde(default)]
    pub auto_restart: bool,
    /// Remaining auto-restart budget.
    #[serde(default)]
    pub restarts_remaining: u32,
    /// Dispatch attempt counter, bumped each time the task is claimed for
    /// publishing. Outcomes are tagged with it so reports from a superseded
    /// attempt cannot join into the current one.
    #[serde(default)]
    pub attempt: u32,
    /// Agents already tried for this task; excluded from reselection.
    #[serde(default)]
    pub attempted_agent_ids: Vec<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Optimistic-concurrency version, bumped on every store write. Dispatch
    /// and status transitions compare-and-swap against it.
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// All upstream dependencies satisfied.
    pub fn is_eligible(&self) -> bool {
        self.up_dep.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
        assert!(!TaskStatus::Interrupted.is_terminal());
        assert!(!TaskStatus::Canceling.is_terminal());
    }

    #[test]
    fn test_dispatchable_statuses() {
        assert!(TaskStatus::NotStarted.is_dispatchable());
        assert!(TaskStatus::WaitingForAgent.is_dispatchable());
        assert!(!TaskStatus::Published.is_dispatchable());
        assert!(!TaskStatus::Running.is_dispatchable());
    }

    #[test]
    fn test_non_terminal_blocks_job_completion() {
        assert!(TaskStatus::Interrupted.blocks_job_completion());
        assert!(TaskStatus::WaitingForAgent.blocks_job_completion());
        assert!(!TaskStatus::Skipped.blocks_job_completion());
    }

    #[test]
    fn test_retryable_failure_codes() {
        assert!(FailureCode::AgentExecError.retryable());
        assert!(FailureCode::TaskExecError.retryable());
        assert!(FailureCode::LaunchTaskError.retryable());
        assert!(!FailureCode::NoAgentAvailable.retryable());
        assert!(!FailureCode::MissingTargetTags.retryable());
        assert!(!FailureCode::AgentCrashed.retryable());
    }
}
