//! # Job Runtime Entity
//!
//! A `Job` is one materialized run of a `JobDefinition`. It snapshots the
//! runtime variables in effect at instantiation and carries the aggregate
//! status derived from the task census.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Aggregate state of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Running,
    Interrupting,
    Interrupted,
    Canceling,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether task-level actions (interrupt, cancel) may still apply.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::NotStarted | Self::Running | Self::Interrupting | Self::Canceling
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Interrupting => "interrupting",
            Self::Interrupted => "interrupted",
            Self::Canceling => "canceling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// A runtime variable value. Sensitive values are redacted from event
/// payloads and log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarValue {
    pub value: String,
    #[serde(default)]
    pub sensitive: bool,
}

impl VarValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            sensitive: false,
        }
    }

    pub fn sensitive(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            sensitive: true,
        }
    }
}

/// One run of a job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub team_id: Uuid,
    pub job_def_id: Uuid,
    pub name: String,
    /// Per-definition run counter copied at instantiation.
    pub run_id: u64,
    pub status: JobStatus,
    /// Variables in effect for this run: definition vars overlaid with
    /// caller-supplied overrides, frozen at instantiation.
    #[serde(default)]
    pub runtime_vars: BTreeMap<String, VarValue>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Optimistic-concurrency version, bumped on every store write.
    #[serde(default)]
    pub version: u64,
}
