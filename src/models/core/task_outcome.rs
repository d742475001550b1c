//! # Task Outcome Entity
//!
//! A `TaskOutcome` records one agent's execution of one task. Single-target
//! tasks have one outcome per attempt; fan-out tasks get one outcome per
//! matched agent, created at dispatch so the fan-in census knows how many
//! reports to expect.

use super::task::{FailureCode, TaskStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Routing signature emitted by a completed execution. Matched (lowercased)
/// against route patterns to decide which outbound edges fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSignature {
    Ok,
    Fail,
    Interrupt,
    /// Custom signature named by the task's script.
    Route(String),
}

impl OutcomeSignature {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::Interrupt => "interrupt",
            Self::Route(name) => name,
        }
    }
}

impl From<&str> for OutcomeSignature {
    fn from(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "ok" => Self::Ok,
            "fail" => Self::Fail,
            "interrupt" => Self::Interrupt,
            other => Self::Route(other.to_string()),
        }
    }
}

/// One agent's execution record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub id: Uuid,
    pub team_id: Uuid,
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub agent_id: Uuid,
    /// Task attempt this outcome belongs to.
    #[serde(default)]
    pub attempt: u32,
    pub status: TaskStatus,
    #[serde(default)]
    pub failure_code: Option<FailureCode>,
    /// Set when the agent reports completion; drives outbound routing.
    #[serde(default)]
    pub signature: Option<OutcomeSignature>,
    /// Variables the execution exported back into the job's runtime vars.
    #[serde(default)]
    pub exported_vars: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub detail: Option<String>,
    pub dispatched_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl TaskOutcome {
    pub fn new(team_id: Uuid, job_id: Uuid, task_id: Uuid, agent_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id,
            job_id,
            task_id,
            agent_id,
            attempt: 0,
            status: TaskStatus::Published,
            failure_code: None,
            signature: None,
            exported_vars: std::collections::BTreeMap::new(),
            detail: None,
            dispatched_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            version: 0,
        }
    }

    /// Whether this outcome has received its final report. Unlike the task
    /// statuses, an interrupted outcome counts as settled: the agent has
    /// acknowledged and will not report again unless the task is
    /// re-dispatched under a new attempt.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() || self.status == TaskStatus::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_parse_well_known() {
        assert_eq!(OutcomeSignature::from("ok"), OutcomeSignature::Ok);
        assert_eq!(OutcomeSignature::from("FAIL"), OutcomeSignature::Fail);
        assert_eq!(OutcomeSignature::from("Interrupt"), OutcomeSignature::Interrupt);
    }

    #[test]
    fn test_signature_parse_custom_route_lowercases() {
        let sig = OutcomeSignature::from("Retry-Branch");
        assert_eq!(sig, OutcomeSignature::Route("retry-branch".to_string()));
        assert_eq!(sig.as_str(), "retry-branch");
    }

    #[test]
    fn test_interrupted_outcome_is_settled() {
        let mut outcome = TaskOutcome::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        assert!(!outcome.is_settled());
        outcome.status = TaskStatus::Running;
        assert!(!outcome.is_settled());
        outcome.status = TaskStatus::Interrupted;
        assert!(outcome.is_settled());
        outcome.status = TaskStatus::Succeeded;
        assert!(outcome.is_settled());
    }

    #[test]
    fn test_new_outcome_starts_published() {
        let outcome = TaskOutcome::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        assert_eq!(outcome.status, TaskStatus::Published);
        assert!(outcome.signature.is_none());
    }
}
