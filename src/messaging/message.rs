//! # Wire Messages
//!
//! Envelope types carried between the engine and agents. Dispatches flow
//! outward on per-agent queues; execution reports flow back through the
//! outcome router. Runtime variables arrive fully resolved so agents never
//! see layering or `@var()` indirection.

use crate::models::{FailureCode, StepDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Queue name for one agent's inbox.
pub fn agent_queue(team_id: Uuid, agent_id: Uuid) -> String {
    format!("team/{team_id}/agent/{agent_id}")
}

/// One task handed to one agent for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub team_id: Uuid,
    pub job_id: Uuid,
    pub task_id: Uuid,
    /// Outcome record pre-created for this agent; reports reference it.
    pub outcome_id: Uuid,
    pub task_name: String,
    pub step_defs: Vec<StepDefinition>,
    /// Resolved variables: job layer first, task layer over it.
    #[serde(default)]
    pub runtime_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub artifact_ids: Vec<Uuid>,
    /// Seconds the message stays valid in the queue; agents drop expired
    /// dispatches and report `queued_task_expired`.
    pub ttl_secs: u64,
    pub dispatched_at: DateTime<Utc>,
}

/// Engine-to-agent control signal for a task the agent already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum AgentControl {
    /// Stop the named task; the agent acknowledges with an interrupted
    /// report.
    InterruptTask { task_id: Uuid },
    /// Drop the named task without running it further; acknowledged with a
    /// cancelled report.
    CancelTask { task_id: Uuid },
}

/// Everything an agent can receive on its queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AgentEnvelope {
    Dispatch(DispatchMessage),
    Control(AgentControl),
}

/// What an agent reports back about one outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OutcomeReportKind {
    Started,
    Completed {
        /// Routing signature; matched against outbound route patterns.
        signature: String,
        #[serde(default)]
        exported_vars: BTreeMap<String, String>,
    },
    Failed {
        code: FailureCode,
        #[serde(default)]
        detail: Option<String>,
    },
    Interrupted,
    Cancelled,
}

/// Agent-to-engine execution report, addressed to a pre-created outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub team_id: Uuid,
    pub task_id: Uuid,
    pub outcome_id: Uuid,
    pub agent_id: Uuid,
    pub kind: OutcomeReportKind,
    pub reported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_queue_naming() {
        let team = Uuid::nil();
        let agent = Uuid::nil();
        assert_eq!(
            agent_queue(team, agent),
            format!("team/{team}/agent/{agent}")
        );
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = AgentEnvelope::Control(AgentControl::InterruptTask {
            task_id: Uuid::new_v4(),
        });
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"kind\":\"control\""));
        assert!(json.contains("\"action\":\"interrupt_task\""));
        let back: AgentEnvelope = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            AgentEnvelope::Control(AgentControl::InterruptTask { .. })
        ));
    }

    #[test]
    fn test_completed_report_serializes_signature() {
        let kind = OutcomeReportKind::Completed {
            signature: "ok".to_string(),
            exported_vars: BTreeMap::new(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"signature\":\"ok\""));
    }
}
