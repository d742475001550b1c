//! # Task Dispatch
//!
//! Turns an eligible task into queue messages for the agents its targeting
//! policy selects. Selection re-evaluates liveness on every attempt, so a
//! task that found no agent parks in `WaitingForAgent` and is retried by the
//! heartbeat sweep rather than failing. The transition to `Published` is a
//! compare-and-swap on the task version, which is what stops two dispatchers
//! from double-publishing one task.

use super::Engine;
use crate::error::Result;
use crate::events::EventOperation;
use crate::messaging::{agent_queue, AgentEnvelope, DispatchMessage};
use crate::models::{
    least_utilized_order, Agent, FailureCode, Job, Task, TaskOutcome, TaskStatus, TargetKind,
};
use crate::store::StoreError;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of targeting-policy evaluation for one dispatch attempt.
enum Selection {
    Agents(Vec<Agent>),
    /// No live match right now; park and retry on heartbeat.
    NoneAvailable,
    /// The policy can never match; the task fails.
    Fatal(FailureCode),
}

impl Engine {
    /// Dispatch a task if it is eligible and dispatchable. Safe to call
    /// opportunistically: ineligible, already-published, and lost-race calls
    /// are no-ops.
    pub async fn dispatch_task(&self, team_id: Uuid, task_id: Uuid) -> Result<()> {
        let task = self.store().get_task(team_id, task_id).await?;
        if !task.status.is_dispatchable() || !task.is_eligible() {
            return Ok(());
        }
        let job = self.store().get_job(team_id, task.job_id).await?;

        let agents = match self.select_agents(&task, &job).await? {
            Selection::Agents(agents) => agents,
            Selection::NoneAvailable => {
                debug!(task = %task.name, job_id = %job.id, "no live agent matches, parking task");
                let parked = self
                    .store()
                    .update_task(
                        team_id,
                        task_id,
                        Some(task.version),
                        Box::new(|t| t.status = TaskStatus::WaitingForAgent),
                    )
                    .await;
                return swallow_stale(parked).map(|_| ());
            }
            Selection::Fatal(code) => {
                warn!(task = %task.name, job_id = %job.id, ?code, "targeting policy cannot match");
                let failed = self
                    .store()
                    .update_task(
                        team_id,
                        task_id,
                        Some(task.version),
                        Box::new(move |t| {
                            t.status = TaskStatus::Failed;
                            t.failure_code = Some(code);
                            t.completed_at = Some(Utc::now());
                        }),
                    )
                    .await;
                return match swallow_stale(failed)? {
                    // Boxed: failure settlement can dispatch downstream tasks,
                    // which recurses back into this function.
                    Some(task) => Box::pin(self.settle_failed_task(task)).await,
                    None => Ok(()),
                };
            }
        };

        // Claim the task before touching queues; a stale version means
        // another dispatcher already claimed it.
        let agent_ids: Vec<Uuid> = agents.iter().map(|a| a.id).collect();
        let claim_ids = agent_ids.clone();
        let claimed = self
            .store()
            .update_task(
                team_id,
                task_id,
                Some(task.version),
                Box::new(move |t| {
                    t.status = TaskStatus::Published;
                    t.attempt += 1;
                    for id in &claim_ids {
                        if !t.attempted_agent_ids.contains(id) {
                            t.attempted_agent_ids.push(*id);
                        }
                    }
                }),
            )
            .await;
        let Some(task) = swallow_stale(claimed)? else {
            return Ok(());
        };

        let runtime_vars = flattened_vars(&job, &task);
        for agent in &agents {
            let mut outcome = TaskOutcome::new(team_id, job.id, task.id, agent.id);
            outcome.attempt = task.attempt;
            let outcome_id = outcome.id;
            self.store().insert_task_outcome(outcome).await?;

            let message = DispatchMessage {
                team_id,
                job_id: job.id,
                task_id: task.id,
                outcome_id,
                task_name: task.name.clone(),
                step_defs: task.step_defs.clone(),
                runtime_vars: runtime_vars.clone(),
                artifact_ids: task.artifact_ids.clone(),
                ttl_secs: self.config().dispatch_ttl_secs,
                dispatched_at: Utc::now(),
            };
            self.bus()
                .publish(&agent_queue(team_id, agent.id), AgentEnvelope::Dispatch(message))
                .await?;

            self.store()
                .update_agent(
                    team_id,
                    agent.id,
                    Box::new(|a| {
                        a.num_active_tasks += 1;
                        a.last_assigned_at = Some(Utc::now());
                    }),
                )
                .await?;

            self.emit(
                team_id,
                "TaskOutcome",
                EventOperation::Create,
                serde_json::json!({"id": outcome_id, "task_id": task.id, "agent_id": agent.id}),
            );
        }

        info!(
            task = %task.name,
            job_id = %job.id,
            agents = agents.len(),
            "task published"
        );
        self.emit(
            team_id,
            "Task",
            EventOperation::Update,
            serde_json::json!({"id": task.id, "status": task.status.to_string()}),
        );
        Ok(())
    }

    /// Record a heartbeat and retry every parked task for the team. New or
    /// recovered capacity is what unblocks `WaitingForAgent`.
    pub async fn agent_heartbeat(&self, agent: Agent) -> Result<()> {
        let team_id = agent.team_id;
        self.store().upsert_agent(agent).await?;
        self.republish_waiting_tasks(team_id).await
    }

    /// Re-attempt dispatch for every task parked in `WaitingForAgent`.
    pub async fn republish_waiting_tasks(&self, team_id: Uuid) -> Result<()> {
        let waiting = self
            .store()
            .tasks_with_status(team_id, TaskStatus::WaitingForAgent)
            .await?;
        for task in waiting {
            self.dispatch_task(team_id, task.id).await?;
        }
        Ok(())
    }

    async fn select_agents(&self, task: &Task, job: &Job) -> Result<Selection> {
        let now = Utc::now();
        let liveness = self.config().agent_liveness_secs;
        let mut live: Vec<Agent> = self
            .store()
            .agents_for_team(task.team_id)
            .await?
            .into_iter()
            .filter(|a| a.is_live(now, liveness))
            .collect();

        let selection = match task.target {
            TargetKind::SingleSpecificAgent => {
                let Some(reference) = task.target_agent_id.as_deref() else {
                    return Ok(Selection::Fatal(FailureCode::TargetAgentNotSpecified));
                };
                let Some(agent_id) = self.resolve_agent_reference(reference, task, job).await? else {
                    return Ok(Selection::Fatal(FailureCode::TargetAgentNotSpecified));
                };
                match live.into_iter().find(|a| a.id == agent_id) {
                    Some(agent) => Selection::Agents(vec![agent]),
                    None => Selection::NoneAvailable,
                }
            }
            TargetKind::SingleAgent | TargetKind::SingleAgentWithTags => {
                if task.target == TargetKind::SingleAgentWithTags {
                    if task.required_tags.is_empty() {
                        return Ok(Selection::Fatal(FailureCode::MissingTargetTags));
                    }
                    live.retain(|a| a.matches_tags(&task.required_tags));
                }
                live.retain(|a| !task.attempted_agent_ids.contains(&a.id));
                live.sort_by(least_utilized_order);
                match live.into_iter().next() {
                    Some(agent) => Selection::Agents(vec![agent]),
                    None => Selection::NoneAvailable,
                }
            }
            TargetKind::AllAgents | TargetKind::AllAgentsWithTags => {
                if task.target == TargetKind::AllAgentsWithTags {
                    if task.required_tags.is_empty() {
                        return Ok(Selection::Fatal(FailureCode::MissingTargetTags));
                    }
                    live.retain(|a| a.matches_tags(&task.required_tags));
                }
                if live.is_empty() {
                    Selection::NoneAvailable
                } else {
                    Selection::Agents(live)
                }
            }
        };

        Ok(selection)
    }

    /// Resolve a pinned-agent reference: either a literal agent id or a
    /// `@var(name)` looked up through the task, job, then team variable
    /// layers.
    async fn resolve_agent_reference(
        &self,
        reference: &str,
        task: &Task,
        job: &Job,
    ) -> Result<Option<Uuid>> {
        let raw = match var_reference(reference) {
            Some(name) => {
                if let Some(v) = task.runtime_vars.get(name) {
                    Some(v.value.clone())
                } else if let Some(v) = job.runtime_vars.get(name) {
                    Some(v.value.clone())
                } else {
                    self.store()
                        .team_variable(task.team_id, name)
                        .await?
                        .map(|v| v.value)
                }
            }
            None => Some(reference.to_string()),
        };

        Ok(raw.and_then(|s| Uuid::parse_str(&s).ok()))
    }
}

/// Variables flattened for the wire: job layer first, task layer over it.
fn flattened_vars(job: &Job, task: &Task) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = job
        .runtime_vars
        .iter()
        .map(|(k, v)| (k.clone(), v.value.clone()))
        .collect();
    for (k, v) in &task.runtime_vars {
        vars.insert(k.clone(), v.value.clone());
    }
    vars
}

/// Extract `name` from a `@var(name)` reference.
fn var_reference(raw: &str) -> Option<&str> {
    raw.strip_prefix("@var(")?
        .strip_suffix(')')
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// Treat a lost version race as success; the winner did the work.
fn swallow_stale(
    result: std::result::Result<Task, StoreError>,
) -> Result<Option<Task>> {
    match result {
        Ok(task) => Ok(Some(task)),
        Err(StoreError::StaleVersion { .. }) => Ok(None),
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VarValue;

    #[test]
    fn test_var_reference_parsing() {
        assert_eq!(var_reference("@var(deploy_agent)"), Some("deploy_agent"));
        assert_eq!(var_reference("@var( padded )"), Some("padded"));
        assert_eq!(var_reference("0e2f41c8-raw-id"), None);
        assert_eq!(var_reference("var(missing_at)"), None);
    }

    #[test]
    fn test_flattened_vars_task_layer_wins() {
        let job = Job {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            job_def_id: Uuid::new_v4(),
            name: "j".to_string(),
            run_id: 1,
            status: crate::models::JobStatus::Running,
            runtime_vars: [
                ("region".to_string(), VarValue::new("us-east")),
                ("mode".to_string(), VarValue::new("full")),
            ]
            .into(),
            created_at: Utc::now(),
            completed_at: None,
            version: 0,
        };
        let mut task = Task {
            id: Uuid::new_v4(),
            team_id: job.team_id,
            job_id: job.id,
            name: "t".to_string(),
            status: TaskStatus::NotStarted,
            failure_code: None,
            target: TargetKind::SingleAgent,
            required_tags: Default::default(),
            target_agent_id: None,
            from_routes: vec![],
            to_routes: vec![],
            up_dep: Default::default(),
            down_dep: vec![],
            artifact_ids: vec![],
            step_defs: vec![],
            runtime_vars: Default::default(),
            auto_restart: false,
            restarts_remaining: 0,
            attempt: 0,
            attempted_agent_ids: vec![],
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            version: 0,
        };
        task.runtime_vars
            .insert("mode".to_string(), VarValue::new("quick"));

        let vars = flattened_vars(&job, &task);
        assert_eq!(vars["region"], "us-east");
        assert_eq!(vars["mode"], "quick");
    }
}
