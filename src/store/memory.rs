//! # In-Memory Store
//!
//! Reference `EngineStore` backed by concurrent maps. Versioned updates take
//! the entry's shard lock for the read-mutate-bump sequence, which is what
//! makes the compare-and-swap atomic.

use super::{EngineStore, Mutation, StoreError, StoreResult};
use crate::models::{Agent, Job, JobDefinition, Task, TaskOutcome, TaskStatus, VarValue};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    job_defs: DashMap<Uuid, JobDefinition>,
    jobs: DashMap<Uuid, Job>,
    tasks: DashMap<Uuid, Task>,
    outcomes: DashMap<Uuid, TaskOutcome>,
    agents: DashMap<Uuid, Agent>,
    team_vars: DashMap<(Uuid, String), VarValue>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version(
    entity: &'static str,
    id: Uuid,
    expected: Option<u64>,
    actual: u64,
) -> StoreResult<()> {
    match expected {
        Some(expected) if expected != actual => Err(StoreError::StaleVersion {
            entity,
            id: id.to_string(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl EngineStore for InMemoryStore {
    async fn insert_job_definition(&self, def: JobDefinition) -> StoreResult<()> {
        if self.job_defs.contains_key(&def.id) {
            return Err(StoreError::Duplicate {
                entity: "JobDefinition",
                id: def.id.to_string(),
            });
        }
        self.job_defs.insert(def.id, def);
        Ok(())
    }

    async fn get_job_definition(&self, team_id: Uuid, def_id: Uuid) -> StoreResult<JobDefinition> {
        self.job_defs
            .get(&def_id)
            .filter(|d| d.team_id == team_id)
            .map(|d| d.clone())
            .ok_or_else(|| StoreError::not_found("JobDefinition", def_id))
    }

    async fn update_job_definition(
        &self,
        team_id: Uuid,
        def_id: Uuid,
        mutate: Mutation<JobDefinition>,
    ) -> StoreResult<JobDefinition> {
        let mut entry = self
            .job_defs
            .get_mut(&def_id)
            .filter(|d| d.team_id == team_id)
            .ok_or_else(|| StoreError::not_found("JobDefinition", def_id))?;
        mutate(&mut entry);
        Ok(entry.clone())
    }

    async fn next_run_id(&self, team_id: Uuid, def_id: Uuid) -> StoreResult<u64> {
        let mut entry = self
            .job_defs
            .get_mut(&def_id)
            .filter(|d| d.team_id == team_id)
            .ok_or_else(|| StoreError::not_found("JobDefinition", def_id))?;
        entry.last_run_id += 1;
        Ok(entry.last_run_id)
    }

    async fn insert_job_with_tasks(&self, job: Job, tasks: Vec<Task>) -> StoreResult<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate {
                entity: "Job",
                id: job.id.to_string(),
            });
        }
        self.jobs.insert(job.id, job);
        for task in tasks {
            self.tasks.insert(task.id, task);
        }
        Ok(())
    }

    async fn get_job(&self, team_id: Uuid, job_id: Uuid) -> StoreResult<Job> {
        self.jobs
            .get(&job_id)
            .filter(|j| j.team_id == team_id)
            .map(|j| j.clone())
            .ok_or_else(|| StoreError::not_found("Job", job_id))
    }

    async fn update_job(
        &self,
        team_id: Uuid,
        job_id: Uuid,
        expected_version: Option<u64>,
        mutate: Mutation<Job>,
    ) -> StoreResult<Job> {
        let mut entry = self
            .jobs
            .get_mut(&job_id)
            .filter(|j| j.team_id == team_id)
            .ok_or_else(|| StoreError::not_found("Job", job_id))?;
        check_version("Job", job_id, expected_version, entry.version)?;
        mutate(&mut entry);
        entry.version += 1;
        Ok(entry.clone())
    }

    async fn insert_task(&self, task: Task) -> StoreResult<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate {
                entity: "Task",
                id: task.id.to_string(),
            });
        }
        self.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, team_id: Uuid, task_id: Uuid) -> StoreResult<Task> {
        self.tasks
            .get(&task_id)
            .filter(|t| t.team_id == team_id)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::not_found("Task", task_id))
    }

    async fn task_by_name(&self, team_id: Uuid, job_id: Uuid, name: &str) -> StoreResult<Task> {
        self.tasks
            .iter()
            .find(|t| t.team_id == team_id && t.job_id == job_id && t.name == name)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::not_found("Task", name))
    }

    async fn tasks_for_job(&self, team_id: Uuid, job_id: Uuid) -> StoreResult<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.team_id == team_id && t.job_id == job_id)
            .map(|t| t.clone())
            .collect())
    }

    async fn tasks_with_status(&self, team_id: Uuid, status: TaskStatus) -> StoreResult<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.team_id == team_id && t.status == status)
            .map(|t| t.clone())
            .collect())
    }

    async fn update_task(
        &self,
        team_id: Uuid,
        task_id: Uuid,
        expected_version: Option<u64>,
        mutate: Mutation<Task>,
    ) -> StoreResult<Task> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .filter(|t| t.team_id == team_id)
            .ok_or_else(|| StoreError::not_found("Task", task_id))?;
        check_version("Task", task_id, expected_version, entry.version)?;
        mutate(&mut entry);
        entry.version += 1;
        Ok(entry.clone())
    }

    async fn insert_task_outcome(&self, outcome: TaskOutcome) -> StoreResult<()> {
        if self.outcomes.contains_key(&outcome.id) {
            return Err(StoreError::Duplicate {
                entity: "TaskOutcome",
                id: outcome.id.to_string(),
            });
        }
        self.outcomes.insert(outcome.id, outcome);
        Ok(())
    }

    async fn get_task_outcome(&self, team_id: Uuid, outcome_id: Uuid) -> StoreResult<TaskOutcome> {
        self.outcomes
            .get(&outcome_id)
            .filter(|o| o.team_id == team_id)
            .map(|o| o.clone())
            .ok_or_else(|| StoreError::not_found("TaskOutcome", outcome_id))
    }

    async fn outcomes_for_task(
        &self,
        team_id: Uuid,
        task_id: Uuid,
    ) -> StoreResult<Vec<TaskOutcome>> {
        Ok(self
            .outcomes
            .iter()
            .filter(|o| o.team_id == team_id && o.task_id == task_id)
            .map(|o| o.clone())
            .collect())
    }

    async fn update_task_outcome(
        &self,
        team_id: Uuid,
        outcome_id: Uuid,
        expected_version: Option<u64>,
        mutate: Mutation<TaskOutcome>,
    ) -> StoreResult<TaskOutcome> {
        let mut entry = self
            .outcomes
            .get_mut(&outcome_id)
            .filter(|o| o.team_id == team_id)
            .ok_or_else(|| StoreError::not_found("TaskOutcome", outcome_id))?;
        check_version("TaskOutcome", outcome_id, expected_version, entry.version)?;
        mutate(&mut entry);
        entry.version += 1;
        Ok(entry.clone())
    }

    async fn upsert_agent(&self, agent: Agent) -> StoreResult<()> {
        self.agents.insert(agent.id, agent);
        Ok(())
    }

    async fn get_agent(&self, team_id: Uuid, agent_id: Uuid) -> StoreResult<Agent> {
        self.agents
            .get(&agent_id)
            .filter(|a| a.team_id == team_id)
            .map(|a| a.clone())
            .ok_or_else(|| StoreError::not_found("Agent", agent_id))
    }

    async fn agents_for_team(&self, team_id: Uuid) -> StoreResult<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|a| a.team_id == team_id)
            .map(|a| a.clone())
            .collect())
    }

    async fn update_agent(
        &self,
        team_id: Uuid,
        agent_id: Uuid,
        mutate: Mutation<Agent>,
    ) -> StoreResult<Agent> {
        let mut entry = self
            .agents
            .get_mut(&agent_id)
            .filter(|a| a.team_id == team_id)
            .ok_or_else(|| StoreError::not_found("Agent", agent_id))?;
        mutate(&mut entry);
        entry.version += 1;
        Ok(entry.clone())
    }

    async fn team_variable(&self, team_id: Uuid, name: &str) -> StoreResult<Option<VarValue>> {
        Ok(self
            .team_vars
            .get(&(team_id, name.to_string()))
            .map(|v| v.clone()))
    }

    async fn set_team_variable(
        &self,
        team_id: Uuid,
        name: &str,
        value: VarValue,
    ) -> StoreResult<()> {
        self.team_vars.insert((team_id, name.to_string()), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetKind;
    use chrono::Utc;

    fn task(team_id: Uuid, job_id: Uuid, name: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            team_id,
            job_id,
            name: name.to_string(),
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
        }
    }

    #[tokio::test]
    async fn test_tenant_isolation_on_reads() {
        let store = InMemoryStore::new();
        let team_a = Uuid::new_v4();
        let team_b = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let t = task(team_a, job_id, "A");
        let task_id = t.id;
        store.insert_task(t).await.unwrap();

        assert!(store.get_task(team_a, task_id).await.is_ok());
        assert!(matches!(
            store.get_task(team_b, task_id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_versioned_update_rejects_stale_writer() {
        let store = InMemoryStore::new();
        let team = Uuid::new_v4();
        let t = task(team, Uuid::new_v4(), "A");
        let task_id = t.id;
        store.insert_task(t).await.unwrap();

        let updated = store
            .update_task(
                team,
                task_id,
                Some(0),
                Box::new(|t| t.status = TaskStatus::Published),
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 1);

        // A second writer still holding version 0 loses.
        let stale = store
            .update_task(
                team,
                task_id,
                Some(0),
                Box::new(|t| t.status = TaskStatus::Running),
            )
            .await;
        assert!(matches!(stale, Err(StoreError::StaleVersion { .. })));
    }

    #[tokio::test]
    async fn test_next_run_id_is_monotonic() {
        let store = InMemoryStore::new();
        let team = Uuid::new_v4();
        let def = JobDefinition::new(team, "counter", vec![]);
        let def_id = def.id;
        store.insert_job_definition(def).await.unwrap();

        assert_eq!(store.next_run_id(team, def_id).await.unwrap(), 1);
        assert_eq!(store.next_run_id(team, def_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tasks_with_status_filters_by_team_and_status() {
        let store = InMemoryStore::new();
        let team = Uuid::new_v4();
        let job_id = Uuid::new_v4();

        let mut waiting = task(team, job_id, "W");
        waiting.status = TaskStatus::WaitingForAgent;
        store.insert_task(waiting).await.unwrap();
        store.insert_task(task(team, job_id, "N")).await.unwrap();

        let found = store
            .tasks_with_status(team, TaskStatus::WaitingForAgent)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "W");
    }
}
