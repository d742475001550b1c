//! # Persistence Boundary
//!
//! The orchestration services talk to storage through the `EngineStore`
//! trait. Every read and write is scoped by team id; an entity that exists
//! under another team reads as not-found. Writes go through closure-based
//! mutations with an optional expected version, so optimistic concurrency
//! lives in one place instead of in every caller.

pub mod memory;

use crate::models::{Agent, Job, JobDefinition, Task, TaskOutcome, TaskStatus, VarValue};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("stale version for {entity} {id}: expected {expected}, found {actual}")]
    StaleVersion {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// In-place mutation applied under the store's version check.
pub type Mutation<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Team-scoped storage for definitions, runs, outcomes, agents, and shared
/// variables. `update_*` methods apply the mutation only when the entity's
/// version matches `expected_version` (when given), then bump the version and
/// return the stored copy.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // Job definitions.
    async fn insert_job_definition(&self, def: JobDefinition) -> StoreResult<()>;
    async fn get_job_definition(&self, team_id: Uuid, def_id: Uuid) -> StoreResult<JobDefinition>;
    async fn update_job_definition(
        &self,
        team_id: Uuid,
        def_id: Uuid,
        mutate: Mutation<JobDefinition>,
    ) -> StoreResult<JobDefinition>;
    /// Bump and return the definition's run counter.
    async fn next_run_id(&self, team_id: Uuid, def_id: Uuid) -> StoreResult<u64>;

    // Jobs and their tasks. Instantiation writes both together; either all
    // records land or none do.
    async fn insert_job_with_tasks(&self, job: Job, tasks: Vec<Task>) -> StoreResult<()>;
    async fn get_job(&self, team_id: Uuid, job_id: Uuid) -> StoreResult<Job>;
    async fn update_job(
        &self,
        team_id: Uuid,
        job_id: Uuid,
        expected_version: Option<u64>,
        mutate: Mutation<Job>,
    ) -> StoreResult<Job>;

    async fn insert_task(&self, task: Task) -> StoreResult<()>;
    async fn get_task(&self, team_id: Uuid, task_id: Uuid) -> StoreResult<Task>;
    async fn task_by_name(&self, team_id: Uuid, job_id: Uuid, name: &str) -> StoreResult<Task>;
    async fn tasks_for_job(&self, team_id: Uuid, job_id: Uuid) -> StoreResult<Vec<Task>>;
    /// Tasks across all of a team's jobs sitting in the given status. Used by
    /// the republish sweep for `WaitingForAgent`.
    async fn tasks_with_status(&self, team_id: Uuid, status: TaskStatus) -> StoreResult<Vec<Task>>;
    async fn update_task(
        &self,
        team_id: Uuid,
        task_id: Uuid,
        expected_version: Option<u64>,
        mutate: Mutation<Task>,
    ) -> StoreResult<Task>;

    // Task outcomes.
    async fn insert_task_outcome(&self, outcome: TaskOutcome) -> StoreResult<()>;
    async fn get_task_outcome(&self, team_id: Uuid, outcome_id: Uuid) -> StoreResult<TaskOutcome>;
    async fn outcomes_for_task(&self, team_id: Uuid, task_id: Uuid) -> StoreResult<Vec<TaskOutcome>>;
    async fn update_task_outcome(
        &self,
        team_id: Uuid,
        outcome_id: Uuid,
        expected_version: Option<u64>,
        mutate: Mutation<TaskOutcome>,
    ) -> StoreResult<TaskOutcome>;

    // Agent directory.
    async fn upsert_agent(&self, agent: Agent) -> StoreResult<()>;
    async fn get_agent(&self, team_id: Uuid, agent_id: Uuid) -> StoreResult<Agent>;
    async fn agents_for_team(&self, team_id: Uuid) -> StoreResult<Vec<Agent>>;
    async fn update_agent(
        &self,
        team_id: Uuid,
        agent_id: Uuid,
        mutate: Mutation<Agent>,
    ) -> StoreResult<Agent>;

    // Team-shared variables, lowest layer of `@var()` resolution.
    async fn team_variable(&self, team_id: Uuid, name: &str) -> StoreResult<Option<VarValue>>;
    async fn set_team_variable(&self, team_id: Uuid, name: &str, value: VarValue)
        -> StoreResult<()>;
}

pub use memory::InMemoryStore;
