//! # Job Instantiation
//!
//! Materializes a run from a definition: validates the definition (including
//! a cycle check, since edits and instantiation may race), snapshots every
//! task with its dependency maps, writes the whole run atomically, then
//! dispatches the root tasks. After the snapshot the run never reads its
//! definition again.

use super::Engine;
use crate::error::{EngineError, Result};
use crate::events::EventOperation;
use crate::graph::{find_cycle, GraphModel};
use crate::models::{
    Job, JobDefinition, JobStatus, Route, Task, TaskStatus, VarValue,
};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

impl Engine {
    /// Create and launch one run of a definition. `var_overrides` layer over
    /// the definition's runtime variables for this run only.
    pub async fn create_job(
        &self,
        team_id: Uuid,
        def_id: Uuid,
        var_overrides: BTreeMap<String, VarValue>,
    ) -> Result<Job> {
        let def = self.store().get_job_definition(team_id, def_id).await?;
        let job = self.instantiate(&def, var_overrides).await?;

        // Roots have no dependencies; everything else waits on routing.
        for name in def.root_task_names() {
            let task = self.store().task_by_name(team_id, job.id, name).await?;
            self.dispatch_task(team_id, task.id).await?;
        }

        Ok(job)
    }

    /// Validate, snapshot, and atomically persist a run with all its tasks.
    /// Nothing is written unless the whole run can be.
    async fn instantiate(
        &self,
        def: &JobDefinition,
        var_overrides: BTreeMap<String, VarValue>,
    ) -> Result<Job> {
        def.validate()?;
        let graph = GraphModel::build(&def.task_defs)?;
        if let Some(cycle) = find_cycle(&graph) {
            return Err(EngineError::CyclicDefinition { cycle });
        }

        let run_id = self.store().next_run_id(def.team_id, def.id).await?;

        let mut runtime_vars = def.runtime_vars.clone();
        runtime_vars.extend(var_overrides);

        let job = Job {
            id: Uuid::new_v4(),
            team_id: def.team_id,
            job_def_id: def.id,
            name: format!("{} - {run_id}", def.name),
            run_id,
            status: JobStatus::NotStarted,
            runtime_vars,
            created_at: Utc::now(),
            completed_at: None,
            version: 0,
        };

        let down_deps = generate_downstream_dependencies(def);
        let tasks: Vec<Task> = def
            .task_defs
            .iter()
            .map(|task_def| {
                let up_dep: BTreeMap<String, crate::models::RoutePattern> = task_def
                    .from_routes
                    .iter()
                    .map(|r| (r.task_name.clone(), r.pattern.clone()))
                    .collect();
                let restarts_remaining = if task_def.auto_restart {
                    def.max_auto_restarts
                        .unwrap_or(self.config().max_auto_restarts)
                } else {
                    0
                };

                Task {
                    id: Uuid::new_v4(),
                    team_id: def.team_id,
                    job_id: job.id,
                    name: task_def.name.clone(),
                    status: TaskStatus::NotStarted,
                    failure_code: None,
                    target: task_def.target,
                    required_tags: task_def.required_tags.clone(),
                    target_agent_id: task_def.target_agent_id.clone(),
                    from_routes: task_def.from_routes.clone(),
                    to_routes: task_def.to_routes.clone(),
                    up_dep,
                    down_dep: down_deps.get(&task_def.name).cloned().unwrap_or_default(),
                    artifact_ids: task_def.artifact_ids.clone(),
                    step_defs: task_def.step_defs.clone(),
                    runtime_vars: BTreeMap::new(),
                    auto_restart: task_def.auto_restart,
                    restarts_remaining,
                    attempt: 0,
                    attempted_agent_ids: Vec::new(),
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    version: 0,
                }
            })
            .collect();

        let task_count = tasks.len();
        self.store()
            .insert_job_with_tasks(job.clone(), tasks)
            .await?;

        info!(
            job_id = %job.id,
            definition = %def.name,
            run_id,
            task_count,
            "job instantiated"
        );
        self.emit(
            def.team_id,
            "Job",
            EventOperation::Create,
            serde_json::json!({"id": job.id, "status": job.status.to_string(), "run_id": run_id}),
        );

        Ok(job)
    }
}

/// Invert every task's inbound routes into its predecessors' notify lists:
/// when a predecessor settles, its `down_dep` names who to tell and under
/// which pattern the dependency clears.
fn generate_downstream_dependencies(def: &JobDefinition) -> BTreeMap<String, Vec<Route>> {
    let mut down_deps: BTreeMap<String, Vec<Route>> = def
        .task_defs
        .iter()
        .map(|t| (t.name.clone(), Vec::new()))
        .collect();

    for task in &def.task_defs {
        for route in &task.from_routes {
            if let Some(deps) = down_deps.get_mut(&route.task_name) {
                deps.push(Route::new(task.name.clone(), route.pattern.clone()));
            }
        }
    }

    down_deps
}
