//! # Outcome Routing
//!
//! Consumes agent execution reports and drives the graph forward. A report
//! first lands on its pre-created outcome record; the task settles only when
//! every outcome for it is settled, which is how fan-out tasks join. A
//! settled task then fires its outbound edges, clears itself from dependents'
//! upstream maps, and skips any dependent whose only remaining path through
//! this task did not fire. Duplicate report delivery is absorbed at the
//! outcome record: a terminal outcome ignores further reports.

use super::Engine;
use crate::error::Result;
use crate::events::EventOperation;
use crate::messaging::{OutcomeReport, OutcomeReportKind};
use crate::models::{FailureCode, JobStatus, OutcomeSignature, Task, TaskOutcome, TaskStatus};
use crate::store::StoreError;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How one outcome finished, normalized from the report.
#[derive(Debug, Clone)]
enum Settlement {
    Succeeded(OutcomeSignature),
    Failed(FailureCode, Option<String>),
    Interrupted,
    Cancelled,
}

impl Engine {
    /// Entry point for every agent report.
    pub async fn handle_report(&self, report: OutcomeReport) -> Result<()> {
        match report.kind.clone() {
            OutcomeReportKind::Started => self.handle_started(report).await,
            OutcomeReportKind::Completed {
                signature,
                exported_vars,
            } => {
                let signature = OutcomeSignature::from(signature.as_str());
                // A completion that reports the fail signature is a failure
                // in routing terms, not a success with an odd label.
                let settlement = if signature == OutcomeSignature::Fail {
                    Settlement::Failed(FailureCode::TaskExecError, None)
                } else {
                    Settlement::Succeeded(signature)
                };
                self.handle_terminal(report, settlement, exported_vars).await
            }
            OutcomeReportKind::Failed { code, detail } => {
                self.handle_terminal(report, Settlement::Failed(code, detail), BTreeMap::new())
                    .await
            }
            OutcomeReportKind::Interrupted => {
                self.handle_terminal(report, Settlement::Interrupted, BTreeMap::new())
                    .await
            }
            OutcomeReportKind::Cancelled => {
                self.handle_terminal(report, Settlement::Cancelled, BTreeMap::new())
                    .await
            }
        }
    }

    async fn handle_started(&self, report: OutcomeReport) -> Result<()> {
        let team_id = report.team_id;
        let outcome = self
            .store()
            .get_task_outcome(team_id, report.outcome_id)
            .await?;
        if outcome.status != TaskStatus::Published {
            debug!(outcome_id = %outcome.id, status = %outcome.status, "ignoring stale start report");
            return Ok(());
        }

        allow_stale(
            self.store()
                .update_task_outcome(
                    team_id,
                    outcome.id,
                    Some(outcome.version),
                    Box::new(|o| {
                        o.status = TaskStatus::Running;
                        o.started_at = Some(Utc::now());
                    }),
                )
                .await,
        )?;

        let task = self.store().get_task(team_id, report.task_id).await?;
        if task.status == TaskStatus::Published {
            allow_stale(
                self.store()
                    .update_task(
                        team_id,
                        task.id,
                        Some(task.version),
                        Box::new(|t| {
                            t.status = TaskStatus::Running;
                            t.started_at = Some(Utc::now());
                        }),
                    )
                    .await,
            )?;
            self.emit(
                team_id,
                "Task",
                EventOperation::Update,
                serde_json::json!({"id": task.id, "status": TaskStatus::Running.to_string()}),
            );
        }

        let job = self.store().get_job(team_id, task.job_id).await?;
        if job.status == JobStatus::NotStarted {
            allow_stale(
                self.store()
                    .update_job(
                        team_id,
                        job.id,
                        Some(job.version),
                        Box::new(|j| j.status = JobStatus::Running),
                    )
                    .await,
            )?;
        }

        Ok(())
    }

    async fn handle_terminal(
        &self,
        report: OutcomeReport,
        settlement: Settlement,
        exported_vars: BTreeMap<String, String>,
    ) -> Result<()> {
        let team_id = report.team_id;
        let outcome = self
            .store()
            .get_task_outcome(team_id, report.outcome_id)
            .await?;
        if outcome.is_settled() {
            debug!(outcome_id = %outcome.id, "duplicate report for settled outcome, ignoring");
            return Ok(());
        }

        let (outcome_status, signature, failure_code, detail) = match &settlement {
            Settlement::Succeeded(sig) => {
                (TaskStatus::Succeeded, Some(sig.clone()), None, None)
            }
            Settlement::Failed(code, detail) => (
                TaskStatus::Failed,
                Some(OutcomeSignature::Fail),
                Some(*code),
                detail.clone(),
            ),
            Settlement::Interrupted => (TaskStatus::Interrupted, None, None, None),
            Settlement::Cancelled => (TaskStatus::Cancelled, None, None, None),
        };

        let updated = self
            .store()
            .update_task_outcome(
                team_id,
                outcome.id,
                Some(outcome.version),
                Box::new(move |o| {
                    o.status = outcome_status;
                    o.signature = signature;
                    o.failure_code = failure_code;
                    o.detail = detail;
                    o.completed_at = Some(Utc::now());
                }),
            )
            .await;
        match updated {
            Ok(_) => {}
            // A concurrent duplicate won the write.
            Err(StoreError::StaleVersion { .. }) => return Ok(()),
            Err(other) => return Err(other.into()),
        }

        self.release_agent_slot(team_id, outcome.agent_id).await?;

        let task = self.store().get_task(team_id, outcome.task_id).await?;
        if outcome.attempt != task.attempt {
            debug!(
                outcome_id = %outcome.id,
                outcome_attempt = outcome.attempt,
                task_attempt = task.attempt,
                "report from a superseded attempt, ignoring"
            );
            return Ok(());
        }

        if !exported_vars.is_empty() {
            self.store()
                .update_job(
                    team_id,
                    outcome.job_id,
                    None,
                    Box::new(move |j| {
                        for (k, v) in exported_vars {
                            j.runtime_vars
                                .insert(k, crate::models::VarValue::new(v));
                        }
                    }),
                )
                .await?;
        }

        // Fan-in: the task settles only when every outcome of the current
        // attempt has.
        let outcomes: Vec<TaskOutcome> = self
            .store()
            .outcomes_for_task(team_id, outcome.task_id)
            .await?
            .into_iter()
            .filter(|o| o.attempt == task.attempt)
            .collect();
        if outcomes.iter().any(|o| !o.is_settled()) {
            return Ok(());
        }

        if task.status.is_terminal() {
            return Ok(());
        }

        self.settle_task(task, aggregate_settlement(&outcomes, settlement))
            .await
    }

    /// Apply a task's final status and run its consequences.
    async fn settle_task(&self, task: Task, settlement: Settlement) -> Result<()> {
        let team_id = task.team_id;
        let (status, failure_code) = match &settlement {
            Settlement::Succeeded(_) => (TaskStatus::Succeeded, None),
            Settlement::Failed(code, _) => (TaskStatus::Failed, Some(*code)),
            Settlement::Interrupted => (TaskStatus::Interrupted, None),
            Settlement::Cancelled => (TaskStatus::Cancelled, None),
        };

        let updated = self
            .store()
            .update_task(
                team_id,
                task.id,
                Some(task.version),
                Box::new(move |t| {
                    t.status = status;
                    t.failure_code = failure_code;
                    if status.is_terminal() {
                        t.completed_at = Some(Utc::now());
                    }
                }),
            )
            .await;
        let task = match updated {
            Ok(task) => task,
            Err(StoreError::StaleVersion { .. }) => return Ok(()),
            Err(other) => return Err(other.into()),
        };
        info!(task = %task.name, job_id = %task.job_id, status = %task.status, "task settled");
        self.emit(
            team_id,
            "Task",
            EventOperation::Update,
            serde_json::json!({"id": task.id, "status": task.status.to_string()}),
        );

        match settlement {
            Settlement::Succeeded(signature) => {
                self.route_task_settlement(&task, Some(signature.as_str().to_string()))
                    .await?;
            }
            Settlement::Failed(..) => {
                return self.settle_failed_task(task).await;
            }
            Settlement::Interrupted => {
                // Not terminal; the run can resume from here. No routing.
            }
            Settlement::Cancelled => {
                self.route_task_settlement(&task, None).await?;
            }
        }

        self.check_job_status(team_id, task.job_id).await?;
        Ok(())
    }

    /// Failure consequences: burn an auto-restart attempt when the budget and
    /// failure class allow it, otherwise route the fail signature.
    pub(crate) async fn settle_failed_task(&self, task: Task) -> Result<()> {
        let team_id = task.team_id;
        let retryable = task
            .failure_code
            .map(|c| c.retryable())
            .unwrap_or(false);

        if task.auto_restart && retryable && task.restarts_remaining > 0 {
            info!(
                task = %task.name,
                job_id = %task.job_id,
                remaining = task.restarts_remaining - 1,
                "auto-restarting failed task"
            );
            let reset = self
                .store()
                .update_task(
                    team_id,
                    task.id,
                    Some(task.version),
                    Box::new(|t| {
                        t.status = TaskStatus::NotStarted;
                        t.failure_code = None;
                        t.completed_at = None;
                        t.restarts_remaining -= 1;
                    }),
                )
                .await;
            if let Err(StoreError::StaleVersion { .. }) = reset {
                return Ok(());
            }
            let reset = reset?;
            return self.dispatch_task(team_id, reset.id).await;
        }

        self.route_task_settlement(&task, Some("fail".to_string()))
            .await?;
        self.check_job_status(team_id, task.job_id).await?;
        Ok(())
    }

    /// Fire the settled task's outbound edges and clean up its dependents.
    ///
    /// `signature` of `None` fires nothing, which makes every dependent
    /// through this task unreachable. Dependents whose pattern does not fire
    /// and who still hold this task upstream are skipped, cascading.
    pub(crate) async fn route_task_settlement(
        &self,
        task: &Task,
        signature: Option<String>,
    ) -> Result<()> {
        let team_id = task.team_id;

        // Outbound OR-triggers: launch the target outright.
        if let Some(sig) = &signature {
            for route in &task.to_routes {
                if route.pattern.fires(sig) {
                    self.launch_route_target(team_id, task.job_id, &route.task_name)
                        .await?;
                }
            }
        }

        let mut to_skip: Vec<String> = Vec::new();
        for dep in &task.down_dep {
            let fired = signature
                .as_deref()
                .is_some_and(|sig| dep.pattern.fires(sig));
            if fired {
                self.clear_upstream_dependency(team_id, task.job_id, &dep.task_name, &task.name)
                    .await?;
            } else {
                to_skip.push(dep.task_name.clone());
            }
        }

        self.skip_cascade(team_id, task.job_id, &task.name, to_skip)
            .await
    }

    /// Launch a task named by a fired outbound route. The trigger overrides
    /// any upstream map the target still carries.
    async fn launch_route_target(&self, team_id: Uuid, job_id: Uuid, name: &str) -> Result<()> {
        let target = self.store().task_by_name(team_id, job_id, name).await?;
        if target.status != TaskStatus::NotStarted {
            return Ok(());
        }
        let launched = self
            .store()
            .update_task(
                team_id,
                target.id,
                Some(target.version),
                Box::new(|t| t.up_dep.clear()),
            )
            .await;
        match launched {
            Ok(target) => self.dispatch_task(team_id, target.id).await,
            Err(StoreError::StaleVersion { .. }) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Remove a satisfied predecessor from a dependent's upstream map and
    /// dispatch it once the map empties.
    async fn clear_upstream_dependency(
        &self,
        team_id: Uuid,
        job_id: Uuid,
        dependent: &str,
        predecessor: &str,
    ) -> Result<()> {
        let target = self.store().task_by_name(team_id, job_id, dependent).await?;
        let predecessor = predecessor.to_string();
        let updated = self
            .store()
            .update_task(
                team_id,
                target.id,
                Some(target.version),
                Box::new(move |t| {
                    t.up_dep.remove(&predecessor);
                }),
            )
            .await;
        match updated {
            Ok(target) if target.is_eligible() => self.dispatch_task(team_id, target.id).await,
            Ok(_) => Ok(()),
            Err(StoreError::StaleVersion { .. }) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Skip every pending dependent that still waits on an unreachable
    /// predecessor, then cascade through their dependents.
    async fn skip_cascade(
        &self,
        team_id: Uuid,
        job_id: Uuid,
        predecessor: &str,
        dependents: Vec<String>,
    ) -> Result<()> {
        let mut worklist: Vec<(String, String)> = dependents
            .into_iter()
            .map(|name| (predecessor.to_string(), name))
            .collect();

        while let Some((pred, name)) = worklist.pop() {
            let target = match self.store().task_by_name(team_id, job_id, &name).await {
                Ok(t) => t,
                Err(StoreError::NotFound { .. }) => {
                    warn!(task = %name, "skip cascade references missing task");
                    continue;
                }
                Err(other) => return Err(other.into()),
            };
            if !target.up_dep.contains_key(&pred) || !target.status.is_dispatchable() {
                continue;
            }

            let skipped = self
                .store()
                .update_task(
                    team_id,
                    target.id,
                    Some(target.version),
                    Box::new(|t| {
                        t.status = TaskStatus::Skipped;
                        t.completed_at = Some(Utc::now());
                    }),
                )
                .await;
            let skipped = match skipped {
                Ok(t) => t,
                Err(StoreError::StaleVersion { .. }) => continue,
                Err(other) => return Err(other.into()),
            };
            info!(task = %skipped.name, job_id = %job_id, "task skipped, upstream unreachable");
            self.emit(
                team_id,
                "Task",
                EventOperation::Update,
                serde_json::json!({"id": skipped.id, "status": TaskStatus::Skipped.to_string()}),
            );

            for dep in &skipped.down_dep {
                worklist.push((skipped.name.clone(), dep.task_name.clone()));
            }
        }

        Ok(())
    }

    pub(crate) async fn release_agent_slot(&self, team_id: Uuid, agent_id: Uuid) -> Result<()> {
        let released = self
            .store()
            .update_agent(
                team_id,
                agent_id,
                Box::new(|a| a.num_active_tasks = a.num_active_tasks.saturating_sub(1)),
            )
            .await;
        match released {
            Ok(_) => Ok(()),
            // The agent may have aged out of the directory.
            Err(StoreError::NotFound { .. }) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }
}

/// Collapse all outcomes of a task into one settlement. Any failure wins,
/// then cancellation, then interruption; the triggering settlement's
/// signature is kept for the all-succeeded case.
fn aggregate_settlement(outcomes: &[TaskOutcome], last: Settlement) -> Settlement {
    if let Some(failed) = outcomes.iter().find(|o| o.status == TaskStatus::Failed) {
        return Settlement::Failed(
            failed.failure_code.unwrap_or(FailureCode::TaskExecError),
            failed.detail.clone(),
        );
    }
    if outcomes.iter().any(|o| o.status == TaskStatus::Cancelled) {
        return Settlement::Cancelled;
    }
    if outcomes.iter().any(|o| o.status == TaskStatus::Interrupted) {
        return Settlement::Interrupted;
    }
    match last {
        Settlement::Succeeded(_) => last,
        // All outcomes succeeded but the triggering report did not: fall back
        // to the plain success signature.
        _ => Settlement::Succeeded(OutcomeSignature::Ok),
    }
}

/// Lost version races are duplicates of work another writer finished.
fn allow_stale<T>(result: std::result::Result<T, StoreError>) -> std::result::Result<(), StoreError> {
    match result {
        Ok(_) => Ok(()),
        Err(StoreError::StaleVersion { .. }) => Ok(()),
        Err(other) => Err(other),
    }
}
