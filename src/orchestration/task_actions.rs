//! # Operator Actions
//!
//! Task- and job-level interventions: republish lost dispatches, requeue
//! settled tasks with fresh variables, the two-phase interrupt and cancel
//! handshakes, and job-wide interrupt/cancel/restart. Interrupt and cancel
//! of an in-flight task are requests: the status moves to the transitional
//! state here and settles when the agent acknowledges through the outcome
//! router.

use super::Engine;
use crate::error::{EngineError, Result};
use crate::events::EventOperation;
use crate::messaging::{agent_queue, AgentControl, AgentEnvelope};
use crate::models::{Job, JobStatus, TaskStatus, VarValue};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

impl Engine {
    /// Re-send a task whose dispatch may have been lost: parked tasks retry
    /// selection, published tasks are pushed back through the dispatcher.
    pub async fn republish_task(&self, team_id: Uuid, task_id: Uuid) -> Result<()> {
        let task = self.store().get_task(team_id, task_id).await?;
        match task.status {
            TaskStatus::WaitingForAgent => self.dispatch_task(team_id, task_id).await,
            TaskStatus::Published => {
                let reset = self
                    .store()
                    .update_task(
                        team_id,
                        task_id,
                        Some(task.version),
                        Box::new(|t| t.status = TaskStatus::WaitingForAgent),
                    )
                    .await?;
                self.dispatch_task(team_id, reset.id).await
            }
            other => Err(invalid_state("republish", task_id, other)),
        }
    }

    /// Reset a settled or interrupted task and run it again, layering
    /// `var_overrides` onto its runtime variables. Earlier attempt history
    /// is discarded so agent selection starts fresh.
    pub async fn requeue_task(
        &self,
        team_id: Uuid,
        task_id: Uuid,
        var_overrides: BTreeMap<String, VarValue>,
    ) -> Result<()> {
        let task = self.store().get_task(team_id, task_id).await?;
        if !task.status.is_terminal() && task.status != TaskStatus::Interrupted {
            return Err(invalid_state("requeue", task_id, task.status));
        }

        let reset = self
            .store()
            .update_task(
                team_id,
                task_id,
                Some(task.version),
                Box::new(move |t| {
                    t.status = TaskStatus::NotStarted;
                    t.failure_code = None;
                    t.started_at = None;
                    t.completed_at = None;
                    t.attempted_agent_ids.clear();
                    t.runtime_vars.extend(var_overrides);
                }),
            )
            .await?;
        info!(task = %reset.name, job_id = %reset.job_id, "task requeued");

        // The job may have settled while this task was terminal; reopen it.
        let job = self.store().get_job(team_id, reset.job_id).await?;
        if job.status.is_terminal() || job.status == JobStatus::Interrupted {
            self.store()
                .update_job(
                    team_id,
                    job.id,
                    None,
                    Box::new(|j| {
                        j.status = JobStatus::Running;
                        j.completed_at = None;
                    }),
                )
                .await?;
        }

        self.dispatch_task(team_id, reset.id).await
    }

    /// Ask the agents holding a task to stop it. The task settles to
    /// `Interrupted` when the last outcome acknowledges.
    pub async fn interrupt_task(&self, team_id: Uuid, task_id: Uuid) -> Result<()> {
        let task = self.store().get_task(team_id, task_id).await?;
        if !matches!(task.status, TaskStatus::Published | TaskStatus::Running) {
            return Err(invalid_state("interrupt", task_id, task.status));
        }

        let task = self
            .store()
            .update_task(
                team_id,
                task_id,
                Some(task.version),
                Box::new(|t| t.status = TaskStatus::Interrupting),
            )
            .await?;
        self.emit(
            team_id,
            "Task",
            EventOperation::Update,
            serde_json::json!({"id": task.id, "status": task.status.to_string()}),
        );
        self.send_control(
            team_id,
            task.id,
            AgentControl::InterruptTask { task_id: task.id },
        )
        .await
    }

    /// Cancel a task. Pending tasks cancel immediately and their dependents
    /// are skipped; in-flight tasks move to `Canceling` and settle when the
    /// agents acknowledge.
    pub async fn cancel_task(&self, team_id: Uuid, task_id: Uuid) -> Result<()> {
        let task = self.store().get_task(team_id, task_id).await?;
        match task.status {
            TaskStatus::NotStarted | TaskStatus::WaitingForAgent | TaskStatus::Interrupted => {
                let cancelled = self
                    .store()
                    .update_task(
                        team_id,
                        task_id,
                        Some(task.version),
                        Box::new(|t| {
                            t.status = TaskStatus::Cancelled;
                            t.completed_at = Some(Utc::now());
                        }),
                    )
                    .await?;
                info!(task = %cancelled.name, job_id = %cancelled.job_id, "task cancelled");
                self.emit(
                    team_id,
                    "Task",
                    EventOperation::Update,
                    serde_json::json!({"id": cancelled.id, "status": cancelled.status.to_string()}),
                );
                // No signature ever fires from a cancelled task.
                self.route_task_settlement(&cancelled, None).await?;
                self.check_job_status(team_id, cancelled.job_id).await?;
                Ok(())
            }
            TaskStatus::Published | TaskStatus::Running | TaskStatus::Interrupting => {
                let task = self
                    .store()
                    .update_task(
                        team_id,
                        task_id,
                        Some(task.version),
                        Box::new(|t| t.status = TaskStatus::Canceling),
                    )
                    .await?;
                self.send_control(
                    team_id,
                    task.id,
                    AgentControl::CancelTask { task_id: task.id },
                )
                .await
            }
            other => Err(invalid_state("cancel", task_id, other)),
        }
    }

    /// Interrupt every in-flight task of a running job.
    pub async fn interrupt_job(&self, team_id: Uuid, job_id: Uuid) -> Result<()> {
        let job = self.store().get_job(team_id, job_id).await?;
        if !matches!(job.status, JobStatus::NotStarted | JobStatus::Running) {
            return Err(EngineError::InvalidState {
                operation: "interrupt",
                entity: "Job",
                id: job_id.to_string(),
                actual: job.status.to_string(),
                expected: "not_started or running".to_string(),
            });
        }

        self.store()
            .update_job(
                team_id,
                job_id,
                Some(job.version),
                Box::new(|j| j.status = JobStatus::Interrupting),
            )
            .await?;
        info!(job_id = %job_id, "interrupting job");

        for task in self.store().tasks_for_job(team_id, job_id).await? {
            if matches!(task.status, TaskStatus::Published | TaskStatus::Running) {
                self.interrupt_task(team_id, task.id).await?;
            }
        }

        // Settles straight to Interrupted when nothing was in flight.
        self.check_job_status(team_id, job_id).await?;
        Ok(())
    }

    /// Cancel a whole job: pending and interrupted tasks cancel immediately,
    /// in-flight ones go through the agent handshake. The job settles when
    /// the census sees every task terminal.
    pub async fn cancel_job(&self, team_id: Uuid, job_id: Uuid) -> Result<()> {
        let job = self.store().get_job(team_id, job_id).await?;
        if job.status.is_terminal() {
            return Err(EngineError::InvalidState {
                operation: "cancel",
                entity: "Job",
                id: job_id.to_string(),
                actual: job.status.to_string(),
                expected: "a non-terminal status".to_string(),
            });
        }

        self.store()
            .update_job(
                team_id,
                job_id,
                Some(job.version),
                Box::new(|j| j.status = JobStatus::Canceling),
            )
            .await?;
        info!(job_id = %job_id, "canceling job");

        for task in self.store().tasks_for_job(team_id, job_id).await? {
            if !task.status.is_terminal() {
                self.cancel_task(team_id, task.id).await?;
            }
        }

        self.check_job_status(team_id, job_id).await?;
        Ok(())
    }

    /// Resume an interrupted or failed job from its frontier: interrupted,
    /// failed, and parked tasks are reset and re-dispatched; completed work
    /// is kept.
    pub async fn restart_job(&self, team_id: Uuid, job_id: Uuid) -> Result<()> {
        let job = self.store().get_job(team_id, job_id).await?;
        if !matches!(job.status, JobStatus::Interrupted | JobStatus::Failed) {
            return Err(EngineError::InvalidState {
                operation: "restart",
                entity: "Job",
                id: job_id.to_string(),
                actual: job.status.to_string(),
                expected: "interrupted or failed".to_string(),
            });
        }

        self.store()
            .update_job(
                team_id,
                job_id,
                Some(job.version),
                Box::new(|j| {
                    j.status = JobStatus::Running;
                    j.completed_at = None;
                }),
            )
            .await?;
        info!(job_id = %job_id, "restarting job from frontier");

        let mut frontier: Vec<Uuid> = Vec::new();
        for task in self.store().tasks_for_job(team_id, job_id).await? {
            if matches!(
                task.status,
                TaskStatus::Interrupted | TaskStatus::Failed | TaskStatus::WaitingForAgent
            ) {
                let reset = self
                    .store()
                    .update_task(
                        team_id,
                        task.id,
                        Some(task.version),
                        Box::new(|t| {
                            t.status = TaskStatus::NotStarted;
                            t.failure_code = None;
                            t.started_at = None;
                            t.completed_at = None;
                            // A resume may legitimately land on the same agent.
                            t.attempted_agent_ids.clear();
                        }),
                    )
                    .await?;
                frontier.push(reset.id);
            }
        }

        for task_id in frontier {
            self.dispatch_task(team_id, task_id).await?;
        }
        Ok(())
    }

    /// Re-run a job from scratch as a brand-new run of the same definition,
    /// carrying this run's variables forward.
    pub async fn restart_job_full(&self, team_id: Uuid, job_id: Uuid) -> Result<Job> {
        let job = self.store().get_job(team_id, job_id).await?;
        self.create_job(team_id, job.job_def_id, job.runtime_vars)
            .await
    }

    /// Deliver a control signal to every agent holding a live outcome for
    /// the task.
    async fn send_control(
        &self,
        team_id: Uuid,
        task_id: Uuid,
        control: AgentControl,
    ) -> Result<()> {
        for outcome in self.store().outcomes_for_task(team_id, task_id).await? {
            if outcome.is_settled() {
                continue;
            }
            self.bus()
                .publish(
                    &agent_queue(team_id, outcome.agent_id),
                    AgentEnvelope::Control(control.clone()),
                )
                .await?;
        }
        Ok(())
    }
}

fn invalid_state(operation: &'static str, task_id: Uuid, actual: TaskStatus) -> EngineError {
    EngineError::InvalidState {
        operation,
        entity: "Task",
        id: task_id.to_string(),
        actual: actual.to_string(),
        expected: "a status this action applies to".to_string(),
    }
}
