//! # Job Status Aggregation
//!
//! Census over a run's tasks. A job settles only when every task is terminal;
//! the aggregate is `Failed` if anything failed, `Skipped` when nothing ran
//! at all, and `Completed` otherwise, so a run with a failed branch can never
//! settle as a silent success. Interrupting jobs land on `Interrupted` as
//! soon as no task is still in flight, leaving the frontier intact for a
//! restart.

use super::Engine;
use crate::error::Result;
use crate::events::EventOperation;
use crate::models::{JobStatus, TaskStatus};
use crate::store::StoreError;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Statuses that mean an agent currently holds the task.
fn in_flight(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Published
            | TaskStatus::Running
            | TaskStatus::Interrupting
            | TaskStatus::Canceling
    )
}

impl Engine {
    /// Recompute and apply the job's aggregate status. Called after every
    /// task settlement; cheap and idempotent.
    pub async fn check_job_status(&self, team_id: Uuid, job_id: Uuid) -> Result<JobStatus> {
        let job = self.store().get_job(team_id, job_id).await?;
        if job.status.is_terminal() {
            return Ok(job.status);
        }

        let tasks = self.store().tasks_for_job(team_id, job_id).await?;
        let all_terminal = tasks.iter().all(|t| t.status.is_terminal());

        let new_status = if all_terminal {
            if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
                Some(JobStatus::Failed)
            } else if tasks.iter().all(|t| t.status == TaskStatus::Skipped) {
                Some(JobStatus::Skipped)
            } else {
                Some(JobStatus::Completed)
            }
        } else if job.status == JobStatus::Interrupting
            && !tasks.iter().any(|t| in_flight(t.status))
        {
            Some(JobStatus::Interrupted)
        } else {
            None
        };

        let Some(new_status) = new_status else {
            return Ok(job.status);
        };
        if new_status == job.status {
            return Ok(job.status);
        }

        let updated = self
            .store()
            .update_job(
                team_id,
                job_id,
                Some(job.version),
                Box::new(move |j| {
                    j.status = new_status;
                    if new_status.is_terminal() {
                        j.completed_at = Some(Utc::now());
                    }
                }),
            )
            .await;
        let job = match updated {
            Ok(job) => job,
            // Another settlement recomputed concurrently; its census stands.
            Err(StoreError::StaleVersion { .. }) => return Ok(job.status),
            Err(other) => return Err(other.into()),
        };

        info!(job_id = %job.id, status = %job.status, "job status settled");
        self.emit(
            team_id,
            "Job",
            EventOperation::Update,
            serde_json::json!({"id": job.id, "status": job.status.to_string()}),
        );
        Ok(job.status)
    }
}
