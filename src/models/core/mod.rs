pub mod agent;
pub mod job;
pub mod job_definition;
pub mod task;
pub mod task_outcome;
