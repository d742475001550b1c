//! Data layer: definition templates and runtime entities.

pub mod core;

pub use core::agent::{least_utilized_order, Agent};
pub use core::job::{Job, JobStatus, VarValue};
pub use core::job_definition::{
    CompiledPattern, JobDefinition, Route, RoutePattern, StepDefinition, TargetKind,
    TaskDefinition,
};
pub use core::task::{FailureCode, Task, TaskStatus};
pub use core::task_outcome::{OutcomeSignature, TaskOutcome};
