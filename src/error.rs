//! # Engine Error Types
//!
//! Top-level error type shared by the orchestration services. Subsystems with
//! their own failure vocabulary (store, messaging) define dedicated enums and
//! convert into `EngineError` at the service boundary.

use crate::messaging::MessagingError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("job definition contains a cyclic dependency with the following tasks: {}", cycle.join(", "))]
    CyclicDefinition { cycle: Vec<String> },

    // Field is not named `source` so thiserror does not treat it as an
    // error-source chain.
    #[error("route references unknown task \"{target}\" from task \"{source_task}\"")]
    UnknownRouteTarget { source_task: String, target: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state for {operation}: {entity} {id} is {actual}, expected {expected}")]
    InvalidState {
        operation: &'static str,
        entity: &'static str,
        id: String,
        actual: String,
        expected: String,
    },

    #[error("stale version for {entity} {id}: expected {expected}, found {actual}")]
    StaleVersion {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for errors that signal an expected race (another writer won) rather
    /// than a fault. Callers re-read and decide whether the transition is moot.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StaleVersion { .. })
            || matches!(self, Self::Store(StoreError::StaleVersion { .. }))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_display() {
        let err = EngineError::CyclicDefinition {
            cycle: vec!["Two".to_string(), "Three".to_string()],
        };
        let display = err.to_string();
        assert!(display.contains("cyclic dependency"));
        assert!(display.contains("Two, Three"));
    }

    #[test]
    fn test_conflict_classification() {
        let stale = EngineError::StaleVersion {
            entity: "Task",
            id: "t1".to_string(),
            expected: 3,
            actual: 4,
        };
        assert!(stale.is_conflict());
        assert!(!EngineError::validation("bad").is_conflict());
    }
}
