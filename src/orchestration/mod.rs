//! # Orchestration Services
//!
//! The engine proper: instantiation, dispatch, outcome routing, job status
//! aggregation, and operator actions. One `Engine` value owns the
//! collaborators (store, bus, event publisher, config); each service file
//! contributes an `impl` block so the concerns stay separable while sharing
//! one state handle.

pub mod dispatcher;
pub mod job_finalizer;
pub mod job_instantiator;
pub mod outcome_router;
pub mod task_actions;

use crate::config::EngineConfig;
use crate::events::{EventOperation, EventPublisher};
use crate::messaging::MessageBus;
use crate::store::EngineStore;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handle for all orchestration operations.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn EngineStore>,
    bus: Arc<dyn MessageBus>,
    events: EventPublisher,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        bus: Arc<dyn MessageBus>,
        events: EventPublisher,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            bus,
            events,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compact entity-change event. Payloads carry ids and status, never
    /// variable values, so sensitive vars stay out of the event stream.
    pub(crate) fn emit(
        &self,
        team_id: Uuid,
        entity: &'static str,
        operation: EventOperation,
        payload: serde_json::Value,
    ) {
        self.events.publish(team_id, entity, operation, payload);
    }
}
