#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # JobGrid Core
//!
//! Multi-tenant task-graph orchestration engine. Jobs are instantiated from
//! reusable definitions whose tasks form a directed acyclic graph joined by
//! regex-conditioned routes; the engine dispatches eligible tasks to remote
//! execution agents over per-agent queues, routes their outcomes through the
//! graph, and aggregates the run into a job status that can never settle as
//! a silent success when work failed.
//!
//! ## Architecture
//!
//! A run is a full snapshot: instantiation copies every task with its
//! dependency maps, so execution never reads the definition again and edits
//! cannot corrupt in-flight work. Dependency state lives on the tasks
//! themselves (`up_dep`/`down_dep`); routing is pure map maintenance plus a
//! dispatch attempt wherever a map empties. All cross-writer coordination is
//! optimistic: status transitions compare-and-swap on entity versions and
//! lost races are treated as duplicates of work another writer finished.
//!
//! ## Module Organization
//!
//! - [`models`] - Definition templates, runtime entities, and the agent
//!   directory
//! - [`graph`] - Adjacency model, cycle detection, and path queries
//! - [`store`] - Team-scoped persistence trait plus the in-memory store
//! - [`messaging`] - Agent queue transport and wire messages
//! - [`orchestration`] - Instantiation, dispatch, outcome routing, job
//!   census, and operator actions
//! - [`events`] - Entity-change event fan-out
//! - [`config`] - Engine tunables
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jobgrid_core::config::EngineConfig;
//! use jobgrid_core::events::EventPublisher;
//! use jobgrid_core::messaging::InMemoryBus;
//! use jobgrid_core::orchestration::Engine;
//! use jobgrid_core::store::InMemoryStore;
//!
//! let engine = Engine::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryBus::new()),
//!     EventPublisher::default(),
//!     EngineConfig::default(),
//! );
//! # let _ = engine;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod store;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use events::{EntityEvent, EventOperation, EventPublisher};
pub use graph::{find_cycle, GraphModel};
pub use messaging::{InMemoryBus, MessageBus};
pub use models::{
    Agent, FailureCode, Job, JobDefinition, JobStatus, OutcomeSignature, Route, RoutePattern,
    StepDefinition, TargetKind, Task, TaskDefinition, TaskOutcome, TaskStatus, VarValue,
};
pub use orchestration::Engine;
pub use store::{EngineStore, InMemoryStore};
