//! # Agent Messaging
//!
//! Queue-per-agent transport between the engine and its execution agents.
//! The engine publishes dispatch and control envelopes to agent queues and
//! receives execution reports back; `MessageBus` abstracts the broker so the
//! in-memory bus and a real broker share one contract.

pub mod bus;
pub mod errors;
pub mod message;

pub use bus::{InMemoryBus, MessageBus};
pub use errors::MessagingError;
pub use message::{
    agent_queue, AgentControl, AgentEnvelope, DispatchMessage, OutcomeReport, OutcomeReportKind,
};
