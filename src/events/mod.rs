//! Entity-change event fan-out.

pub mod publisher;

pub use publisher::{EntityEvent, EventOperation, EventPublisher};
