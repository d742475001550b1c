//! # Task Graph
//!
//! Structural view over a job definition's routes: a name-keyed adjacency
//! model, cycle detection run at definition-edit and instantiation time, and
//! path queries used by definition editors to preview reachability before
//! adding an edge.

pub mod cycle;
pub mod model;
pub mod paths;

pub use cycle::find_cycle;
pub use model::GraphModel;
pub use paths::{
    compute_downstream, compute_inbound_paths, compute_upstream, InboundPath, PathStep, PathType,
};
