//! # Adjacency Model
//!
//! Builds a directed adjacency map from a definition's routes. Both route
//! directions contribute edges: a task's inbound routes are reversed into
//! predecessor-to-task edges, and its outbound routes feed edges as written.
//! Duplicate edges collapse, so a pair connected in both directions' lists is
//! one edge.

use crate::error::{EngineError, Result};
use crate::models::TaskDefinition;
use std::collections::BTreeMap;

/// Name-keyed directed adjacency over a definition's tasks.
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    adjacency: BTreeMap<String, Vec<String>>,
}

impl GraphModel {
    /// Build the adjacency map. Every node appears as a key even when it has
    /// no outgoing edges. A route naming a task that does not exist in the
    /// definition is a structural error.
    pub fn build(task_defs: &[TaskDefinition]) -> Result<Self> {
        let mut adjacency: BTreeMap<String, Vec<String>> = task_defs
            .iter()
            .map(|t| (t.name.clone(), Vec::new()))
            .collect();

        for task in task_defs {
            for route in &task.from_routes {
                if !adjacency.contains_key(&route.task_name) {
                    return Err(EngineError::UnknownRouteTarget {
                        source_task: task.name.clone(),
                        target: route.task_name.clone(),
                    });
                }
                // Reverse: the inbound route says route.task_name -> task.
                if let Some(edges) = adjacency.get_mut(&route.task_name) {
                    if !edges.contains(&task.name) {
                        edges.push(task.name.clone());
                    }
                }
            }
            for route in &task.to_routes {
                if !adjacency.contains_key(&route.task_name) {
                    return Err(EngineError::UnknownRouteTarget {
                        source_task: task.name.clone(),
                        target: route.task_name.clone(),
                    });
                }
                if let Some(edges) = adjacency.get_mut(&task.name) {
                    if !edges.contains(&route.task_name) {
                        edges.push(route.task_name.clone());
                    }
                }
            }
        }

        Ok(Self { adjacency })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    pub fn successors(&self, node: &str) -> &[String] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }
}
