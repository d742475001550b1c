//! # Path Queries
//!
//! Reachability queries used by definition editors: which tasks can lead into
//! a target (with the exact hop chain), and the transitive closures that tell
//! an editor which edges would create a cycle if added. Breadth-first by step
//! depth; the first discovered route between a pair wins, so each pair keeps
//! its shortest-chain record.

use crate::models::{JobDefinition, RoutePattern, TaskDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which side of the pair declared the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// Declared as the target's inbound route.
    Inbound,
    /// Declared as the source's outbound route.
    Outbound,
}

/// One hop in a discovered path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub source_task_name: String,
    pub target_task_name: String,
    pub pattern: RoutePattern,
    pub step_depth: u32,
    pub path_type: PathType,
}

/// A discovered route from some source task toward the query target, with
/// the full hop chain back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundPath {
    pub pattern: RoutePattern,
    pub step_depth: u32,
    pub path_type: PathType,
    pub exact_path: Vec<PathStep>,
}

/// All tasks that can lead to `target`, keyed by source name then by the
/// immediate-successor name the source reaches it through.
pub fn compute_inbound_paths(
    job_def: &JobDefinition,
    target: &str,
) -> BTreeMap<String, BTreeMap<String, InboundPath>> {
    let mut inbound: BTreeMap<String, BTreeMap<String, InboundPath>> = BTreeMap::new();

    let Some(target_def) = job_def.task_def(target) else {
        return inbound;
    };

    // Frontier entries carry the hop chain from this node to the original
    // target.
    let mut frontier: Vec<(&TaskDefinition, Vec<PathStep>)> = vec![(target_def, Vec::new())];
    let mut step_depth: u32 = 1;

    while !frontier.is_empty() {
        let mut next: Vec<(&TaskDefinition, Vec<PathStep>)> = Vec::new();

        for (node, chain) in &frontier {
            // Hops the node declares itself, via its inbound routes. A pair
            // recorded at an earlier level keeps its shorter chain, and not
            // re-expanding it is what bounds the walk on cyclic input.
            for route in &node.from_routes {
                if inbound
                    .get(&route.task_name)
                    .is_some_and(|m| m.contains_key(&node.name))
                {
                    continue;
                }
                let Some(source_def) = job_def.task_def(&route.task_name) else {
                    tracing::warn!(
                        source = %route.task_name,
                        "route names a task that does not exist"
                    );
                    continue;
                };

                let step = PathStep {
                    source_task_name: route.task_name.clone(),
                    target_task_name: node.name.clone(),
                    pattern: route.pattern.clone(),
                    step_depth,
                    path_type: PathType::Inbound,
                };
                let mut exact_path = chain.clone();
                exact_path.push(step.clone());

                inbound.entry(route.task_name.clone()).or_default().insert(
                    node.name.clone(),
                    InboundPath {
                        pattern: step.pattern.clone(),
                        step_depth,
                        path_type: PathType::Inbound,
                        exact_path: exact_path.clone(),
                    },
                );
                next.push((source_def, exact_path));
            }

            // Hops declared by siblings, via their outbound routes into the
            // node. Skip pairs already recorded inbound.
            for source_def in &job_def.task_defs {
                let Some(route) = source_def
                    .to_routes
                    .iter()
                    .find(|r| r.task_name == node.name)
                else {
                    continue;
                };
                if inbound
                    .get(&source_def.name)
                    .is_some_and(|m| m.contains_key(&node.name))
                {
                    continue;
                }

                let step = PathStep {
                    source_task_name: source_def.name.clone(),
                    target_task_name: node.name.clone(),
                    pattern: route.pattern.clone(),
                    step_depth,
                    path_type: PathType::Outbound,
                };
                let mut exact_path = chain.clone();
                exact_path.push(step.clone());

                inbound.entry(source_def.name.clone()).or_default().insert(
                    node.name.clone(),
                    InboundPath {
                        pattern: step.pattern.clone(),
                        step_depth,
                        path_type: PathType::Outbound,
                        exact_path: exact_path.clone(),
                    },
                );
                next.push((source_def, exact_path));
            }
        }

        frontier = next;
        step_depth += 1;
    }

    inbound
}

/// Transitive downstream closure of `target`, including the target itself.
/// Adding an inbound route to the target from any of these would create a
/// cycle.
pub fn compute_downstream<'a>(job_def: &'a JobDefinition, target: &str) -> Vec<&'a TaskDefinition> {
    closure(job_def, target, |node, candidate| {
        node.to_routes.iter().any(|r| r.task_name == candidate.name)
            || candidate.from_routes.iter().any(|r| r.task_name == node.name)
    })
}

/// Transitive upstream closure of `target`, including the target itself.
/// Adding an outbound route from the target to any of these would create a
/// cycle.
pub fn compute_upstream<'a>(job_def: &'a JobDefinition, target: &str) -> Vec<&'a TaskDefinition> {
    closure(job_def, target, |node, candidate| {
        node.from_routes.iter().any(|r| r.task_name == candidate.name)
            || candidate.to_routes.iter().any(|r| r.task_name == node.name)
    })
}

fn closure<'a, F>(job_def: &'a JobDefinition, target: &str, connected: F) -> Vec<&'a TaskDefinition>
where
    F: Fn(&TaskDefinition, &TaskDefinition) -> bool,
{
    let Some(target_def) = job_def.task_def(target) else {
        return Vec::new();
    };

    let mut seen: BTreeMap<&str, &TaskDefinition> = BTreeMap::new();
    seen.insert(target_def.name.as_str(), target_def);
    let mut frontier: Vec<&TaskDefinition> = vec![target_def];

    while !frontier.is_empty() {
        let mut next: Vec<&'a TaskDefinition> = Vec::new();
        for node in &frontier {
            for candidate in &job_def.task_defs {
                if !seen.contains_key(candidate.name.as_str()) && connected(node, candidate) {
                    seen.insert(candidate.name.as_str(), candidate);
                    next.push(candidate);
                }
            }
        }
        frontier = next;
    }

    seen.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Route, TargetKind};
    use uuid::Uuid;

    fn def(name: &str, from: &[(&str, &str)], to: &[(&str, &str)]) -> TaskDefinition {
        TaskDefinition {
            name: name.to_string(),
            target: TargetKind::SingleAgent,
            required_tags: Default::default(),
            target_agent_id: None,
            from_routes: from.iter().map(|(n, p)| Route::new(*n, *p)).collect(),
            to_routes: to.iter().map(|(n, p)| Route::new(*n, *p)).collect(),
            artifact_ids: vec![],
            auto_restart: false,
            step_defs: vec![],
        }
    }

    fn job_def(defs: Vec<TaskDefinition>) -> JobDefinition {
        JobDefinition::new(Uuid::new_v4(), "paths", defs)
    }

    #[test]
    fn test_inbound_paths_walk_backwards_with_depth() {
        // A -> B -> C, B's edge declared inbound on C, A's declared outbound.
        let jd = job_def(vec![
            def("A", &[], &[("B", "")]),
            def("B", &[], &[]),
            def("C", &[("B", "^ok$")], &[]),
        ]);

        let paths = compute_inbound_paths(&jd, "C");

        let from_b = &paths["B"]["C"];
        assert_eq!(from_b.step_depth, 1);
        assert_eq!(from_b.path_type, PathType::Inbound);
        assert_eq!(from_b.pattern, RoutePattern::from("^ok$"));
        assert_eq!(from_b.exact_path.len(), 1);

        let from_a = &paths["A"]["B"];
        assert_eq!(from_a.step_depth, 2);
        assert_eq!(from_a.path_type, PathType::Outbound);
        // Chain runs target-backwards: B->C recorded first, then A->B.
        assert_eq!(from_a.exact_path[0].source_task_name, "B");
        assert_eq!(from_a.exact_path[1].source_task_name, "A");
    }

    #[test]
    fn test_inbound_route_wins_over_duplicate_outbound() {
        // Same edge declared from both ends; the inbound record stands.
        let jd = job_def(vec![
            def("A", &[], &[("B", ".*")]),
            def("B", &[("A", "^ok$")], &[]),
        ]);

        let paths = compute_inbound_paths(&jd, "B");
        assert_eq!(paths["A"]["B"].path_type, PathType::Inbound);
        assert_eq!(paths["A"]["B"].pattern, RoutePattern::from("^ok$"));
    }

    #[test]
    fn test_downstream_closure_includes_target() {
        let jd = job_def(vec![
            def("A", &[], &[("B", "")]),
            def("B", &[], &[("C", "")]),
            def("C", &[], &[]),
            def("X", &[], &[]),
        ]);

        let names: Vec<&str> = compute_downstream(&jd, "B").iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_upstream_closure_follows_both_route_directions() {
        // A -> B outbound; B -> C via C's inbound route.
        let jd = job_def(vec![
            def("A", &[], &[("B", "")]),
            def("B", &[], &[]),
            def("C", &[("B", "")], &[]),
        ]);

        let names: Vec<&str> = compute_upstream(&jd, "C").iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_reconverging_route_keeps_first_discovered_depth() {
        // N reaches T directly and through M, so the walk revisits N one
        // level deeper; P's record of N must keep the depth-2 discovery.
        let jd = job_def(vec![
            def("P", &[], &[]),
            def("N", &[("P", "")], &[]),
            def("M", &[("N", "")], &[]),
            def("T", &[("N", ""), ("M", "")], &[]),
        ]);

        let paths = compute_inbound_paths(&jd, "T");
        assert_eq!(paths["P"]["N"].step_depth, 2);
        assert_eq!(paths["P"]["N"].exact_path.len(), 2);
    }

    #[test]
    fn test_cyclic_routes_terminate() {
        // Editors query paths before a cycle check rejects the edit.
        let jd = job_def(vec![
            def("A", &[("B", "")], &[]),
            def("B", &[("A", "")], &[]),
        ]);

        let paths = compute_inbound_paths(&jd, "A");
        assert_eq!(paths["B"]["A"].step_depth, 1);
        assert_eq!(paths["A"]["B"].step_depth, 2);
    }

    #[test]
    fn test_unknown_target_yields_empty_results() {
        let jd = job_def(vec![def("A", &[], &[])]);
        assert!(compute_inbound_paths(&jd, "Ghost").is_empty());
        assert!(compute_downstream(&jd, "Ghost").is_empty());
    }
}
