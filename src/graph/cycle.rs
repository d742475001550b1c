//! # Cycle Detection
//!
//! Three-color depth-first search over the adjacency model. Runs before any
//! definition edit is accepted and again before instantiation materializes a
//! run, so a cyclic definition can never reach execution. Iterative with an
//! explicit stack; graph depth is user-controlled input.

use super::model::GraphModel;

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Find a cycle in the graph. Returns the names of the tasks on the active
/// search path when the first back edge is found (the cycle members plus any
/// tail leading into the cycle), or `None` when the graph is acyclic.
pub fn find_cycle(graph: &GraphModel) -> Option<Vec<String>> {
    let mut color: std::collections::BTreeMap<&str, Color> =
        graph.nodes().map(|n| (n, Color::White)).collect();

    for start in graph.nodes() {
        if color.get(start) != Some(&Color::White) {
            continue;
        }

        // (node, next child index) frames.
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let (node, child_idx) = (frame.0, frame.1);
            let children = graph.successors(node);

            if child_idx < children.len() {
                frame.1 += 1;
                let child = children[child_idx].as_str();
                match color.get(child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(child, Color::Gray);
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        // Back edge: every gray node sits on the active path.
                        return Some(
                            stack.iter().map(|(name, _)| name.to_string()).collect(),
                        );
                    }
                    Color::Black => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Route, TargetKind, TaskDefinition};

    fn def(name: &str, to: &[&str]) -> TaskDefinition {
        TaskDefinition {
            name: name.to_string(),
            target: TargetKind::SingleAgent,
            required_tags: Default::default(),
            target_agent_id: None,
            from_routes: vec![],
            to_routes: to.iter().map(|n| Route::new(*n, "")).collect(),
            artifact_ids: vec![],
            auto_restart: false,
            step_defs: vec![],
        }
    }

    fn graph(defs: &[TaskDefinition]) -> GraphModel {
        GraphModel::build(defs).unwrap()
    }

    #[test]
    fn test_acyclic_chain() {
        let defs = vec![def("A", &["B"]), def("B", &["C"]), def("C", &[])];
        assert!(find_cycle(&graph(&defs)).is_none());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let defs = vec![
            def("A", &["B", "C"]),
            def("B", &["D"]),
            def("C", &["D"]),
            def("D", &[]),
        ];
        assert!(find_cycle(&graph(&defs)).is_none());
    }

    #[test]
    fn test_two_node_cycle() {
        let defs = vec![def("A", &["B"]), def("B", &["A"])];
        let members = find_cycle(&graph(&defs)).unwrap();
        assert!(members.contains(&"A".to_string()));
        assert!(members.contains(&"B".to_string()));
    }

    #[test]
    fn test_cycle_deep_in_larger_graph() {
        // One -> Two -> Three -> Two, with a separate clean branch.
        let defs = vec![
            def("One", &["Two", "Four"]),
            def("Two", &["Three"]),
            def("Three", &["Two"]),
            def("Four", &["Five"]),
            def("Five", &[]),
            def("Six", &["Seven"]),
            def("Seven", &["Eight"]),
            def("Eight", &["Nine"]),
            def("Nine", &[]),
        ];
        let members = find_cycle(&graph(&defs)).unwrap();
        assert!(members.contains(&"Two".to_string()));
        assert!(members.contains(&"Three".to_string()));
        assert!(!members.contains(&"Six".to_string()));
    }

    #[test]
    fn test_cycle_via_mixed_route_directions() {
        // A -> B declared outbound; B -> A declared as A's inbound route.
        let mut a = def("A", &["B"]);
        a.from_routes.push(Route::new("B", ""));
        let defs = vec![a, def("B", &[])];
        assert!(find_cycle(&graph(&defs)).is_some());
    }
}
