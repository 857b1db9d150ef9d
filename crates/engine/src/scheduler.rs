//! Execution ordering (Kahn's algorithm).
//!
//! Only call this on a workflow that passed [`validate`](crate::dag::validate);
//! the scheduler does not re-validate. Ties are broken deterministically:
//! the frontier is seeded in node definition order and successors are
//! enqueued in edge definition order, so identical input always yields an
//! identical order.

use std::collections::{HashMap, VecDeque};

use crate::dag::adjacency;
use crate::{EngineError, Workflow};

/// Compute the order in which the workflow's nodes are dispatched.
///
/// Every node is scheduled, including all branches of a fan-out.
///
/// # Errors
/// [`EngineError::IncompleteSchedule`] if some nodes could not be ordered,
/// which only happens when a cyclic graph skipped validation.
pub fn compute_order(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    let adjacency = adjacency(workflow);

    let mut in_degree: HashMap<&str, usize> =
        workflow.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for successors in adjacency.values() {
        for succ in successors {
            if let Some(deg) = in_degree.get_mut(succ.as_str()) {
                *deg += 1;
            }
        }
    }

    // Seed the queue with nodes that have no incoming edges.
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for neighbour in neighbours {
                if let Some(deg) = in_degree.get_mut(neighbour.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(neighbour.as_str());
                    }
                }
            }
        }
    }

    if sorted.len() != workflow.nodes.len() {
        return Err(EngineError::IncompleteSchedule {
            scheduled: sorted.len(),
            total: workflow.nodes.len(),
        });
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeDefinition};

    fn workflow(ids: &[&str], edges: &[(&str, &str)]) -> Workflow {
        Workflow::new(
            "sched",
            ids.iter().map(|id| NodeDefinition::new(*id, "mock")).collect(),
            edges.iter().map(|(f, t)| Edge::new(*f, *t)).collect(),
        )
    }

    fn assert_respects_edges(wf: &Workflow, order: &[String]) {
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        for edge in &wf.edges {
            assert!(pos(&edge.from) < pos(&edge.to), "{} must precede {}", edge.from, edge.to);
        }
    }

    #[test]
    fn linear_chain() {
        let wf = workflow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        assert_eq!(compute_order(&wf).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn roots_follow_definition_order() {
        let wf = workflow(&["z", "m", "a"], &[]);
        assert_eq!(compute_order(&wf).unwrap(), vec!["z", "m", "a"]);
    }

    #[test]
    fn fan_out_follows_edge_order() {
        let wf = workflow(&["a", "b", "c"], &[("a", "c"), ("a", "b")]);
        assert_eq!(compute_order(&wf).unwrap(), vec!["a", "c", "b"]);
    }

    #[test]
    fn nodes_defined_before_their_parents() {
        let wf = workflow(
            &["d", "c", "b", "a"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let order = compute_order(&wf).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_respects_edges(&wf, &order);
    }

    #[test]
    fn wide_graph_is_a_valid_permutation() {
        let ids: Vec<String> = (0..30).map(|i| format!("n{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        // Edge from i to every multiple of i, defined in reverse.
        let mut edges = Vec::new();
        for i in (1..30).rev() {
            for j in ((2 * i)..30).step_by(i) {
                edges.push((id_refs[i], id_refs[j]));
            }
        }
        let wf = workflow(&id_refs, &edges);

        let order = compute_order(&wf).unwrap();
        let mut sorted = order.clone();
        sorted.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(sorted, expected);
        assert_respects_edges(&wf, &order);
        assert_eq!(compute_order(&wf).unwrap(), order, "order must be deterministic");
    }

    #[test]
    fn cyclic_input_fails_fast() {
        let wf = workflow(&["start", "a", "b"], &[("start", "a"), ("a", "b"), ("b", "a")]);
        assert!(matches!(
            compute_order(&wf),
            Err(EngineError::IncompleteSchedule { scheduled: 1, total: 3 })
        ));
    }
}
