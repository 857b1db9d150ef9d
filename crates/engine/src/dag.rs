//! DAG validation — run this before accepting a workflow for execution.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `from` and `to`).
//! 3. The directed graph must be acyclic.
//!
//! The three checks are independent; all of them run to completion and every
//! problem found is returned together.

use std::collections::{HashMap, HashSet};

use crate::error::ValidationError;
use crate::models::Workflow;

/// Validate the workflow's graph structure.
///
/// Deterministic: the same workflow always yields the same error list, in
/// node/edge definition order.
///
/// # Errors
/// Every [`ValidationError`] found: one [`DuplicateNodeId`] per repeated ID,
/// one [`UnknownNodeReference`] per dangling edge endpoint, and at most one
/// [`CycleDetected`].
///
/// [`DuplicateNodeId`]: ValidationError::DuplicateNodeId
/// [`UnknownNodeReference`]: ValidationError::UnknownNodeReference
/// [`CycleDetected`]: ValidationError::CycleDetected
pub fn validate(workflow: &Workflow) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen_ids.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        for (node_id, side) in [(&edge.from, "from"), (&edge.to, "to")] {
            if !seen_ids.contains(node_id.as_str()) {
                errors.push(ValidationError::UnknownNodeReference {
                    edge_id: edge.id.clone(),
                    node_id: node_id.clone(),
                    side,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Cycle detection
    // -----------------------------------------------------------------------
    if let Some((from, to)) = find_back_edge(workflow) {
        errors.push(ValidationError::CycleDetected { from, to });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Successor lists keyed by node ID, each in edge definition order.
///
/// Every node gets an entry, even without outgoing edges. Edges whose
/// endpoints are unknown are skipped.
pub fn adjacency(workflow: &Workflow) -> HashMap<String, Vec<String>> {
    let mut adjacency: HashMap<String, Vec<String>> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.clone(), Vec::new()))
        .collect();

    for edge in &workflow.edges {
        if !adjacency.contains_key(&edge.to) {
            continue;
        }
        if let Some(successors) = adjacency.get_mut(&edge.from) {
            successors.push(edge.to.clone());
        }
    }

    adjacency
}

/// Iterative depth-first search over every node as a root.
///
/// `on_stack` holds the nodes of the current path; `visited` holds nodes
/// whose subtree is fully explored. Any edge into an `on_stack` node closes
/// a cycle, and the first such edge is returned.
fn find_back_edge(workflow: &Workflow) -> Option<(String, String)> {
    let adjacency = adjacency(workflow);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    for root in &workflow.nodes {
        if visited.contains(root.id.as_str()) {
            continue;
        }

        // (node, index of the next successor to explore)
        let mut stack: Vec<(&str, usize)> = vec![(root.id.as_str(), 0)];
        on_stack.insert(root.id.as_str());

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let successors = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);

            match successors.get(next) {
                Some(succ) => {
                    frame.1 += 1;
                    let succ = succ.as_str();
                    if on_stack.contains(succ) {
                        return Some((node.to_owned(), succ.to_owned()));
                    }
                    if visited.insert(succ) {
                        on_stack.insert(succ);
                        stack.push((succ, 0));
                    }
                }
                None => {
                    on_stack.remove(node);
                    visited.insert(node);
                    stack.pop();
                }
            }
        }
    }

    None
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeDefinition};

    fn make_node(id: &str) -> NodeDefinition {
        NodeDefinition::new(id, "mock")
    }

    fn make_workflow(nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Workflow {
        Workflow::new("test", nodes, edges)
    }

    #[test]
    fn valid_linear_dag_passes() {
        // A → B → C
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![Edge::new("a", "b"), Edge::new("b", "c")],
        );
        assert_eq!(validate(&workflow), Ok(()));
    }

    #[test]
    fn valid_diamond_dag_passes() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c"), make_node("d")],
            vec![
                Edge::new("a", "b"),
                Edge::new("a", "c"),
                Edge::new("b", "d"),
                Edge::new("c", "d"),
            ],
        );
        assert_eq!(validate(&workflow), Ok(()));
    }

    #[test]
    fn duplicate_node_id_is_reported_once() {
        let workflow = make_workflow(
            vec![make_node("a"), make_node("a"), make_node("a"), make_node("b")],
            vec![],
        );
        assert_eq!(
            validate(&workflow),
            Err(vec![ValidationError::DuplicateNodeId("a".into())])
        );
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let workflow = make_workflow(
            vec![make_node("a")],
            vec![Edge::new("a", "ghost")], // ghost doesn't exist
        );
        assert_eq!(
            validate(&workflow),
            Err(vec![ValidationError::UnknownNodeReference {
                edge_id: "a->ghost".into(),
                node_id: "ghost".into(),
                side: "to",
            }])
        );
    }

    #[test]
    fn two_node_cycle_is_detected() {
        // A → B → A
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b")],
            vec![Edge::new("a", "b"), Edge::new("b", "a")],
        );
        assert_eq!(
            validate(&workflow),
            Err(vec![ValidationError::CycleDetected { from: "b".into(), to: "a".into() }])
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let workflow = make_workflow(vec![make_node("a")], vec![Edge::new("a", "a")]);
        assert!(matches!(
            validate(&workflow).unwrap_err().as_slice(),
            [ValidationError::CycleDetected { .. }]
        ));
    }

    #[test]
    fn cycle_in_disconnected_component_is_detected() {
        // x → y is fine; p → q → r → p is not, and p is not reachable from x.
        let workflow = make_workflow(
            vec![make_node("x"), make_node("y"), make_node("p"), make_node("q"), make_node("r")],
            vec![
                Edge::new("x", "y"),
                Edge::new("p", "q"),
                Edge::new("q", "r"),
                Edge::new("r", "p"),
            ],
        );
        assert!(matches!(
            validate(&workflow).unwrap_err().as_slice(),
            [ValidationError::CycleDetected { .. }]
        ));
    }

    #[test]
    fn shared_descendant_is_not_a_cycle() {
        // Reaching d twice through different paths must not look like a back-edge.
        let workflow = make_workflow(
            vec![make_node("d"), make_node("b"), make_node("a")],
            vec![Edge::new("a", "b"), Edge::new("a", "d"), Edge::new("b", "d")],
        );
        assert_eq!(validate(&workflow), Ok(()));
    }

    #[test]
    fn independent_errors_are_all_reported() {
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("a")],
            vec![
                Edge::new("a", "b"),
                Edge::new("b", "a"),
                Edge::new("ghost", "phantom"),
            ],
        );

        let errors = validate(&workflow).unwrap_err();
        assert_eq!(errors.len(), 4, "got {errors:?}");
        assert_eq!(errors[0], ValidationError::DuplicateNodeId("a".into()));
        assert!(matches!(&errors[1], ValidationError::UnknownNodeReference { node_id, side: "from", .. } if node_id == "ghost"));
        assert!(matches!(&errors[2], ValidationError::UnknownNodeReference { node_id, side: "to", .. } if node_id == "phantom"));
        assert!(matches!(errors[3], ValidationError::CycleDetected { .. }));
    }

    #[test]
    fn validation_is_idempotent() {
        let workflow = make_workflow(
            vec![make_node("a"), make_node("a"), make_node("b")],
            vec![Edge::new("a", "b"), Edge::new("b", "a"), Edge::new("b", "nowhere")],
        );
        assert_eq!(validate(&workflow), validate(&workflow));
    }

    #[test]
    fn adjacency_keeps_edge_order_and_every_node() {
        let workflow = make_workflow(
            vec![make_node("a"), make_node("b"), make_node("c")],
            vec![Edge::new("a", "c"), Edge::new("a", "b"), Edge::new("a", "ghost")],
        );
        let adjacency = adjacency(&workflow);
        assert_eq!(adjacency["a"], vec!["c", "b"]);
        assert!(adjacency["b"].is_empty());
        assert_eq!(adjacency.len(), 3);
    }
}
