//! Node Dispatcher — resolves a node's handler and invokes it.
//!
//! The dispatcher only reads execution state; recording results is the
//! tracker's job, so tests can swap in fake handlers without touching state.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error};

use nodes::{ExecutionContext, HandlerRegistry, NodeInput, NodeInputs};

use crate::models::{Execution, NodeDefinition, NodeStatus, Workflow};
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct NodeDispatcher {
    registry: Arc<HandlerRegistry>,
}

impl NodeDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run `node`'s handler with its config and its upstream outputs.
    ///
    /// # Errors
    /// - [`EngineError::UnknownNodeType`] if no handler is registered.
    /// - [`EngineError::Handler`] wrapping the handler's own error unchanged.
    /// - [`EngineError::HandlerPanicked`] if the handler panicked.
    pub async fn dispatch(
        &self,
        workflow: &Workflow,
        node: &NodeDefinition,
        execution: &Execution,
    ) -> Result<serde_json::Value, EngineError> {
        let handler = self
            .registry
            .get(&node.node_type)
            .ok_or_else(|| EngineError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            })?;

        let inputs = collect_inputs(workflow, node, execution);
        let ctx = ExecutionContext {
            workflow_id: workflow.id,
            execution_id: execution.id,
            node_id: node.id.clone(),
        };

        debug!(
            "dispatching node '{}' (type '{}') with {} input(s)",
            node.id,
            node.node_type,
            inputs.len()
        );

        match AssertUnwindSafe(handler.execute(&node.config, &inputs, &ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(|source| EngineError::Handler {
                node_id: node.id.clone(),
                source,
            }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("handler for node '{}' panicked: {}", node.id, message);
                Err(EngineError::HandlerPanicked {
                    node_id: node.id.clone(),
                    message,
                })
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// One input per incoming edge whose source node has completed.
fn collect_inputs(workflow: &Workflow, node: &NodeDefinition, execution: &Execution) -> NodeInputs {
    let entries = workflow
        .edges_into(&node.id)
        .filter_map(|edge| {
            let upstream = execution.node_results.get(&edge.from)?;
            if upstream.status != NodeStatus::Completed {
                return None;
            }
            Some(NodeInput {
                source_node_id: edge.from.clone(),
                source_port: edge.from_port.clone(),
                target_port: edge.to_port.clone(),
                value: upstream.output.clone()?,
            })
        })
        .collect();
    NodeInputs::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeResult};
    use chrono::Utc;
    use nodes::mock::MockNode;
    use nodes::NodeError;
    use serde_json::json;

    fn completed(output: serde_json::Value) -> NodeResult {
        let mut result = NodeResult::started(Utc::now());
        result.status = NodeStatus::Completed;
        result.output = Some(output);
        result
    }

    fn dispatcher_with(node_type: &str, handler: MockNode) -> (NodeDispatcher, Arc<MockNode>) {
        let handler = Arc::new(handler);
        let mut registry = HandlerRegistry::new();
        registry.register(node_type, handler.clone());
        (NodeDispatcher::new(Arc::new(registry)), handler)
    }

    #[tokio::test]
    async fn passes_upstream_outputs_with_ports() {
        let wf = Workflow::new(
            "d",
            vec![
                NodeDefinition::new("a", "mock"),
                NodeDefinition::new("b", "mock"),
                NodeDefinition::new("c", "mock"),
            ],
            vec![Edge::new("a", "c").with_ports("out", "left"), Edge::new("b", "c")],
        );
        let mut exec = Execution::new(wf.id);
        exec.node_results.insert("a".into(), completed(json!(1)));
        exec.node_results.insert("b".into(), completed(json!(2)));

        let (dispatcher, handler) = dispatcher_with("mock", MockNode::returning("c", json!({})));
        let node = wf.node("c").unwrap();
        let out = dispatcher.dispatch(&wf, node, &exec).await.unwrap();

        assert_eq!(out["node"], "c");
        let inputs = handler.last_inputs().unwrap();
        assert_eq!(inputs.port("left"), Some(&json!(1)));
        assert_eq!(inputs.from_node("b"), Some(&json!(2)));
        assert_eq!(handler.called_node_ids(), vec!["c"]);
    }

    #[tokio::test]
    async fn unknown_type_is_a_dispatch_error() {
        let wf = Workflow::new("d", vec![NodeDefinition::new("a", "http")], vec![]);
        let (dispatcher, handler) = dispatcher_with("mock", MockNode::returning("m", json!({})));

        let err = dispatcher
            .dispatch(&wf, &wf.nodes[0], &Execution::new(wf.id))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeType { ref node_type, .. } if node_type == "http"));
        assert_eq!(handler.call_count(), 0);
    }

    #[tokio::test]
    async fn handler_error_is_wrapped_unchanged() {
        let wf = Workflow::new("d", vec![NodeDefinition::new("a", "mock")], vec![]);
        let (dispatcher, _) = dispatcher_with("mock", MockNode::failing("m", "bad gateway"));

        let err = dispatcher
            .dispatch(&wf, &wf.nodes[0], &Execution::new(wf.id))
            .await
            .unwrap_err();
        match err {
            EngineError::Handler { node_id, source } => {
                assert_eq!(node_id, "a");
                assert_eq!(source, NodeError::Failed("bad gateway".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_panic_becomes_an_error() {
        let wf = Workflow::new("d", vec![NodeDefinition::new("a", "mock")], vec![]);
        let (dispatcher, handler) = dispatcher_with("mock", MockNode::panicking("m", "kaboom"));

        let err = dispatcher
            .dispatch(&wf, &wf.nodes[0], &Execution::new(wf.id))
            .await
            .unwrap_err();
        assert_eq!(err.node_id(), Some("a"));
        assert!(matches!(
            err,
            EngineError::HandlerPanicked { ref message, .. } if message == "kaboom"
        ));
        assert_eq!(handler.call_count(), 1);
    }
}
