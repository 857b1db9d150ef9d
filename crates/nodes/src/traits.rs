//! The `ExecutableNode` trait — the contract every node handler must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::NodeError;

/// Identifies the run and node a handler is being invoked for.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// ID of the node being executed.
    pub node_id: String,
}

/// One upstream value delivered over an incoming edge.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub source_node_id: String,
    pub source_port: Option<String>,
    pub target_port: Option<String>,
    pub value: Value,
}

/// Accumulated outputs of a node's direct upstream nodes, in edge order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    entries: Vec<NodeInput>,
}

impl NodeInputs {
    pub fn new(entries: Vec<NodeInput>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeInput> {
        self.entries.iter()
    }

    /// Output delivered by the given upstream node, if it is connected.
    pub fn from_node(&self, source_node_id: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|i| i.source_node_id == source_node_id)
            .map(|i| &i.value)
    }

    /// Value wired into the named input port.
    pub fn port(&self, target_port: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|i| i.target_port.as_deref() == Some(target_port))
            .map(|i| &i.value)
    }

    /// All inputs as one JSON object keyed by source node id.
    pub fn to_object(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|i| (i.source_node_id.clone(), i.value.clone()))
            .collect();
        Value::Object(map)
    }
}

/// The core node trait.
///
/// Implementations are registered under a type key in a
/// [`HandlerRegistry`](crate::HandlerRegistry) and invoked by the engine's
/// dispatcher. A handler may suspend on I/O for as long as it needs.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node with its own `config` and the outputs of its
    /// upstream nodes, returning this node's JSON output.
    async fn execute(
        &self,
        config: &Value,
        inputs: &NodeInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}
