//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::traits::{ExecutionContext, NodeInputs};
use crate::{ExecutableNode, NodeError};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with [`NodeError::Failed`].
    Fail(String),
    /// Panic inside `execute`.
    Panic(String),
}

/// Holds gated mocks inside `execute` until opened.
#[derive(Clone)]
pub struct MockGate {
    permits: Arc<Semaphore>,
}

impl MockGate {
    fn new() -> Self {
        Self { permits: Arc::new(Semaphore::new(0)) }
    }

    /// Let every current and future call through.
    pub fn open(&self) {
        self.permits.close();
    }

    /// Let exactly one waiting (or the next) call through.
    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Node ids of every call, in call order.
    pub calls: Arc<Mutex<Vec<String>>>,
    /// Inputs seen by every call, in call order.
    pub inputs: Arc<Mutex<Vec<NodeInputs>>>,
    gate: Option<MockGate>,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            inputs: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(msg.into()))
    }

    /// Create a mock that panics instead of returning.
    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    /// Create a succeeding mock that blocks inside `execute` until its gate
    /// is opened; simulates a long-running handler.
    pub fn gated(name: impl Into<String>, value: Value) -> (Self, MockGate) {
        let gate = MockGate::new();
        let mut node = Self::returning(name, value);
        node.gate = Some(gate.clone());
        (node, gate)
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Node ids this handler was invoked for, in call order.
    pub fn called_node_ids(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Inputs received by the most recent call.
    pub fn last_inputs(&self) -> Option<NodeInputs> {
        self.inputs.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(
        &self,
        _config: &Value,
        inputs: &NodeInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.node_id.clone());
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(inputs.clone());

        if let Some(gate) = &self.gate {
            // A closed semaphore means the gate has been opened for good.
            if let Ok(permit) = gate.permits.acquire().await {
                permit.forget();
            }
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Tag the output with the mock's name so tests can trace
                // data flowing through the pipeline.
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(out)
            }
            MockBehaviour::Fail(msg) => Err(NodeError::failed(msg.clone())),
            MockBehaviour::Panic(msg) => panic!("{}", msg),
        }
    }
}
