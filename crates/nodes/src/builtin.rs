//! Small utility handlers that ship with the crate.
//!
//! These carry no business logic; they exist so workflows can be wired up
//! and exercised end to end without external integrations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{ExecutionContext, NodeInputs};
use crate::{ExecutableNode, HandlerRegistry, NodeError};

/// Register every built-in handler under its default type key.
pub fn register_builtins(registry: &mut HandlerRegistry) {
    registry.register("constant", Arc::new(ConstantNode));
    registry.register("passthrough", Arc::new(PassthroughNode));
    registry.register("delay", Arc::new(DelayNode));
}

/// Returns `config.value` (or `null` when absent), ignoring its inputs.
#[derive(Debug, Default)]
pub struct ConstantNode;

#[async_trait]
impl ExecutableNode for ConstantNode {
    async fn execute(
        &self,
        config: &Value,
        _inputs: &NodeInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        Ok(config.get("value").cloned().unwrap_or(Value::Null))
    }
}

/// Forwards its inputs: a single input is returned as-is, several are merged
/// into an object keyed by source node id.
#[derive(Debug, Default)]
pub struct PassthroughNode;

#[async_trait]
impl ExecutableNode for PassthroughNode {
    async fn execute(
        &self,
        _config: &Value,
        inputs: &NodeInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        Ok(forward(inputs))
    }
}

/// Sleeps for `config.ms` milliseconds, then behaves like [`PassthroughNode`].
#[derive(Debug, Default)]
pub struct DelayNode;

#[async_trait]
impl ExecutableNode for DelayNode {
    async fn execute(
        &self,
        config: &Value,
        inputs: &NodeInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let ms = match config.get("ms") {
            None => 0,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| NodeError::InvalidConfig("'ms' must be a non-negative integer".into()))?,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(forward(inputs))
    }
}

fn forward(inputs: &NodeInputs) -> Value {
    let mut iter = inputs.iter();
    match (iter.next(), iter.next()) {
        (None, _) => Value::Null,
        (Some(only), None) => only.value.clone(),
        _ => inputs.to_object(),
    }
}
