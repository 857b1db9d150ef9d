//! Maps `node_type` strings to handler implementations.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::ExecutableNode;

/// Handler lookup table, populated before the engine accepts workflows.
///
/// Registering under an existing key replaces the previous handler.
/// Unknown types are only reported when a node of that type is dispatched.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ExecutableNode>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the [`builtin`](crate::builtin) handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn ExecutableNode>) {
        let node_type = node_type.into();
        debug!("registering handler for node type '{}'", node_type);
        self.handlers.insert(node_type, handler);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn ExecutableNode>> {
        self.handlers.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// Registered type keys, sorted.
    pub fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.node_types())
            .finish()
    }
}
