//! `nodes` crate — the `ExecutableNode` trait, the handler registry and
//! built-in node implementations.
//!
//! Every node handler must implement [`ExecutableNode`]. The engine crate
//! looks handlers up by type key in a [`HandlerRegistry`] and dispatches
//! execution through this trait object.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::NodeError;
pub use registry::HandlerRegistry;
pub use traits::{ExecutableNode, ExecutionContext, NodeInput, NodeInputs};
