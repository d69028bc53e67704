//! Flow definitions: the declarative graphs that traces execute against.
//!
//! A definition is authored as a versioned JSON document (nodes, edges,
//! per-node retry policy), parsed and validated once at publish time, and
//! cached read-only in a [`Registry`] keyed by stream id.
//!
//! This module hides the document format and the graph representation;
//! consumers only see [`Definition`] accessors (roots, successors,
//! predecessors, retry policy per node).

mod error;
mod graph;
mod node_id;
mod registry;

pub use error::{DefinitionError, Result};
pub use graph::{Definition, NodeKind, NodeSpec};
pub use node_id::NodeId;
pub use registry::Registry;
