//! Flow definition graph.
//!
//! A definition is the immutable, validated form of the authored JSON
//! document: nodes, directed edges, and per-node retry policy. It is
//! parsed once at publish time and cached read-only thereafter.
//!
//! The graph keeps bidirectional adjacency lists so both readiness checks
//! (predecessors) and advancement (successors) are O(1) lookups.

use super::error::{DefinitionError, Result};
use super::NodeId;
use crate::core::{Backoff, RetryPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Role of a node in the flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Entry point; seed contexts are created here.
    Start,
    /// An intermediate processing node.
    State,
    /// Terminal node; executing it archives the context.
    End,
}

/// One node of a flow definition.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    id: NodeId,
    kind: NodeKind,
    retry: RetryPolicy,
}

impl NodeSpec {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }
}

/// Document format version this parser understands.
const SUPPORTED_VERSION: u32 = 1;

#[derive(Deserialize)]
struct RawDocument {
    version: u32,
    stream_id: String,
    nodes: Vec<RawNode>,
    #[serde(default)]
    edges: Vec<RawEdge>,
}

#[derive(Deserialize)]
struct RawNode {
    id: String,
    kind: RawKind,
    #[serde(default)]
    retry: Option<RawRetry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawKind {
    Start,
    State,
    End,
}

#[derive(Deserialize)]
struct RawEdge {
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct RawRetry {
    max_attempts: u32,
    #[serde(default)]
    backoff: RawBackoff,
    #[serde(default = "default_initial_delay_ms")]
    initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    multiplier: f64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum RawBackoff {
    Fixed,
    #[default]
    Exponential,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl RawRetry {
    fn into_policy(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff: match self.backoff {
                RawBackoff::Fixed => Backoff::Fixed,
                RawBackoff::Exponential => Backoff::Exponential {
                    multiplier: self.multiplier,
                },
            },
        }
    }
}

/// An immutable flow definition: the validated graph of nodes and edges a
/// stream's traces execute against.
///
/// # Example
///
/// ```
/// use nostos::definition::Definition;
///
/// let definition = Definition::from_json(
///     r#"{
///         "version": 1,
///         "stream_id": "orders",
///         "nodes": [
///             {"id": "start", "kind": "start"},
///             {"id": "reserve", "kind": "state", "retry": {"max_attempts": 3}},
///             {"id": "done", "kind": "end"}
///         ],
///         "edges": [
///             {"from": "start", "to": "reserve"},
///             {"from": "reserve", "to": "done"}
///         ]
///     }"#,
/// ).unwrap();
///
/// assert_eq!(definition.stream_id(), "orders");
/// assert_eq!(definition.roots().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Definition {
    stream_id: String,
    version: u32,
    nodes: HashMap<NodeId, NodeSpec>,
    successors: HashMap<NodeId, Vec<NodeId>>,
    predecessors: HashMap<NodeId, Vec<NodeId>>,
    roots: Vec<NodeId>,
}

impl Definition {
    /// Parses and validates a versioned JSON definition document.
    pub fn from_json(document: &str) -> Result<Self> {
        let raw: RawDocument = serde_json::from_str(document).map_err(DefinitionError::Malformed)?;

        if raw.version != SUPPORTED_VERSION {
            return Err(DefinitionError::UnsupportedVersion(raw.version));
        }

        let mut nodes = HashMap::with_capacity(raw.nodes.len());
        for raw_node in raw.nodes {
            let id = NodeId::new(raw_node.id);
            let spec = NodeSpec {
                id: id.clone(),
                kind: match raw_node.kind {
                    RawKind::Start => NodeKind::Start,
                    RawKind::State => NodeKind::State,
                    RawKind::End => NodeKind::End,
                },
                retry: raw_node
                    .retry
                    .map(RawRetry::into_policy)
                    .unwrap_or(RetryPolicy::NONE),
            };
            if nodes.insert(id.clone(), spec).is_some() {
                return Err(DefinitionError::DuplicateNode(id.to_string()));
            }
        }

        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            nodes.keys().map(|id| (id.clone(), Vec::new())).collect();
        let mut predecessors: HashMap<NodeId, Vec<NodeId>> =
            nodes.keys().map(|id| (id.clone(), Vec::new())).collect();

        for edge in raw.edges {
            let from = NodeId::new(edge.from);
            let to = NodeId::new(edge.to);
            if !nodes.contains_key(&from) {
                return Err(DefinitionError::UnknownNode(from.to_string()));
            }
            if !nodes.contains_key(&to) {
                return Err(DefinitionError::UnknownNode(to.to_string()));
            }
            if let Some(out) = successors.get_mut(&from) {
                out.push(to.clone());
            }
            if let Some(incoming) = predecessors.get_mut(&to) {
                incoming.push(from);
            }
        }

        let definition = Self {
            stream_id: raw.stream_id,
            version: raw.version,
            roots: {
                let mut roots: Vec<NodeId> = nodes
                    .values()
                    .filter(|spec| spec.kind == NodeKind::Start)
                    .map(|spec| spec.id.clone())
                    .collect();
                roots.sort();
                roots
            },
            nodes,
            successors,
            predecessors,
        };

        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(DefinitionError::NoStartNode);
        }

        for spec in self.nodes.values() {
            match spec.kind {
                NodeKind::Start if !self.predecessors[&spec.id].is_empty() => {
                    return Err(DefinitionError::StartWithPredecessors(spec.id.to_string()));
                }
                NodeKind::End if !self.successors[&spec.id].is_empty() => {
                    return Err(DefinitionError::EndWithSuccessors(spec.id.to_string()));
                }
                _ => {}
            }
        }

        self.check_cycles()
    }

    /// Tri-color DFS over the successor lists.
    fn check_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<&NodeId, Mark> =
            self.nodes.keys().map(|id| (id, Mark::Unvisited)).collect();

        // Iterative DFS with an explicit stack; (node, entered) frames.
        for start in self.nodes.keys() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            let mut stack = vec![(start, false)];
            while let Some((node, entered)) = stack.pop() {
                if entered {
                    marks.insert(node, Mark::Done);
                    continue;
                }
                if marks[node] == Mark::Done {
                    continue;
                }
                marks.insert(node, Mark::InProgress);
                stack.push((node, true));
                for next in &self.successors[node] {
                    match marks[next] {
                        Mark::InProgress => {
                            return Err(DefinitionError::Cycle(next.to_string()));
                        }
                        Mark::Unvisited => stack.push((next, false)),
                        Mark::Done => {}
                    }
                }
            }
        }

        Ok(())
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Start nodes, in stable order. Seed contexts are created here.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Nodes reachable by one outgoing edge from `id`.
    pub fn successors(&self, id: &NodeId) -> &[NodeId] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes with an edge into `id`.
    pub fn predecessors(&self, id: &NodeId) -> &[NodeId] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The retry policy for a node; `RetryPolicy::NONE` for unknown nodes.
    pub fn retry_policy(&self, id: &NodeId) -> RetryPolicy {
        self.nodes
            .get(id)
            .map(|spec| spec.retry)
            .unwrap_or(RetryPolicy::NONE)
    }
}
