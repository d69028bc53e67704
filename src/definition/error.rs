use thiserror::Error;

/// Errors raised while parsing or validating a flow definition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DefinitionError {
    /// The JSON document could not be parsed.
    #[error("malformed definition document")]
    Malformed(#[source] serde_json::Error),

    /// The document carries a version this parser does not understand.
    #[error("unsupported definition version: {0}")]
    UnsupportedVersion(u32),

    /// A node id appears more than once.
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    /// An edge references a node that does not exist.
    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    /// The definition has no start node to seed execution from.
    #[error("definition has no start node")]
    NoStartNode,

    /// A start node has incoming edges.
    #[error("start node has predecessors: {0}")]
    StartWithPredecessors(String),

    /// An end node has outgoing edges.
    #[error("end node has successors: {0}")]
    EndWithSuccessors(String),

    /// The graph contains a cycle.
    #[error("definition graph contains a cycle involving: {0}")]
    Cycle(String),

    /// No definition is published for the requested stream.
    #[error("no definition for stream: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, DefinitionError>;
