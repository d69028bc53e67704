use super::error::{DefinitionError, Result};
use super::Definition;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// In-memory cache of published flow definitions, keyed by stream id.
///
/// Definitions are immutable once published; republishing a stream swaps
/// the cached entry atomically. A stream is considered live exactly when a
/// definition for it is present here — the recovery scan only touches
/// contexts of live streams and reports the rest.
///
/// The registry is cheap to clone behind an `Arc` and safe to share across
/// workers and the recovery schedule.
#[derive(Default)]
pub struct Registry {
    definitions: DashMap<String, Arc<Definition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
        }
    }

    /// Publishes a definition, replacing any previous one for the stream.
    pub fn publish(&self, definition: Definition) -> Arc<Definition> {
        let definition = Arc::new(definition);
        let stream_id = definition.stream_id().to_string();
        self.definitions.insert(stream_id.clone(), Arc::clone(&definition));
        info!(stream_id = %stream_id, nodes = definition.len(), "published flow definition");
        definition
    }

    /// Parses a JSON document and publishes the result.
    pub fn publish_json(&self, document: &str) -> Result<Arc<Definition>> {
        Ok(self.publish(Definition::from_json(document)?))
    }

    /// Looks up the definition for a stream.
    pub fn get(&self, stream_id: &str) -> Option<Arc<Definition>> {
        self.definitions.get(stream_id).map(|entry| Arc::clone(&entry))
    }

    /// Like [`Registry::get`] but returns `DefinitionError::NotFound`.
    pub fn resolve(&self, stream_id: &str) -> Result<Arc<Definition>> {
        self.get(stream_id)
            .ok_or_else(|| DefinitionError::NotFound(stream_id.to_string()))
    }

    /// Returns true if a definition for the stream is published.
    pub fn contains(&self, stream_id: &str) -> bool {
        self.definitions.contains_key(stream_id)
    }

    /// Ids of all live streams.
    pub fn stream_ids(&self) -> Vec<String> {
        self.definitions.iter().map(|e| e.key().clone()).collect()
    }

    /// Removes a stream's definition, returning it if present.
    pub fn remove(&self, stream_id: &str) -> Option<Arc<Definition>> {
        self.definitions.remove(stream_id).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "version": 1, "stream_id": "orders",
        "nodes": [
            {"id": "start", "kind": "start"},
            {"id": "done", "kind": "end"}
        ],
        "edges": [{"from": "start", "to": "done"}]
    }"#;

    #[test]
    fn test_publish_and_resolve() {
        let registry = Registry::new();
        assert!(!registry.contains("orders"));

        registry.publish_json(DOC).unwrap();

        assert!(registry.contains("orders"));
        assert_eq!(registry.resolve("orders").unwrap().len(), 2);
        assert_eq!(registry.stream_ids(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_resolve_missing() {
        let registry = Registry::new();
        assert!(matches!(
            registry.resolve("ghost"),
            Err(DefinitionError::NotFound(_))
        ));
    }

    #[test]
    fn test_republish_swaps() {
        let registry = Registry::new();
        registry.publish_json(DOC).unwrap();
        let replacement = DOC.replace("\"done\"", "\"finish\"");
        registry.publish_json(&replacement).unwrap();

        let definition = registry.get("orders").unwrap();
        assert!(definition.node(&super::super::NodeId::new("finish")).is_some());
    }

    #[test]
    fn test_remove() {
        let registry = Registry::new();
        registry.publish_json(DOC).unwrap();
        assert!(registry.remove("orders").is_some());
        assert!(!registry.contains("orders"));
        assert!(registry.remove("orders").is_none());
    }
}
