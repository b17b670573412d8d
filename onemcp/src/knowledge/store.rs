//! Pluggable graph store seam and the in-memory implementation.
//!
//! Nodes and edges are flat records keyed by id; traversal goes through the
//! store, never through in-memory pointer graphs. The trait is the boundary
//! for a real graph database; [`MemoryGraphStore`] backs tests and
//! single-process deployments. Queries never block upserts.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::{EdgeKind, GraphEdge, GraphNode};

/// Store failure; surfaces as `IO` to callers.
#[derive(Debug, Clone, Error)]
#[error("graph store error: {0}")]
pub struct GraphStoreError(pub String);

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Inserts or replaces the node with `node.key`. Idempotent on key.
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphStoreError>;

    /// Replaces every outgoing edge of `from` with `edges`, keeping the
    /// relation set authoritative for the node.
    async fn replace_edges(&self, from: &str, edges: Vec<GraphEdge>) -> Result<(), GraphStoreError>;

    /// Removes the node and its outgoing edges. Unknown keys are a no-op.
    async fn delete_node(&self, key: &str) -> Result<(), GraphStoreError>;

    async fn node(&self, key: &str) -> Result<Option<GraphNode>, GraphStoreError>;

    async fn edges_from(&self, key: &str) -> Result<Vec<GraphEdge>, GraphStoreError>;

    /// Nodes with an incoming-side `HAS_ENTITY` match: every node whose edge
    /// set contains `HAS_ENTITY → entity_id` (sanitized id).
    async fn nodes_with_entity(&self, entity_id: &str) -> Result<Vec<GraphNode>, GraphStoreError>;

    /// All node keys, sorted. Mainly for idempotence checks and tests.
    async fn node_keys(&self) -> Result<Vec<String>, GraphStoreError>;

    async fn clear(&self) -> Result<(), GraphStoreError>;
}

/// In-memory graph store on concurrent maps.
#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: DashMap<String, GraphNode>,
    outgoing: DashMap<String, Vec<GraphEdge>>,
    /// entity id → keys of nodes pointing at it (reverse HAS_ENTITY index).
    entity_index: DashMap<String, HashSet<String>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&self, from: &str, edges: &[GraphEdge]) {
        for edge in edges {
            if edge.kind == EdgeKind::HasEntity {
                if let Some(mut set) = self.entity_index.get_mut(&edge.to) {
                    set.remove(from);
                }
            }
        }
    }

    fn index(&self, from: &str, edges: &[GraphEdge]) {
        for edge in edges {
            if edge.kind == EdgeKind::HasEntity {
                self.entity_index
                    .entry(edge.to.clone())
                    .or_default()
                    .insert(from.to_string());
            }
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), GraphStoreError> {
        self.nodes.insert(node.key.clone(), node);
        Ok(())
    }

    async fn replace_edges(&self, from: &str, edges: Vec<GraphEdge>) -> Result<(), GraphStoreError> {
        if let Some(old) = self.outgoing.remove(from) {
            self.unindex(from, &old.1);
        }
        self.index(from, &edges);
        self.outgoing.insert(from.to_string(), edges);
        Ok(())
    }

    async fn delete_node(&self, key: &str) -> Result<(), GraphStoreError> {
        self.nodes.remove(key);
        if let Some(old) = self.outgoing.remove(key) {
            self.unindex(key, &old.1);
        }
        Ok(())
    }

    async fn node(&self, key: &str) -> Result<Option<GraphNode>, GraphStoreError> {
        Ok(self.nodes.get(key).map(|n| n.clone()))
    }

    async fn edges_from(&self, key: &str) -> Result<Vec<GraphEdge>, GraphStoreError> {
        Ok(self
            .outgoing
            .get(key)
            .map(|e| e.clone())
            .unwrap_or_default())
    }

    async fn nodes_with_entity(&self, entity_id: &str) -> Result<Vec<GraphNode>, GraphStoreError> {
        let Some(keys) = self.entity_index.get(entity_id) else {
            return Ok(vec![]);
        };
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        let mut nodes = Vec::with_capacity(sorted.len());
        for key in sorted {
            if let Some(node) = self.nodes.get(key) {
                nodes.push(node.clone());
            }
        }
        Ok(nodes)
    }

    async fn node_keys(&self) -> Result<Vec<String>, GraphStoreError> {
        let mut keys: Vec<String> = self.nodes.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), GraphStoreError> {
        self.nodes.clear();
        self.outgoing.clear();
        self.entity_index.clear();
        Ok(())
    }
}
