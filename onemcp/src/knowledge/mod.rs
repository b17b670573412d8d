//! Knowledge graph: the indexed representation of the handbook used for
//! context retrieval.
//!
//! The handbook is projected into flat [`GraphNode`] records (API summaries,
//! operation documentation, input/output schema trees, named examples, and
//! semantically chunked docs) connected to entity and operation vertices via
//! `HAS_ENTITY` / `HAS_OPERATION` edges. [`GraphStore`] is the pluggable
//! seam; [`GraphQueryService`] answers entity-scoped context requests.

pub mod chunker;
pub mod indexer;
pub mod query;
pub mod sanitize;
pub mod store;

pub use chunker::{Chunk, ChunkerConfig, MarkdownChunker};
pub use indexer::{IndexReport, KnowledgeIndexer};
pub use query::{ContextItem, EntityContext, GraphQueryService, OperationRecord};
pub use sanitize::sanitize;
pub use store::{GraphStore, GraphStoreError, MemoryGraphStore};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Node kind tags, mirrored on the wire in SCREAMING_SNAKE_CASE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    ApiDocumentation,
    ApiOperationDocumentation,
    ApiOperationInput,
    ApiOperationOutput,
    ApiOperationExample,
    DocsChunk,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    Markdown,
    Json,
}

/// One graph node: flat record keyed by a sanitized deterministic key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: String,
    pub node_type: NodeType,
    pub api_slug: Option<String>,
    /// Entity names this node is about (unsanitized vocabulary form).
    pub entities: Vec<String>,
    /// Operation ids this node is about.
    pub operations: Vec<String>,
    pub content_format: ContentFormat,
    pub payload: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    HasEntity,
    HasOperation,
}

/// Directed edge from a node to an entity or operation vertex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub kind: EdgeKind,
    /// Sanitized vertex id (entity name or operation id).
    pub to: String,
}

impl GraphEdge {
    pub fn has_entity(from: impl Into<String>, entity: &str) -> Self {
        Self {
            from: from.into(),
            kind: EdgeKind::HasEntity,
            to: sanitize(entity),
        }
    }

    pub fn has_operation(from: impl Into<String>, operation: &str) -> Self {
        Self {
            from: from.into(),
            kind: EdgeKind::HasOperation,
            to: sanitize(operation),
        }
    }
}

/// Derived operation category used for context filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationCategory {
    Retrieve,
    Create,
    Update,
    Delete,
    Compute,
}

impl OperationCategory {
    /// Category from HTTP method plus the operation's summary/description.
    /// POST text mentioning query/aggregate/compute/calculate is Compute;
    /// otherwise the method decides.
    pub fn derive(method: &str, text: &str) -> Self {
        let method = method.to_ascii_uppercase();
        if method == "POST" {
            let lower = text.to_ascii_lowercase();
            if ["query", "aggregate", "compute", "calculate"]
                .iter()
                .any(|kw| lower.contains(kw))
            {
                return OperationCategory::Compute;
            }
            return OperationCategory::Create;
        }
        match method.as_str() {
            "GET" | "HEAD" => OperationCategory::Retrieve,
            "PUT" | "PATCH" => OperationCategory::Update,
            "DELETE" => OperationCategory::Delete,
            _ => OperationCategory::Retrieve,
        }
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationCategory::Retrieve => "Retrieve",
            OperationCategory::Create => "Create",
            OperationCategory::Update => "Update",
            OperationCategory::Delete => "Delete",
            OperationCategory::Compute => "Compute",
        };
        f.write_str(s)
    }
}

impl FromStr for OperationCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retrieve" => Ok(OperationCategory::Retrieve),
            "create" => Ok(OperationCategory::Create),
            "update" => Ok(OperationCategory::Update),
            "delete" => Ok(OperationCategory::Delete),
            "compute" => Ok(OperationCategory::Compute),
            other => Err(format!("unknown operation category `{other}`")),
        }
    }
}

/// Deterministic node keys (sanitized to the store's identifier rules).
pub mod keys {
    use super::sanitize;

    pub fn api(slug: &str) -> String {
        sanitize(&format!("api|{slug}"))
    }

    pub fn operation(slug: &str, operation_id: &str) -> String {
        sanitize(&format!("op|{slug}|{operation_id}"))
    }

    pub fn operation_input(slug: &str, operation_id: &str) -> String {
        sanitize(&format!("in|{slug}|{operation_id}"))
    }

    pub fn operation_output(slug: &str, operation_id: &str) -> String {
        sanitize(&format!("out|{slug}|{operation_id}"))
    }

    pub fn example(slug: &str, operation_id: &str, name: &str) -> String {
        sanitize(&format!("ex|{slug}|{operation_id}|{name}"))
    }

    pub fn docs_chunk(doc_path: &str, index: usize) -> String {
        sanitize(&format!("doc|{doc_path}|{index}"))
    }
}
