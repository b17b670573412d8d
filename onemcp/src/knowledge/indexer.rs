//! Handbook → knowledge graph projection.
//!
//! One API_DOCUMENTATION node per service, one API_OPERATION_DOCUMENTATION
//! per operation (with derived category), API_OPERATION_INPUT/OUTPUT schema
//! trees, API_OPERATION_EXAMPLE per named example, and DOCS_CHUNK nodes from
//! the semantic markdown chunker. Upserts are idempotent on key; before
//! inserting a node's edges the prior outgoing set is replaced wholesale.
//! Per-node store failures are logged and indexing rolls forward.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::handbook::{Handbook, Operation, Service};

use super::chunker::{ChunkerConfig, MarkdownChunker};
use super::store::{GraphStore, GraphStoreError};
use super::{keys, sanitize, ContentFormat, GraphEdge, GraphNode, NodeType, OperationCategory};

/// Counters from one indexing pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub nodes: usize,
    pub edges: usize,
    pub failures: usize,
}

pub struct KnowledgeIndexer {
    store: Arc<dyn GraphStore>,
    chunker: MarkdownChunker,
}

impl KnowledgeIndexer {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self::with_chunker(store, ChunkerConfig::default())
    }

    pub fn with_chunker(store: Arc<dyn GraphStore>, config: ChunkerConfig) -> Self {
        Self {
            store,
            chunker: MarkdownChunker::new(config),
        }
    }

    /// Indexes the whole handbook. Individual node failures are logged and
    /// counted, not fatal; only a totally unusable store should error out.
    pub async fn index(&self, handbook: &Handbook) -> Result<IndexReport, GraphStoreError> {
        let mut report = IndexReport::default();

        for service in handbook.services() {
            self.index_service(service, &mut report).await;
        }
        for (path, content) in handbook.docs() {
            self.index_doc(handbook, path, content, &mut report).await;
        }

        info!(
            nodes = report.nodes,
            edges = report.edges,
            failures = report.failures,
            version = %handbook.version(),
            "handbook indexed"
        );
        Ok(report)
    }

    async fn index_service(&self, service: &Service, report: &mut IndexReport) {
        let slug = service.slug().to_string();
        let entities: Vec<String> = service
            .descriptor
            .entities
            .iter()
            .map(|e| e.name.clone())
            .collect();
        let operations: Vec<String> = service
            .document
            .operations
            .iter()
            .map(|op| op.operation_id.clone())
            .collect();

        let api_node = GraphNode {
            key: keys::api(&slug),
            node_type: NodeType::ApiDocumentation,
            api_slug: Some(slug.clone()),
            entities: entities.clone(),
            operations: operations.clone(),
            content_format: ContentFormat::Json,
            payload: json!({
                "title": service.document.title,
                "description": service.document.description,
                "tags": service.document.tag_names(),
                "name": service.descriptor.name,
            }),
        };
        self.put(api_node, report).await;

        for op in &service.document.operations {
            self.index_operation(service, op, report).await;
        }
    }

    /// Entities bound to this operation: declared bindings whose tag matches
    /// one of the operation's tags (a binding without a tag matches all).
    fn operation_entities(service: &Service, op: &Operation) -> Vec<String> {
        service
            .descriptor
            .entities
            .iter()
            .filter(|binding| match &binding.tag {
                Some(tag) => op.tags.iter().any(|t| t == tag),
                None => true,
            })
            .map(|binding| binding.name.clone())
            .collect()
    }

    async fn index_operation(&self, service: &Service, op: &Operation, report: &mut IndexReport) {
        let slug = service.slug();
        let entities = Self::operation_entities(service, op);
        let doc_text = format!(
            "{} {}",
            op.summary.as_deref().unwrap_or(""),
            op.description.as_deref().unwrap_or("")
        );
        let category = OperationCategory::derive(&op.method, &doc_text);

        let parameters: Vec<serde_json::Value> = op
            .parameters
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "in": p.location,
                    "required": p.required,
                    "schema": p.schema,
                    "description": p.description,
                })
            })
            .collect();

        let doc_node = GraphNode {
            key: keys::operation(slug, &op.operation_id),
            node_type: NodeType::ApiOperationDocumentation,
            api_slug: Some(slug.to_string()),
            entities: entities.clone(),
            operations: vec![op.operation_id.clone()],
            content_format: ContentFormat::Json,
            payload: json!({
                "summary": op.summary,
                "description": op.description,
                "method": op.method,
                "path": op.path,
                "parameters": parameters,
                "tags": op.tags,
                "category": category.to_string(),
            }),
        };
        self.put(doc_node, report).await;

        if let Some(schema) = &op.request_schema {
            let node = GraphNode {
                key: keys::operation_input(slug, &op.operation_id),
                node_type: NodeType::ApiOperationInput,
                api_slug: Some(slug.to_string()),
                entities: entities.clone(),
                operations: vec![op.operation_id.clone()],
                content_format: ContentFormat::Json,
                payload: schema.clone(),
            };
            self.put(node, report).await;
        }

        if let Some(schema) = &op.response_schema {
            let node = GraphNode {
                key: keys::operation_output(slug, &op.operation_id),
                node_type: NodeType::ApiOperationOutput,
                api_slug: Some(slug.to_string()),
                entities: entities.clone(),
                operations: vec![op.operation_id.clone()],
                content_format: ContentFormat::Json,
                payload: schema.clone(),
            };
            self.put(node, report).await;
        }

        for example in &op.examples {
            let node = GraphNode {
                key: keys::example(slug, &op.operation_id, &example.name),
                node_type: NodeType::ApiOperationExample,
                api_slug: Some(slug.to_string()),
                entities: entities.clone(),
                operations: vec![op.operation_id.clone()],
                content_format: ContentFormat::Json,
                payload: json!({
                    "name": example.name,
                    "request": example.request_body,
                    "response": example.response_body,
                    "status": example.status,
                }),
            };
            self.put(node, report).await;
        }
    }

    async fn index_doc(
        &self,
        handbook: &Handbook,
        path: &str,
        content: &str,
        report: &mut IndexReport,
    ) {
        let known_entities: Vec<String> = handbook
            .services()
            .flat_map(|s| s.descriptor.entities.iter().map(|e| e.name.clone()))
            .collect();
        let known_operations: Vec<(String, String)> = handbook
            .services()
            .flat_map(|s| {
                s.document
                    .operations
                    .iter()
                    .map(|op| (s.slug().to_string(), op.operation_id.clone()))
            })
            .collect();

        for (i, chunk) in self.chunker.chunk(content).iter().enumerate() {
            let lower = chunk.content.to_ascii_lowercase();
            let entities: Vec<String> = known_entities
                .iter()
                .filter(|e| lower.contains(&e.to_ascii_lowercase()))
                .cloned()
                .collect();
            let operations: Vec<String> = known_operations
                .iter()
                .filter(|(_, op)| lower.contains(&op.to_ascii_lowercase()))
                .map(|(_, op)| op.clone())
                .collect();

            let node = GraphNode {
                key: keys::docs_chunk(path, i),
                node_type: NodeType::DocsChunk,
                api_slug: None,
                entities,
                operations,
                content_format: ContentFormat::Markdown,
                payload: json!({
                    "section_path": chunk.section_path,
                    "content": chunk.content,
                    "token_estimate": chunk.token_estimate,
                    "doc_path": path,
                }),
            };
            self.put(node, report).await;
        }
    }

    /// Upserts one node plus its authoritative edge set; failures roll forward.
    async fn put(&self, node: GraphNode, report: &mut IndexReport) {
        let key = node.key.clone();
        let mut edges: Vec<GraphEdge> = Vec::new();
        for entity in &node.entities {
            edges.push(GraphEdge::has_entity(key.clone(), entity));
        }
        for operation in &node.operations {
            edges.push(GraphEdge::has_operation(key.clone(), operation));
        }
        let edge_count = edges.len();

        if let Err(e) = self.store.upsert_node(node).await {
            warn!(key = %key, error = %e, "node upsert failed, continuing");
            report.failures += 1;
            return;
        }
        if let Err(e) = self.store.replace_edges(&key, edges).await {
            warn!(key = %key, error = %e, "edge replace failed, continuing");
            report.failures += 1;
            return;
        }
        report.nodes += 1;
        report.edges += edge_count;
    }
}

/// Convenience: sanitized entity vertex id for queries.
pub fn entity_vertex(entity: &str) -> String {
    sanitize(entity)
}
