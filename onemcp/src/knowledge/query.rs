//! Entity-scoped context retrieval.
//!
//! Accepts a list of context items and returns, per item and in request
//! order, the entity's fields plus the operation records whose derived
//! category intersects the requested set. A missing entity yields an empty
//! slot, never an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::store::{GraphStore, GraphStoreError};
use super::{keys, sanitize, NodeType, OperationCategory};

/// One request slot: an entity and the operation categories of interest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextItem {
    pub entity: String,
    /// Empty set = all categories.
    #[serde(default)]
    pub operations: Vec<OperationCategory>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub referral: Option<String>,
}

impl ContextItem {
    pub fn new(entity: impl Into<String>, operations: Vec<OperationCategory>) -> Self {
        Self {
            entity: entity.into(),
            operations,
            confidence: None,
            referral: None,
        }
    }
}

/// One operation in a context response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationRecord {
    pub service: String,
    pub operation_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub method: String,
    pub path: String,
    pub category: OperationCategory,
    pub request_schema: Option<Value>,
    pub response_schema: Option<Value>,
    pub tags: Vec<String>,
    pub examples: Vec<Value>,
    /// Docs chunks mentioning this operation.
    pub documentation: Vec<String>,
}

/// Context for one requested entity. `found == false` means the entity had no
/// vertex in the graph; the slot is still present to preserve order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityContext {
    pub entity: String,
    pub found: bool,
    /// Field names drawn from the entity's operation schemas.
    pub fields: Vec<String>,
    pub operations: Vec<OperationRecord>,
    /// Docs chunks about the entity (not tied to one operation).
    pub docs: Vec<String>,
}

impl EntityContext {
    fn empty(entity: String) -> Self {
        Self {
            entity,
            found: false,
            fields: vec![],
            operations: vec![],
            docs: vec![],
        }
    }
}

pub struct GraphQueryService {
    store: Arc<dyn GraphStore>,
}

impl GraphQueryService {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Resolves every item, preserving request order.
    pub async fn query(&self, items: &[ContextItem]) -> Result<Vec<EntityContext>, GraphStoreError> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(self.query_one(item).await?);
        }
        Ok(results)
    }

    async fn query_one(&self, item: &ContextItem) -> Result<EntityContext, GraphStoreError> {
        let vertex = sanitize(&item.entity);
        let nodes = self.store.nodes_with_entity(&vertex).await?;
        if nodes.is_empty() {
            debug!(entity = %item.entity, "no graph vertex for entity");
            return Ok(EntityContext::empty(item.entity.clone()));
        }

        let wanted: BTreeSet<OperationCategory> = item.operations.iter().copied().collect();
        let mut context = EntityContext {
            entity: item.entity.clone(),
            found: true,
            fields: vec![],
            operations: vec![],
            docs: vec![],
        };
        let mut fields: BTreeSet<String> = BTreeSet::new();

        for node in &nodes {
            match node.node_type {
                NodeType::ApiOperationDocumentation => {
                    let Some(record) = self.operation_record(node, &nodes).await? else {
                        continue;
                    };
                    if !wanted.is_empty() && !wanted.contains(&record.category) {
                        continue;
                    }
                    collect_fields(&record.request_schema, &mut fields);
                    collect_fields(&record.response_schema, &mut fields);
                    context.operations.push(record);
                }
                NodeType::DocsChunk => {
                    if let Some(content) = node.payload.get("content").and_then(Value::as_str) {
                        context.docs.push(content.to_string());
                    }
                }
                _ => {}
            }
        }

        context.fields = fields.into_iter().collect();
        Ok(context)
    }

    /// Builds the operation record from its documentation node plus the
    /// sibling input/output/example nodes.
    async fn operation_record(
        &self,
        node: &super::GraphNode,
        entity_nodes: &[super::GraphNode],
    ) -> Result<Option<OperationRecord>, GraphStoreError> {
        let Some(slug) = node.api_slug.as_deref() else {
            return Ok(None);
        };
        let Some(operation_id) = node.operations.first() else {
            return Ok(None);
        };
        let payload = &node.payload;
        let category = payload
            .get("category")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(OperationCategory::Retrieve);

        let request_schema = self
            .store
            .node(&keys::operation_input(slug, operation_id))
            .await?
            .map(|n| n.payload);
        let response_schema = self
            .store
            .node(&keys::operation_output(slug, operation_id))
            .await?
            .map(|n| n.payload);

        // Examples and op-scoped docs live among the entity's node set.
        let mut examples = Vec::new();
        let mut documentation = Vec::new();
        for sibling in entity_nodes {
            if !sibling.operations.iter().any(|op| op == operation_id) {
                continue;
            }
            match sibling.node_type {
                NodeType::ApiOperationExample => examples.push(sibling.payload.clone()),
                NodeType::DocsChunk => {
                    if let Some(content) = sibling.payload.get("content").and_then(Value::as_str) {
                        documentation.push(content.to_string());
                    }
                }
                _ => {}
            }
        }

        Ok(Some(OperationRecord {
            service: slug.to_string(),
            operation_id: operation_id.clone(),
            summary: payload.get("summary").and_then(Value::as_str).map(String::from),
            description: payload
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
            method: payload
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_string(),
            path: payload
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or("/")
                .to_string(),
            category,
            request_schema,
            response_schema,
            tags: payload
                .get("tags")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            examples,
            documentation,
        }))
    }
}

/// Top-level property names of a JSON schema object.
fn collect_fields(schema: &Option<Value>, into: &mut BTreeSet<String>) {
    let Some(properties) = schema
        .as_ref()
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
    else {
        // Array schemas expose their item properties.
        if let Some(items) = schema.as_ref().and_then(|s| s.get("items")) {
            collect_fields(&Some(items.clone()), into);
        }
        return;
    };
    for name in properties.keys() {
        into.insert(name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handbook::{fixtures, Handbook};
    use crate::knowledge::{KnowledgeIndexer, MemoryGraphStore};

    async fn service() -> GraphQueryService {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_acme_handbook(dir.path());
        let handbook = Handbook::load(dir.path()).unwrap();
        let store = Arc::new(MemoryGraphStore::new());
        KnowledgeIndexer::new(store.clone())
            .index(&handbook)
            .await
            .unwrap();
        GraphQueryService::new(store)
    }

    /// **Scenario**: entity `sale` with categories {Compute, Retrieve}
    /// returns query and listSales but not createSale.
    #[tokio::test]
    async fn category_filter_applies() {
        let svc = service().await;
        let results = svc
            .query(&[ContextItem::new(
                "sale",
                vec![OperationCategory::Compute, OperationCategory::Retrieve],
            )])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let ctx = &results[0];
        assert!(ctx.found);
        let ids: Vec<&str> = ctx.operations.iter().map(|o| o.operation_id.as_str()).collect();
        assert!(ids.contains(&"query"), "{ids:?}");
        assert!(ids.contains(&"listSales"), "{ids:?}");
        assert!(!ids.contains(&"createSale"), "{ids:?}");
    }

    /// **Scenario**: a missing entity yields an empty slot, not an error, and
    /// multi-item request order is preserved.
    #[tokio::test]
    async fn missing_entity_and_order() {
        let svc = service().await;
        let results = svc
            .query(&[
                ContextItem::new("ghost", vec![]),
                ContextItem::new("sale", vec![OperationCategory::Compute]),
            ])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity, "ghost");
        assert!(!results[0].found);
        assert!(results[0].operations.is_empty());
        assert_eq!(results[1].entity, "sale");
        assert_eq!(results[1].operations.len(), 1);
        assert_eq!(results[1].operations[0].operation_id, "query");
    }

    /// **Scenario**: records carry resolved schemas, named examples, and the
    /// entity's field names drawn from those schemas.
    #[tokio::test]
    async fn records_carry_schemas_examples_fields() {
        let svc = service().await;
        let results = svc
            .query(&[ContextItem::new("sale", vec![OperationCategory::Compute])])
            .await
            .unwrap();
        let op = &results[0].operations[0];
        assert_eq!(op.method, "POST");
        assert!(op.request_schema.is_some());
        assert!(op.response_schema.is_some());
        assert_eq!(op.examples.len(), 1);
        assert_eq!(op.examples[0]["name"], "totalByYear");
        assert!(results[0].fields.contains(&"aggregate".to_string()));
        assert!(results[0].fields.contains(&"total".to_string()));
    }

    /// **Scenario**: docs chunks mentioning the entity ride along in `docs`.
    #[tokio::test]
    async fn docs_ride_along() {
        let svc = service().await;
        let results = svc.query(&[ContextItem::new("sale", vec![])]).await.unwrap();
        assert!(results[0].docs.iter().any(|d| d.contains("Aggregates")));
    }
}
