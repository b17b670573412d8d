//! Vocabulary dictionary derived from the current handbook.
//!
//! The normalizer constrains the LLM to these tokens; anything outside the
//! dictionary in a key-contributing position is a normalization error.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::handbook::Handbook;

use super::Action;

pub const OPERATORS: [&str; 8] = ["eq", "ne", "lt", "lte", "gt", "gte", "contains", "in"];
pub const AGGREGATES: [&str; 5] = ["sum", "avg", "min", "max", "count"];

/// The canonical vocabulary for one handbook version.
#[derive(Clone, Debug, Serialize)]
pub struct Dictionary {
    pub actions: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub fields: BTreeSet<String>,
    pub operators: BTreeSet<String>,
    pub aggregates: BTreeSet<String>,
}

impl Dictionary {
    /// Builds the dictionary: actions are the fixed enum; entities come from
    /// the API descriptors; fields are property names drawn from every
    /// operation's request/response schemas (nested objects flattened one
    /// level with a dot).
    pub fn from_handbook(handbook: &Handbook) -> Self {
        let actions = Action::ALL.iter().map(|a| a.to_string()).collect();

        let mut entities = BTreeSet::new();
        let mut fields = BTreeSet::new();
        for service in handbook.services() {
            for binding in &service.descriptor.entities {
                entities.insert(binding.name.clone());
            }
            for op in &service.document.operations {
                for schema in [&op.request_schema, &op.response_schema].into_iter().flatten() {
                    collect_field_names(schema, None, &mut fields);
                }
            }
        }

        Self {
            actions,
            entities,
            fields,
            operators: OPERATORS.iter().map(|s| s.to_string()).collect(),
            aggregates: AGGREGATES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has_entity(&self, token: &str) -> bool {
        self.entities.contains(token)
    }

    pub fn has_field(&self, token: &str) -> bool {
        self.fields.contains(token)
    }
}

/// Property names of `schema`, one nesting level deep (`parent.child`).
fn collect_field_names(schema: &Value, prefix: Option<&str>, into: &mut BTreeSet<String>) {
    if let Some(items) = schema.get("items") {
        collect_field_names(items, prefix, into);
        return;
    }
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (name, prop) in properties {
        let qualified = match prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.clone(),
        };
        into.insert(qualified.clone());
        if prefix.is_none() && prop.get("properties").is_some() {
            collect_field_names(prop, Some(name), into);
        }
    }
}
