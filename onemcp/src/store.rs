//! Request-scoped Value Store.
//!
//! Typed `{name, type_tag, payload}` entries created by step completions,
//! readable by all later steps of the same request, discarded when the
//! request terminates. Steps write through a [`StepStoreView`] restricted to
//! their declared outputs; the view commits atomically on success and is
//! simply dropped on failure or cancellation, so no partial writes ever land.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Coarse type tag derived from the JSON payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl TypeTag {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Number(_) => TypeTag::Number,
            Value::String(_) => TypeTag::String,
            Value::Array(_) => TypeTag::Array,
            Value::Object(_) => TypeTag::Object,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub name: String,
    pub type_tag: TypeTag,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("step wrote undeclared output `{name}`")]
    UndeclaredOutput { name: String },
}

/// The per-request store. Owned by the orchestrator; fanout siblings receive
/// read-only snapshots and commit through the join.
#[derive(Clone, Debug, Default)]
pub struct ValueStore {
    entries: BTreeMap<String, ValueEntry>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ValueEntry> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|e| &e.payload)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, name: impl Into<String>, payload: Value) {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            ValueEntry {
                type_tag: TypeTag::of(&payload),
                name,
                payload,
            },
        );
    }

    /// Commits a completed step view. The view already enforced declared
    /// outputs, so this cannot fail.
    pub fn commit(&mut self, view: StepStoreView) {
        for (name, value) in view.into_written() {
            self.insert(name, value);
        }
    }

    /// All entries as one JSON object (summarizer input).
    pub fn snapshot_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.payload.clone()))
                .collect(),
        )
    }
}

/// What one step sees: its pre-bound inputs plus a write window restricted
/// to the declared output names.
#[derive(Clone, Debug)]
pub struct StepStoreView {
    inputs: BTreeMap<String, Value>,
    allowed_outputs: BTreeSet<String>,
    written: BTreeMap<String, Value>,
}

impl StepStoreView {
    pub fn new(inputs: BTreeMap<String, Value>, allowed_outputs: BTreeSet<String>) -> Self {
        Self {
            inputs,
            allowed_outputs,
            written: BTreeMap::new(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    /// Writes one output; names outside the declared set are rejected.
    pub fn write(&mut self, name: &str, value: Value) -> Result<(), StoreError> {
        if !self.allowed_outputs.contains(name) {
            return Err(StoreError::UndeclaredOutput {
                name: name.to_string(),
            });
        }
        self.written.insert(name.to_string(), value);
        Ok(())
    }

    /// Declared outputs not yet written.
    pub fn missing_outputs(&self) -> Vec<String> {
        self.allowed_outputs
            .iter()
            .filter(|n| !self.written.contains_key(*n))
            .cloned()
            .collect()
    }

    pub fn written(&self) -> &BTreeMap<String, Value> {
        &self.written
    }

    pub fn into_written(self) -> BTreeMap<String, Value> {
        self.written
    }
}
