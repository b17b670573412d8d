//! Canonical prompt schema and cache keying.
//!
//! Free-text prompts project onto `{action, entities, fields, params,
//! group_by, filters}` over the handbook's vocabulary. The cache key is a
//! stable hash of the key-contributing parts only - action plus sorted
//! entities, fields, and group_by - so synonymous phrasings collapse and
//! parameter values never fragment the cache.

mod dictionary;
mod normalizer;

pub use dictionary::Dictionary;
pub use normalizer::{NormalizationError, NormalizedPrompt, Normalizer};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical prompt action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Search,
    Get,
    List,
    Summarize,
    Rank,
    Create,
    Update,
    Delete,
    Trigger,
    Aggregate,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::Search,
        Action::Get,
        Action::List,
        Action::Summarize,
        Action::Rank,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Trigger,
        Action::Aggregate,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Search => "search",
            Action::Get => "get",
            Action::List => "list",
            Action::Summarize => "summarize",
            Action::Rank => "rank",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Trigger => "trigger",
            Action::Aggregate => "aggregate",
        };
        f.write_str(s)
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "search" => Ok(Action::Search),
            "get" => Ok(Action::Get),
            "list" => Ok(Action::List),
            "summarize" => Ok(Action::Summarize),
            "rank" => Ok(Action::Rank),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "trigger" => Ok(Action::Trigger),
            "aggregate" => Ok(Action::Aggregate),
            other => Err(format!("unknown action `{other}`")),
        }
    }
}

/// One filter predicate. Values never contribute to the cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: String,
    pub value: Value,
}

/// Normalized prompt schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptSchema {
    pub action: Action,
    #[serde(default)]
    pub entities: BTreeSet<String>,
    #[serde(default)]
    pub fields: BTreeSet<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl PromptSchema {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            entities: BTreeSet::new(),
            fields: BTreeSet::new(),
            params: BTreeMap::new(),
            group_by: vec![],
            filters: vec![],
        }
    }

    /// Canonical key string: action plus sorted entities, fields, group_by.
    /// Params and filter values are deliberately excluded.
    fn canonical(&self) -> String {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        let mut group_by = self.group_by.clone();
        group_by.sort();
        format!(
            "{}|{}|{}|{}",
            self.action,
            join(&self.entities),
            join(&self.fields),
            group_by.join(",")
        )
    }

    /// Stable hex cache key over the canonical string.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }
}
