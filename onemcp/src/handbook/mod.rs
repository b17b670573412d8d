//! Handbook loading: the immutable on-disk bundle the system knows.
//!
//! A handbook root contains `agent.yaml`, `apis/` with OpenAPI 3.x files,
//! a `docs/` markdown tree, and an optional `regression-suite/`. Loading
//! builds an immutable snapshot; re-load builds a fresh snapshot and the
//! owner swaps the `Arc`. The version digest keys plan-cache validity.

mod descriptor;
mod openapi;
mod validate;

pub use descriptor::{AgentDescriptor, ApiDescriptor, EntityBinding, ServiceAuth, StageTimeouts};
pub use openapi::{OpenApiDocument, OpenApiError, Operation, OperationExample, Parameter};
pub use validate::{check_layout, ValidationError};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

/// One service: its descriptor plus the parsed OpenAPI document.
#[derive(Clone, Debug)]
pub struct Service {
    pub descriptor: ApiDescriptor,
    pub document: OpenApiDocument,
}

impl Service {
    pub fn slug(&self) -> &str {
        &self.descriptor.slug
    }

    pub fn operation(&self, operation_id: &str) -> Option<&Operation> {
        self.document.operation(operation_id)
    }
}

/// Immutable handbook snapshot.
#[derive(Clone, Debug)]
pub struct Handbook {
    root: PathBuf,
    version: String,
    agent: AgentDescriptor,
    services: BTreeMap<String, Service>,
    /// Markdown documents by path relative to `docs/`.
    docs: BTreeMap<String, String>,
}

impl Handbook {
    /// Loads and validates the bundle at `root`.
    ///
    /// Fails with a [`ValidationError`] listing every missing or incorrect
    /// artifact; content problems (unparseable descriptors, duplicate
    /// operation ids, unresolvable refs) are collected the same way.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let root = root.as_ref().to_path_buf();
        let mut problems = validate::check_layout(&root);

        // Layout problems make content checks meaningless; report and stop.
        if !problems.is_empty() {
            return Err(ValidationError::new(problems));
        }

        let agent_text = std::fs::read_to_string(root.join("agent.yaml"))
            .map_err(|e| ValidationError::single(format!("agent.yaml: unreadable ({e})")))?;
        let agent: AgentDescriptor = match serde_yaml::from_str(&agent_text) {
            Ok(agent) => agent,
            Err(e) => {
                return Err(ValidationError::single(format!("agent.yaml: parse failed ({e})")))
            }
        };

        if agent.apis.is_empty() {
            problems.push("agent.yaml: no API descriptors declared".to_string());
        }

        let mut services = BTreeMap::new();
        for api in &agent.apis {
            let spec_path = root.join(&api.spec_ref);
            let text = match std::fs::read_to_string(&spec_path) {
                Ok(text) => text,
                Err(e) => {
                    problems.push(format!("{}: unreadable ({e})", api.spec_ref));
                    continue;
                }
            };
            let document = match OpenApiDocument::parse(&text) {
                Ok(document) => document,
                Err(e) => {
                    problems.push(format!("{}: {e}", api.spec_ref));
                    continue;
                }
            };
            if services
                .insert(
                    api.slug.clone(),
                    Service {
                        descriptor: api.clone(),
                        document,
                    },
                )
                .is_some()
            {
                problems.push(format!("duplicate service slug `{}`", api.slug));
            }
        }

        for service in services.values() {
            let mut seen = std::collections::HashSet::new();
            for op in &service.document.operations {
                if !seen.insert(op.operation_id.clone()) {
                    problems.push(format!(
                        "duplicate operationId `{}` in service `{}`",
                        op.operation_id,
                        service.slug()
                    ));
                }
            }
        }

        if !problems.is_empty() {
            return Err(ValidationError::new(problems));
        }

        let docs = load_docs(&root.join("docs"));
        let version = compute_version(&root);

        info!(
            root = %root.display(),
            version = %version,
            services = services.len(),
            docs = docs.len(),
            "handbook loaded"
        );

        Ok(Self {
            root,
            version,
            agent,
            services,
            docs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content digest of the bundle; plans are only valid for the version
    /// that produced them.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn agent(&self) -> &AgentDescriptor {
        &self.agent
    }

    pub fn service(&self, slug: &str) -> Option<&Service> {
        self.services.get(slug)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    /// Resolves `(service slug, operationId)`.
    pub fn operation(&self, slug: &str, operation_id: &str) -> Option<&Operation> {
        self.services.get(slug)?.operation(operation_id)
    }

    /// Markdown document by path relative to `docs/`.
    pub fn doc(&self, path: &str) -> Option<&str> {
        self.docs.get(path).map(String::as_str)
    }

    pub fn docs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.docs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Reads every markdown file under `docs/`, keyed by relative path.
fn load_docs(docs_root: &Path) -> BTreeMap<String, String> {
    let mut docs = BTreeMap::new();
    for entry in WalkDir::new(docs_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Ok(rel) = path.strip_prefix(docs_root) else {
            continue;
        };
        match std::fs::read_to_string(path) {
            Ok(content) => {
                docs.insert(rel.to_string_lossy().replace('\\', "/"), content);
            }
            Err(e) => debug!(path = %path.display(), %e, "skipping unreadable doc"),
        }
    }
    docs
}

/// Sha256 over sorted (relative path, content) pairs of every file in the
/// bundle. Deterministic across loads of identical content.
fn compute_version(root: &Path) -> String {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();

    let mut hasher = Sha256::new();
    for path in files {
        if let Ok(rel) = path.strip_prefix(root) {
            hasher.update(rel.to_string_lossy().replace('\\', "/").as_bytes());
            hasher.update([0u8]);
        }
        if let Ok(bytes) = std::fs::read(&path) {
            hasher.update(&bytes);
            hasher.update([0u8]);
        }
    }
    hex::encode(hasher.finalize())
}
