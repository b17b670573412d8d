//! OpenAPI 3.x document parsing and `$ref` resolution.
//!
//! Documents are held as `serde_json::Value` trees (YAML input is converted on
//! load) and operations are extracted into flat [`Operation`] records with
//! request/response schemas resolved through `$ref`. Resolution is
//! cycle-guarded: a schema reference already on the resolution path is left as
//! a `$ref` marker instead of recursing forever.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpenApiError {
    #[error("openapi parse failed: {0}")]
    Parse(String),

    #[error("unsupported openapi version `{0}` (3.x required)")]
    UnsupportedVersion(String),

    #[error("operation at {method} {path} has no operationId")]
    MissingOperationId { method: String, path: String },
}

/// One endpoint: `(service slug, operationId)` identifies it globally.
#[derive(Clone, Debug)]
pub struct Operation {
    pub operation_id: String,
    /// Upper-case HTTP method.
    pub method: String,
    pub path: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub parameters: Vec<Parameter>,
    /// Resolved JSON schema of the request body, when declared.
    pub request_schema: Option<Value>,
    /// Resolved JSON schema of the first 2xx response body, when declared.
    pub response_schema: Option<Value>,
    pub examples: Vec<OperationExample>,
}

#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: String,
    /// `query`, `path`, `header`, or `cookie`.
    pub location: String,
    pub required: bool,
    pub schema: Option<Value>,
    pub description: Option<String>,
}

/// A named example: request and/or response body plus the response status.
#[derive(Clone, Debug)]
pub struct OperationExample {
    pub name: String,
    pub request_body: Option<Value>,
    pub response_body: Option<Value>,
    pub status: Option<u16>,
}

/// Parsed OpenAPI document plus its extracted operations.
#[derive(Clone, Debug)]
pub struct OpenApiDocument {
    root: Value,
    pub title: String,
    pub description: Option<String>,
    pub operations: Vec<Operation>,
}

const HTTP_METHODS: [&str; 7] = ["get", "put", "post", "delete", "options", "head", "patch"];

impl OpenApiDocument {
    /// Parses YAML or JSON text into a document and extracts its operations.
    pub fn parse(text: &str) -> Result<Self, OpenApiError> {
        let root: Value = if text.trim_start().starts_with('{') {
            serde_json::from_str(text).map_err(|e| OpenApiError::Parse(e.to_string()))?
        } else {
            let yaml: serde_yaml::Value =
                serde_yaml::from_str(text).map_err(|e| OpenApiError::Parse(e.to_string()))?;
            yaml_to_json(yaml)?
        };

        let version = root
            .get("openapi")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !version.starts_with('3') {
            return Err(OpenApiError::UnsupportedVersion(version));
        }

        let title = root
            .pointer("/info/title")
            .and_then(Value::as_str)
            .unwrap_or("untitled")
            .to_string();
        let description = root
            .pointer("/info/description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let operations = extract_operations(&root)?;

        Ok(Self {
            root,
            title,
            description,
            operations,
        })
    }

    pub fn operation(&self, operation_id: &str) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }

    /// Tag names declared at document level (deduplicated, declaration order).
    pub fn tag_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        if let Some(tags) = self.root.get("tags").and_then(Value::as_array) {
            for tag in tags {
                if let Some(name) = tag.get("name").and_then(Value::as_str) {
                    if seen.insert(name.to_string()) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names
    }

    /// Resolves a schema value against this document's components.
    pub fn resolve(&self, schema: &Value) -> Value {
        resolve_refs(&self.root, schema, &mut HashSet::new())
    }
}

/// YAML → JSON value conversion. Response codes are often unquoted integers
/// in YAML (`200:`); map keys are stringified so the JSON tree stays uniform.
fn yaml_to_json(yaml: serde_yaml::Value) -> Result<Value, OpenApiError> {
    Ok(match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            serde_json::to_value(n).map_err(|e| OpenApiError::Parse(e.to_string()))?
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = Map::new();
            for (k, v) in mapping {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(OpenApiError::Parse(format!(
                            "unsupported mapping key: {other:?}"
                        )))
                    }
                };
                out.insert(key, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn extract_operations(root: &Value) -> Result<Vec<Operation>, OpenApiError> {
    let mut operations = Vec::new();
    let Some(paths) = root.get("paths").and_then(Value::as_object) else {
        return Ok(operations);
    };

    for (path, item) in paths {
        let Some(item) = item.as_object() else {
            continue;
        };
        for method in HTTP_METHODS {
            let Some(op) = item.get(method) else {
                continue;
            };
            let operation_id = op
                .get("operationId")
                .and_then(Value::as_str)
                .ok_or_else(|| OpenApiError::MissingOperationId {
                    method: method.to_uppercase(),
                    path: path.clone(),
                })?
                .to_string();

            let tags = op
                .get("tags")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let parameters = extract_parameters(root, op, item.get("parameters"));
            let request_schema = op
                .pointer("/requestBody/content/application~1json/schema")
                .map(|s| resolve_refs(root, s, &mut HashSet::new()));
            let (response_schema, success_status) = first_success_response(root, op);
            let examples = extract_examples(root, op, success_status);

            operations.push(Operation {
                operation_id,
                method: method.to_uppercase(),
                path: path.clone(),
                summary: op.get("summary").and_then(Value::as_str).map(str::to_string),
                description: op
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                tags,
                parameters,
                request_schema,
                response_schema,
                examples,
            });
        }
    }
    Ok(operations)
}

fn extract_parameters(root: &Value, op: &Value, path_level: Option<&Value>) -> Vec<Parameter> {
    let mut out = Vec::new();
    for source in [path_level, op.get("parameters")].into_iter().flatten() {
        let Some(list) = source.as_array() else {
            continue;
        };
        for p in list {
            let p = resolve_refs(root, p, &mut HashSet::new());
            let Some(name) = p.get("name").and_then(Value::as_str) else {
                continue;
            };
            out.push(Parameter {
                name: name.to_string(),
                location: p
                    .get("in")
                    .and_then(Value::as_str)
                    .unwrap_or("query")
                    .to_string(),
                required: p.get("required").and_then(Value::as_bool).unwrap_or(false),
                schema: p.get("schema").cloned(),
                description: p
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }
    out
}

/// First 2xx response with a JSON schema, plus its status code.
fn first_success_response(root: &Value, op: &Value) -> (Option<Value>, Option<u16>) {
    let Some(responses) = op.get("responses").and_then(Value::as_object) else {
        return (None, None);
    };
    let mut codes: Vec<&String> = responses.keys().collect();
    codes.sort();
    for code in codes {
        let Ok(status) = code.parse::<u16>() else {
            continue;
        };
        if !(200..300).contains(&status) {
            continue;
        }
        let schema = responses[code]
            .pointer("/content/application~1json/schema")
            .map(|s| resolve_refs(root, s, &mut HashSet::new()));
        return (schema, Some(status));
    }
    (None, None)
}

/// Collects named examples from the request body and the first 2xx response.
fn extract_examples(root: &Value, op: &Value, status: Option<u16>) -> Vec<OperationExample> {
    let mut by_name: Vec<OperationExample> = Vec::new();

    let mut upsert = |name: &str, request: Option<Value>, response: Option<Value>| {
        if let Some(existing) = by_name.iter_mut().find(|e| e.name == name) {
            if existing.request_body.is_none() {
                existing.request_body = request;
            }
            if existing.response_body.is_none() {
                existing.response_body = response;
            }
        } else {
            by_name.push(OperationExample {
                name: name.to_string(),
                request_body: request,
                response_body: response,
                status,
            });
        }
    };

    if let Some(examples) = op
        .pointer("/requestBody/content/application~1json/examples")
        .and_then(Value::as_object)
    {
        for (name, example) in examples {
            let body = example
                .get("value")
                .map(|v| resolve_refs(root, v, &mut HashSet::new()));
            upsert(name, body, None);
        }
    }

    if let Some(responses) = op.get("responses").and_then(Value::as_object) {
        for (code, response) in responses {
            if !code.parse::<u16>().map(|s| (200..300).contains(&s)).unwrap_or(false) {
                continue;
            }
            if let Some(examples) = response
                .pointer("/content/application~1json/examples")
                .and_then(Value::as_object)
            {
                for (name, example) in examples {
                    let body = example
                        .get("value")
                        .map(|v| resolve_refs(root, v, &mut HashSet::new()));
                    upsert(name, None, body);
                }
            }
        }
    }

    by_name
}

/// Resolves `$ref` nodes against `#/components/...`. References already on
/// the path stay as `$ref` markers so cyclic schemas terminate.
fn resolve_refs(root: &Value, value: &Value, path: &mut HashSet<String>) -> Value {
    match value {
        Value::Object(obj) => {
            if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
                if path.contains(reference) {
                    return value.clone();
                }
                if let Some(target) = lookup_ref(root, reference) {
                    path.insert(reference.to_string());
                    let resolved = resolve_refs(root, &target, path);
                    path.remove(reference);
                    return resolved;
                }
                return value.clone();
            }
            let mut out = Map::new();
            for (k, v) in obj {
                out.insert(k.clone(), resolve_refs(root, v, path));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_refs(root, v, path)).collect())
        }
        other => other.clone(),
    }
}

fn lookup_ref(root: &Value, reference: &str) -> Option<Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer).cloned()
}
