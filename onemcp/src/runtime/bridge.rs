//! HTTP bridge between sandboxed snippets and configured services.
//!
//! Bound at startup to the handbook's service base URLs and auth headers
//! (`pattern` with `{token}` substituted at request time; tokens never hit
//! the logs). Serializes JSON bodies, normalizes response header names,
//! enforces a per-request timeout, polls the cancellation signal, and never
//! errors on a non-2xx status: callers get `{ok, status, headers, body_text}`
//! and decide their own error semantics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handbook::Handbook;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("unknown service `{0}`")]
    UnknownService(String),

    #[error("unknown operation `{service}.{operation}`")]
    UnknownOperation { service: String, operation: String },

    #[error("missing path parameter `{0}`")]
    MissingPathParam(String),

    #[error("http transport failed: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,
}

/// Non-throwing response shape handed to snippets.
#[derive(Clone, Debug)]
pub struct BridgeResponse {
    pub ok: bool,
    pub status: u16,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body_text: String,
}

impl BridgeResponse {
    /// The value snippets see: `{ok, status, headers, body, body_text}`
    /// where `body` is the parsed JSON or null.
    pub fn to_value(&self) -> Value {
        let body = serde_json::from_str::<Value>(&self.body_text).unwrap_or(Value::Null);
        serde_json::json!({
            "ok": self.ok,
            "status": self.status,
            "headers": self.headers,
            "body": body,
            "body_text": self.body_text,
        })
    }
}

struct Endpoint {
    base_url: String,
    auth_header: Option<(String, String)>,
    /// operationId → (method, path template).
    operations: BTreeMap<String, (String, String)>,
}

pub struct HttpBridge {
    client: reqwest::Client,
    endpoints: BTreeMap<String, Endpoint>,
    timeout: Duration,
}

impl HttpBridge {
    /// Binds every handbook service. Auth headers are rendered once here;
    /// the token itself is never logged.
    pub fn from_handbook(handbook: &Handbook) -> Self {
        let mut endpoints = BTreeMap::new();
        for service in handbook.services() {
            let operations = service
                .document
                .operations
                .iter()
                .map(|op| {
                    (
                        op.operation_id.clone(),
                        (op.method.clone(), op.path.clone()),
                    )
                })
                .collect();
            endpoints.insert(
                service.slug().to_string(),
                Endpoint {
                    base_url: service
                        .descriptor
                        .auth
                        .base_url
                        .trim_end_matches('/')
                        .to_string(),
                    auth_header: service.descriptor.auth.header(),
                    operations,
                },
            );
        }
        Self {
            client: reqwest::Client::new(),
            endpoints,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn service_slugs(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    /// Performs one operation call.
    ///
    /// `args` is the snippet-side object `{path: {..}, query: {..}, body: ..}`;
    /// every part is optional.
    pub async fn call(
        &self,
        service: &str,
        operation: &str,
        args: &Value,
        cancel: &CancellationToken,
    ) -> Result<BridgeResponse, BridgeError> {
        let endpoint = self
            .endpoints
            .get(service)
            .ok_or_else(|| BridgeError::UnknownService(service.to_string()))?;
        let (method, path_template) = endpoint.operations.get(operation).ok_or_else(|| {
            BridgeError::UnknownOperation {
                service: service.to_string(),
                operation: operation.to_string(),
            }
        })?;

        let path = render_path(path_template, args.get("path"))?;
        let url = format!("{}{}", endpoint.base_url, path);

        let method_parsed = method
            .parse::<reqwest::Method>()
            .map_err(|_| BridgeError::Transport(format!("bad method `{method}`")))?;
        let mut request = self.client.request(method_parsed, &url).timeout(self.timeout);

        if let Some((name, value)) = &endpoint.auth_header {
            request = request.header(name, value);
        }
        if let Some(query) = args.get("query").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), value_to_query_string(v)))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(body) = args.get("body") {
            if !body.is_null() {
                request = request.json(body);
            }
        }

        debug!(service, operation, %url, method = %method, "bridge call");

        let send = request.send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
            res = tokio::time::timeout(self.timeout, send) => match res {
                Ok(Ok(response)) => response,
                Ok(Err(e)) if e.is_timeout() => return Err(BridgeError::Timeout(self.timeout)),
                Ok(Err(e)) => return Err(BridgeError::Transport(e.to_string())),
                Err(_) => return Err(BridgeError::Timeout(self.timeout)),
            },
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let body_text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
            text = response.text() => text.map_err(|e| BridgeError::Transport(e.to_string()))?,
        };

        let ok = (200..300).contains(&status);
        debug!(service, operation, status, ok, bytes = body_text.len(), "bridge response");
        Ok(BridgeResponse {
            ok,
            status,
            headers,
            body_text,
        })
    }
}

/// Substitutes `{param}` placeholders in the path template.
fn render_path(template: &str, params: Option<&Value>) -> Result<String, BridgeError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &rest[start + 1..start + end];
        let value = params
            .and_then(|p| p.get(name))
            .ok_or_else(|| BridgeError::MissingPathParam(name.to_string()))?;
        out.push_str(&value_to_query_string(value));
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn value_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
