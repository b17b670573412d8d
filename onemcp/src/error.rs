//! Error taxonomy surfaced to callers.
//!
//! Every failure that escapes the orchestrator is wrapped in a [`OneMcpError`]
//! envelope carrying the error code, the pipeline stage where it occurred, and
//! optional cause/context. Module-local error enums (`LlmError`,
//! `ValidationError`, …) convert into the envelope at the orchestrator
//! boundary; stack traces stay in server logs.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Stable error code reported over the MCP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad handbook or descriptor structure.
    Validation,
    /// Prompt contained tokens outside the handbook dictionary.
    Normalization,
    /// Unresolvable operation or empty retrieval context.
    Planning,
    /// Snippet failed to compile after the repair budget.
    Compilation,
    /// Step failure or missing declared outputs.
    Execution,
    Timeout,
    Cancelled,
    /// LLM provider error (transport or semantic).
    Provider,
    /// HTTP bridge transport failure.
    Network,
    /// Graph store or disk I/O failure.
    Io,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Normalization => "NORMALIZATION",
            ErrorCode::Planning => "PLANNING",
            ErrorCode::Compilation => "COMPILATION",
            ErrorCode::Execution => "EXECUTION",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Provider => "PROVIDER",
            ErrorCode::Network => "NETWORK",
            ErrorCode::Io => "IO",
        };
        f.write_str(s)
    }
}

/// Pipeline stage recorded on caller-visible errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Plan,
    Compile,
    Execute,
    Summarize,
    Index,
    Query,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Normalize => "normalize",
            Stage::Plan => "plan",
            Stage::Compile => "compile",
            Stage::Execute => "execute",
            Stage::Summarize => "summarize",
            Stage::Index => "index",
            Stage::Query => "query",
        };
        f.write_str(s)
    }
}

/// Structured error envelope: `{code, stage, message, cause, context}`.
#[derive(Debug, Clone, Serialize)]
pub struct OneMcpError {
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl OneMcpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            stage: None,
            message: message.into(),
            cause: None,
            context: BTreeMap::new(),
        }
    }

    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attaches one context entry (e.g. `step_id`, `service`).
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn cancelled(stage: Stage) -> Self {
        Self::new(ErrorCode::Cancelled, "request cancelled").at_stage(stage)
    }

    pub fn timeout(stage: Stage) -> Self {
        Self::new(ErrorCode::Timeout, format!("{stage} stage timed out")).at_stage(stage)
    }
}

impl fmt::Display for OneMcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "[{} at {}] {}", self.code, stage, self.message)?,
            None => write!(f, "[{}] {}", self.code, self.message)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for OneMcpError {}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display shows code, stage, message, and cause in one line.
    #[test]
    fn display_includes_code_stage_and_cause() {
        let err = OneMcpError::new(ErrorCode::Execution, "step s2 failed")
            .at_stage(Stage::Execute)
            .with_cause("bridge timeout");
        let s = err.to_string();
        assert!(s.contains("EXECUTION"), "missing code: {s}");
        assert!(s.contains("execute"), "missing stage: {s}");
        assert!(s.contains("step s2 failed"), "missing message: {s}");
        assert!(s.contains("bridge timeout"), "missing cause: {s}");
    }

    /// **Scenario**: serialized envelope omits empty stage/cause/context and
    /// renders the code in SCREAMING_SNAKE_CASE.
    #[test]
    fn serializes_to_wire_shape() {
        let err = OneMcpError::new(ErrorCode::Normalization, "unknown tokens");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["code"], "NORMALIZATION");
        assert_eq!(v["message"], "unknown tokens");
        assert!(v.get("stage").is_none());
        assert!(v.get("cause").is_none());
        assert!(v.get("context").is_none());
    }

    /// **Scenario**: context entries survive the round trip to JSON.
    #[test]
    fn context_entries_serialize() {
        let err = OneMcpError::new(ErrorCode::Execution, "boom")
            .with_context("step_id", "s1")
            .with_context("service", "acme");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["context"]["step_id"], "s1");
        assert_eq!(v["context"]["service"], "acme");
    }
}
