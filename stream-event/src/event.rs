//! Protocol-level run events (type + payload).
//!
//! Wire shape for one stream event during a request; the envelope
//! (request_id, stage, event_id) is applied separately.

use serde::Serialize;
use serde_json::Value;

/// One streamed event of a running request.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The request entered a pipeline stage.
    StageEnter { stage: String },
    StageExit { stage: String },
    /// Plan-cache consultation result.
    PlanCache { hit: bool },
    StepStart { step_id: String },
    StepEnd { step_id: String, ok: bool },
    /// Structured log line captured from a sandboxed snippet.
    StepLog {
        step_id: String,
        level: String,
        args: Vec<Value>,
    },
    SummaryChunk { text: String },
    RunEnd { summary: String },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        step_id: Option<String>,
    },
}

impl RunEvent {
    /// Serializes this event to a JSON object (type + payload only).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn stage_enter(stage: impl Into<String>) -> Self {
        RunEvent::StageEnter {
            stage: stage.into(),
        }
    }

    pub fn stage_exit(stage: impl Into<String>) -> Self {
        RunEvent::StageExit {
            stage: stage.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: events serialize with a snake_case `type` tag.
    #[test]
    fn serializes_with_type_tag() {
        let v = RunEvent::StepEnd {
            step_id: "s1".to_string(),
            ok: true,
        }
        .to_value()
        .unwrap();
        assert_eq!(v["type"], "step_end");
        assert_eq!(v["step_id"], "s1");
        assert_eq!(v["ok"], true);
    }

    /// **Scenario**: Error omits step_id when absent.
    #[test]
    fn error_omits_missing_step() {
        let v = RunEvent::Error {
            code: "TIMEOUT".to_string(),
            message: "normalize stage timed out".to_string(),
            step_id: None,
        }
        .to_value()
        .unwrap();
        assert!(v.get("step_id").is_none());
    }
}
