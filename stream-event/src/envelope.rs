//! Envelope (request_id, stage, event_id) injected into each streamed event.
//!
//! `EnvelopeState` tracks the current stage from `stage_enter` events and a
//! per-stream monotonically increasing event id.

use serde_json::Value;

use crate::event::RunEvent;

/// Envelope fields recommended for each streamed message.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Request ID; constant within one run.
    pub request_id: Option<String>,
    /// Pipeline stage active when the event was emitted.
    pub stage: Option<String>,
    /// Per-message sequence number; monotonically increasing within a stream.
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields into the JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.request_id {
            obj.entry("request_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref stage) = self.stage {
            obj.entry("stage")
                .or_insert_with(|| Value::String(stage.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
    }
}

/// Envelope state for one run: request id, current stage, next event id.
pub struct EnvelopeState {
    pub request_id: String,
    pub current_stage: String,
    pub next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            current_stage: String::new(),
            next_event_id: 1,
        }
    }

    /// Injects the envelope into the event value and advances state.
    /// On `type == "stage_enter"`, updates the current stage.
    pub fn inject_into(&mut self, value: &mut Value) {
        if value.get("type").and_then(|v| v.as_str()) == Some("stage_enter") {
            if let Some(stage) = value.get("stage").and_then(|v| v.as_str()) {
                self.current_stage = stage.to_string();
            }
        }
        let stage = if self.current_stage.is_empty() {
            "accepted"
        } else {
            self.current_stage.as_str()
        };
        let env = Envelope::new()
            .with_request_id(&self.request_id)
            .with_stage(stage)
            .with_event_id(self.next_event_id);
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

/// Converts a run event to JSON and injects the envelope.
pub fn to_json(event: &RunEvent, state: &mut EnvelopeState) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: envelope fields land in the object without overwriting
    /// existing keys.
    #[test]
    fn envelope_inject() {
        let mut obj = serde_json::json!({"type": "stage_enter", "stage": "normalize"});
        let env = Envelope::new()
            .with_request_id("req-1")
            .with_stage("normalize")
            .with_event_id(1);
        env.inject_into(&mut obj);
        assert_eq!(obj["request_id"], "req-1");
        assert_eq!(obj["stage"], "normalize");
        assert_eq!(obj["event_id"], 1);
        assert_eq!(obj["type"], "stage_enter");
    }

    /// **Scenario**: event ids increase monotonically and the stage follows
    /// stage_enter events.
    #[test]
    fn state_tracks_stage_and_sequence() {
        let mut state = EnvelopeState::new("req-9".to_string());
        let first = to_json(&RunEvent::stage_enter("normalize"), &mut state).unwrap();
        assert_eq!(first["event_id"], 1);
        assert_eq!(first["stage"], "normalize");

        let second = to_json(&RunEvent::PlanCache { hit: false }, &mut state).unwrap();
        assert_eq!(second["event_id"], 2);
        assert_eq!(second["stage"], "normalize");

        let third = to_json(&RunEvent::stage_enter("plan"), &mut state).unwrap();
        assert_eq!(third["stage"], "plan");
        assert_eq!(third["event_id"], 3);
    }
}
