//! Embedded prompt templates for the pipeline's LLM calls.
//!
//! Render helpers produce the user message for each stage; the paired
//! `*_SYSTEM` constants set the model's role. The snippet-language reference
//! given to the planner and the repair loop must stay in sync with
//! `runtime::lang`.

use serde_json::json;

use crate::knowledge::EntityContext;
use crate::schema::{Dictionary, PromptSchema};

pub const NORMALIZE_SYSTEM: &str = "You map user prompts onto a closed API vocabulary. \
Reply with strict JSON only: an object {action, entities, fields, params, group_by, filters} \
or {steps: [...]} of such objects. Use only tokens present in the provided dictionary for \
action, entities, fields, and group_by. Put free values into params and filter values.";

pub const PLAN_SYSTEM: &str = "You write short multi-step programs that call HTTP API operations \
to fulfil a normalized request. Reply with strict JSON only: \
{workflow: \"sequential\" | \"parallel_fanout\", steps: [{id, class_name, snippet, input_vars, \
output_vars, services_used}]}. Snippets use the step-snippet language described below and may \
only call the operations listed in the context.";

pub const REPAIR_SYSTEM: &str = "You fix snippets in the step-snippet language. \
Reply with the corrected snippet only, no prose, no code fences.";

pub const SUMMARIZE_SYSTEM: &str = "You summarize computed results for the person who asked. \
Answer in one short paragraph using only the provided variables. No markdown headers.";

/// Reference card for the snippet language embedded into plan/repair prompts.
pub const SNIPPET_LANGUAGE: &str = r#"Step-snippet language:
- `use api.<service>;` imports a configured service; `use std.json;` / `use std.list;` /
  `use std.text;` / `use std.math;` / `use std.log;` import builtin namespaces.
- Statements: `let x = expr;`, `out name = expr;` (declared outputs only),
  `if cond { ... } else { ... }`, `for x in expr { ... }`, `fail(expr);`.
- `api.<service>.call("operationId", { "path": {...}, "query": {...}, "body": ... })`
  performs the HTTP call and returns `{ok, status, body, body_text}`.
- `json.get(value, "a.b")`, `json.set(obj, "k", v)`, `json.object()`, `json.array()`,
  `json.parse(text)`, `json.stringify(value)`; `list.len(xs)`, `list.push(xs, v)`,
  `list.get(xs, i)`; `text.concat(a, b)`, `text.contains(s, sub)`; `math.sum(xs)`,
  `math.min(xs)`, `math.max(xs)`, `math.avg(xs)`; `log.info(...)`, `log.warn(...)`.
- Input variables and `params` are pre-bound; every declared output must be
  assigned with `out` before the snippet ends."#;

/// User message for the normalization call.
pub fn render_normalize(dictionary: &Dictionary, prompt: &str) -> String {
    let dict = json!({
        "actions": dictionary.actions,
        "entities": dictionary.entities,
        "fields": dictionary.fields,
        "operators": dictionary.operators,
        "aggregates": dictionary.aggregates,
    });
    format!("Dictionary:\n{dict}\n\nPrompt:\n{prompt}\n\nJSON:")
}

/// User message for the planning call: retrieved context + the normalized
/// workflow (1..N schema steps).
pub fn render_plan(contexts: &[EntityContext], schemas: &[PromptSchema]) -> String {
    let context_json = serde_json::to_string_pretty(contexts)
        .unwrap_or_else(|_| "[]".to_string());
    let schema_json =
        serde_json::to_string(schemas).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{SNIPPET_LANGUAGE}\n\nRetrieved context:\n{context_json}\n\n\
Normalized request:\n{schema_json}\n\nPlan JSON:"
    )
}

/// User message for one compile-repair round.
pub fn render_repair(snippet: &str, diagnostics: &[String]) -> String {
    format!(
        "{SNIPPET_LANGUAGE}\n\nThis snippet failed to compile:\n{snippet}\n\n\
Compiler diagnostics:\n{}\n\nCorrected snippet:",
        diagnostics.join("\n")
    )
}

/// User message for the summarization call.
pub fn render_summarize(prompt: &str, variables: &serde_json::Value) -> String {
    format!(
        "Original request:\n{prompt}\n\nProduced variables:\n{variables}\n\nSummary:"
    )
}
