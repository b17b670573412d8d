//! LLM-backed planning: retrieved context + normalized schema → plan.
//!
//! The planner constrains the model to the operations present in the
//! retrieved context, parses the strict-JSON reply, and validates the plan
//! against the handbook before it reaches the executor.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handbook::Handbook;
use crate::knowledge::EntityContext;
use crate::llm::{with_backoff, BackoffPolicy, ChatRequest, LlmClient, LlmError};
use crate::message::Message;
use crate::prompts;
use crate::schema::PromptSchema;

use super::{Plan, Step, WorkflowKind};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("no context retrieved for any requested entity")]
    EmptyContext,

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("planner reply unusable: {0}")]
    BadReply(String),

    #[error("duplicate step id `{0}`")]
    DuplicateStepId(String),

    #[error("steps `{step}` declares duplicate fanout output `{name}`")]
    DuplicateOutput { name: String, step: String },

    #[error("step `{step}` uses unknown service `{service}`")]
    UnresolvedService { service: String, step: String },

    #[error("step `{step}` calls unresolved operation `{service}.{operation}`")]
    UnresolvedOperation {
        service: String,
        operation: String,
        step: String,
    },

    #[error("step `{step}` input `{input}` is not provided by params or earlier steps")]
    MissingInput { input: String, step: String },

    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Debug, Deserialize)]
struct WirePlan {
    #[serde(default = "default_workflow")]
    workflow: String,
    steps: Vec<WireStep>,
}

fn default_workflow() -> String {
    "sequential".to_string()
}

#[derive(Debug, Deserialize)]
struct WireStep {
    id: String,
    #[serde(default, alias = "qualified_class_name")]
    class_name: Option<String>,
    snippet: String,
    #[serde(default)]
    input_vars: Vec<String>,
    #[serde(default)]
    output_vars: Vec<String>,
    #[serde(default)]
    services_used: Vec<String>,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    backoff: BackoffPolicy,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Produces a validated plan for a normalized workflow.
    pub async fn plan(
        &self,
        handbook: &Handbook,
        contexts: &[EntityContext],
        schemas: &[PromptSchema],
        ambient_vars: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Plan, PlanningError> {
        if contexts.iter().all(|c| !c.found) {
            return Err(PlanningError::EmptyContext);
        }

        let messages = vec![
            Message::system(prompts::PLAN_SYSTEM),
            Message::user(prompts::render_plan(contexts, schemas)),
        ];
        let request = ChatRequest::new(messages)
            .with_timeout(timeout)
            .with_cancel(cancel.clone());

        let completion = with_backoff(self.backoff, cancel, |attempt| {
            debug!(attempt, "plan llm call");
            let request = request.clone();
            let llm = self.llm.clone();
            async move { llm.chat(&request).await }
        })
        .await?;

        let plan = parse_plan(&completion.content)?;
        plan.validate(handbook, ambient_vars)?;
        debug!(steps = plan.steps.len(), workflow = ?plan.workflow, "plan validated");
        Ok(plan)
    }
}

/// Parses the model's plan reply (optionally fenced).
pub fn parse_plan(reply: &str) -> Result<Plan, PlanningError> {
    let text = strip_fences(reply);
    let wire: WirePlan = serde_json::from_str(text)
        .map_err(|e| PlanningError::BadReply(format!("invalid JSON: {e}")))?;

    let workflow = match wire.workflow.as_str() {
        "sequential" => WorkflowKind::Sequential,
        "parallel_fanout" | "parallel-fanout" => WorkflowKind::ParallelFanout,
        other => {
            return Err(PlanningError::BadReply(format!(
                "unknown workflow kind `{other}`"
            )))
        }
    };

    let steps = wire
        .steps
        .into_iter()
        .map(|s| Step {
            qualified_class_name: s
                .class_name
                .unwrap_or_else(|| format!("steps.{}", s.id)),
            id: s.id,
            snippet: s.snippet,
            input_vars: s.input_vars,
            output_vars: s.output_vars,
            services_used: s.services_used,
        })
        .collect();

    Ok(Plan { workflow, steps })
}

fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handbook::fixtures;
    use crate::knowledge::{ContextItem, GraphQueryService, KnowledgeIndexer, MemoryGraphStore, OperationCategory};
    use crate::llm::MockLlm;
    use crate::schema::{Action, PromptSchema};

    const PLAN_REPLY: &str = r#"{
      "workflow": "sequential",
      "steps": [{
        "id": "s1",
        "class_name": "steps.AcmeTotal",
        "snippet": "use api.acme;\nuse std.json;\nlet res = acme.call(\"query\", json.object());\nout total_sales = json.get(res.body, \"total\");",
        "input_vars": ["params"],
        "output_vars": ["total_sales"],
        "services_used": ["acme"]
      }]
    }"#;

    async fn setup() -> (Handbook, Vec<EntityContext>) {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_acme_handbook(dir.path());
        let handbook = Handbook::load(dir.path()).unwrap();
        let store = std::sync::Arc::new(MemoryGraphStore::new());
        KnowledgeIndexer::new(store.clone())
            .index(&handbook)
            .await
            .unwrap();
        let contexts = GraphQueryService::new(store)
            .query(&[ContextItem::new(
                "sale",
                vec![OperationCategory::Compute],
            )])
            .await
            .unwrap();
        (handbook, contexts)
    }

    /// **Scenario**: a valid plan reply parses, validates, and comes back
    /// with the declared step.
    #[tokio::test]
    async fn plans_from_context() {
        let (handbook, contexts) = setup().await;
        let planner = Planner::new(Arc::new(MockLlm::with_reply(PLAN_REPLY)));
        let plan = planner
            .plan(
                &handbook,
                &contexts,
                &[PromptSchema::new(Action::Aggregate)],
                &["params"],
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(plan.workflow, WorkflowKind::Sequential);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].output_vars, vec!["total_sales"]);
    }

    /// **Scenario**: when every context slot is empty the planner fails with
    /// EmptyContext before calling the model.
    #[tokio::test]
    async fn empty_context_is_planning_error() {
        let (handbook, _) = setup().await;
        let llm = Arc::new(MockLlm::with_reply(PLAN_REPLY));
        let planner = Planner::new(llm.clone());
        let err = planner
            .plan(
                &handbook,
                &[EntityContext {
                    entity: "ghost".into(),
                    found: false,
                    fields: vec![],
                    operations: vec![],
                    docs: vec![],
                }],
                &[PromptSchema::new(Action::List)],
                &[],
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::EmptyContext));
        assert_eq!(llm.call_count(), 0);
    }

    /// **Scenario**: a plan calling an operation outside the handbook fails
    /// validation with UnresolvedOperation.
    #[tokio::test]
    async fn unresolvable_operation_fails() {
        let (handbook, contexts) = setup().await;
        let reply = PLAN_REPLY.replace("query", "teleport");
        let planner = Planner::new(Arc::new(MockLlm::with_reply(reply)));
        let err = planner
            .plan(
                &handbook,
                &contexts,
                &[PromptSchema::new(Action::Aggregate)],
                &["params"],
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::UnresolvedOperation { .. }));
    }

    /// **Scenario**: non-JSON replies are BadReply.
    #[test]
    fn garbage_reply_rejected() {
        assert!(matches!(
            parse_plan("I would suggest calling the query op."),
            Err(PlanningError::BadReply(_))
        ));
    }
}
