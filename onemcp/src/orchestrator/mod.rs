//! The request orchestrator: prompt in, summary out.
//!
//! One [`Engine`] per handbook snapshot serves many concurrent requests;
//! each request owns its state machine, Value Store, and cancellation scope.
//! States: `ACCEPTED → NORMALIZED → {PLAN_HIT | PLAN_MISS} → CONTEXTED →
//! PLANNED → EXECUTING(step_i) → SUMMARIZED → DONE`, with terminal `FAILED`.
//! A plan-cache hit jumps straight to execution; a miss retrieves context,
//! plans, executes, and stores the plan (with any repaired snippets) under
//! the normalized key once the run succeeds.

mod summarize;

pub use summarize::Summarizer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stream_event::RunEvent;

use crate::error::{ErrorCode, OneMcpError, Stage};
use crate::handbook::{AgentDescriptor, Handbook, StageTimeouts};
use crate::knowledge::{
    ContextItem, GraphQueryService, GraphStore, GraphStoreError, KnowledgeIndexer,
    OperationCategory,
};
use crate::llm::{LlmClient, LlmError};
use crate::plan::{Plan, PlanCache, Planner, PlanningError, Step, WorkflowKind};
use crate::runtime::{CompileFailure, RuntimeError, SandboxConfig, StepRuntime};
use crate::schema::{Action, Dictionary, NormalizationError, NormalizedPrompt, Normalizer};
use crate::store::{StepStoreView, ValueStore};

/// Ambient variable every step may declare as input.
pub const PARAMS_VAR: &str = "params";

/// Per-request state machine position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Accepted,
    Normalized,
    PlanHit,
    PlanMiss,
    Contexted,
    Planned,
    Executing(usize),
    Summarized,
    Done,
    Failed,
}

/// Engine-level knobs, derived from the agent descriptor plus environment.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub timeouts: StageTimeouts,
    pub fanout_concurrency: usize,
    /// Replay-only mode: a plan-cache miss fails with PLANNING.
    pub static_mode: bool,
    pub sandbox: SandboxConfig,
}

impl EngineConfig {
    pub fn from_agent(agent: &AgentDescriptor) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            timeouts: agent.timeouts,
            fanout_concurrency: agent.fanout_concurrency.unwrap_or(cpus).max(1),
            static_mode: agent.static_mode,
            sandbox: SandboxConfig {
                timeout: agent.timeouts.execute(),
                ..SandboxConfig::default()
            },
        }
    }
}

/// A finished run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub request_id: String,
    pub summary: String,
    pub cache_hit: bool,
    /// Final Value Store contents.
    pub variables: Value,
}

/// One handbook snapshot wired to its LLM client, graph, runtime, and cache.
pub struct Engine {
    handbook: Arc<Handbook>,
    query: GraphQueryService,
    normalizer: Normalizer,
    planner: Planner,
    summarizer: Summarizer,
    runtime: StepRuntime,
    plan_cache: Arc<PlanCache>,
    dictionary: Dictionary,
    config: EngineConfig,
}

impl Engine {
    /// Builds the engine and indexes the handbook into the graph store.
    /// Prior plan-cache entries for other handbook versions are invalidated.
    pub async fn new(
        handbook: Handbook,
        llm: Arc<dyn LlmClient>,
        graph: Arc<dyn GraphStore>,
        plan_cache: Arc<PlanCache>,
        config: EngineConfig,
    ) -> Result<Self, OneMcpError> {
        let handbook = Arc::new(handbook);
        KnowledgeIndexer::new(graph.clone())
            .index(&handbook)
            .await
            .map_err(|e| map_graph(e, Stage::Index))?;
        plan_cache.invalidate(handbook.version());

        let dictionary = Dictionary::from_handbook(&handbook);
        let runtime = StepRuntime::new(&handbook, llm.clone(), config.sandbox);

        Ok(Self {
            query: GraphQueryService::new(graph),
            normalizer: Normalizer::new(llm.clone()),
            planner: Planner::new(llm.clone()),
            summarizer: Summarizer::new(llm),
            runtime,
            plan_cache,
            dictionary,
            config,
            handbook,
        })
    }

    pub fn handbook(&self) -> &Handbook {
        &self.handbook
    }

    pub fn plan_cache(&self) -> &PlanCache {
        &self.plan_cache
    }

    /// Runs one request end to end, streaming progress events when a sender
    /// is provided. Errors have already been reported on the stream when
    /// this returns `Err`.
    pub async fn run(
        &self,
        prompt: &str,
        events: Option<mpsc::Sender<RunEvent>>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, OneMcpError> {
        let request_id = format!("req-{}", Uuid::new_v4());
        info!(request_id = %request_id, "request accepted");

        match self.run_inner(&request_id, prompt, &events, &cancel).await {
            Ok(outcome) => {
                info!(request_id = %request_id, cache_hit = outcome.cache_hit, "request done");
                Ok(outcome)
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "request failed");
                emit(
                    &events,
                    RunEvent::Error {
                        code: err.code.to_string(),
                        message: err.message.clone(),
                        step_id: err.context.get("step_id").cloned(),
                    },
                )
                .await;
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        request_id: &str,
        prompt: &str,
        events: &Option<mpsc::Sender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, OneMcpError> {
        let mut state = RequestState::Accepted;

        // ACCEPTED → NORMALIZED
        emit(events, RunEvent::stage_enter("normalize")).await;
        let normalized = self.normalize_stage(prompt, cancel).await?;
        transition(request_id, &mut state, RequestState::Normalized);
        emit(events, RunEvent::stage_exit("normalize")).await;

        let cache_key = normalized.cache_key();
        let version = self.handbook.version().to_string();

        // PLAN_HIT | PLAN_MISS
        let cached = self.plan_cache.lookup(&cache_key, &version);
        let cache_hit = cached.is_some();
        emit(events, RunEvent::PlanCache { hit: cache_hit }).await;
        transition(
            request_id,
            &mut state,
            if cache_hit {
                RequestState::PlanHit
            } else {
                RequestState::PlanMiss
            },
        );

        let plan = match cached {
            Some(plan) => plan,
            None => {
                if self.config.static_mode {
                    return Err(OneMcpError::new(
                        ErrorCode::Planning,
                        "static mode: no cached plan for this prompt",
                    )
                    .at_stage(Stage::Plan));
                }
                emit(events, RunEvent::stage_enter("plan")).await;
                let contexts = self.context_stage(&normalized, cancel).await?;
                transition(request_id, &mut state, RequestState::Contexted);
                let plan = self.plan_stage(&contexts, &normalized, cancel).await?;
                transition(request_id, &mut state, RequestState::Planned);
                emit(events, RunEvent::stage_exit("plan")).await;
                plan
            }
        };

        // EXECUTING(step_i)
        emit(events, RunEvent::stage_enter("execute")).await;
        let params = ambient_params(&normalized);
        let mut store = ValueStore::new();
        let executed_plan = match plan.workflow {
            WorkflowKind::Sequential => {
                self.execute_sequential(
                    request_id, &plan, &params, &mut store, &mut state, events, cancel,
                )
                .await?
            }
            WorkflowKind::ParallelFanout => {
                self.execute_fanout(
                    request_id, &plan, &params, &mut store, &mut state, events, cancel,
                )
                .await?
            }
        };
        emit(events, RunEvent::stage_exit("execute")).await;

        // SUMMARIZED
        emit(events, RunEvent::stage_enter("summarize")).await;
        let variables = store.snapshot_json();
        let summary = tokio::time::timeout(
            self.config.timeouts.summarize(),
            self.summarizer.summarize(
                prompt,
                &variables,
                self.config.timeouts.summarize(),
                cancel,
            ),
        )
        .await
        .map_err(|_| OneMcpError::timeout(Stage::Summarize))?
        .map_err(|e| map_llm(e, Stage::Summarize))?;
        transition(request_id, &mut state, RequestState::Summarized);
        emit(events, RunEvent::SummaryChunk {
            text: summary.clone(),
        })
        .await;
        emit(events, RunEvent::stage_exit("summarize")).await;

        // Store the (possibly repaired) plan only after a successful run, so
        // the cache never carries plans that have not executed.
        if !cache_hit {
            self.plan_cache
                .store(&cache_key, &version, executed_plan)
                .await;
        }

        emit(events, RunEvent::RunEnd {
            summary: summary.clone(),
        })
        .await;
        transition(request_id, &mut state, RequestState::Done);

        Ok(RunOutcome {
            request_id: request_id.to_string(),
            summary,
            cache_hit,
            variables,
        })
    }

    async fn normalize_stage(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedPrompt, OneMcpError> {
        let timeout = self.config.timeouts.normalize();
        tokio::time::timeout(
            timeout,
            self.normalizer
                .normalize(prompt, &self.dictionary, timeout, cancel),
        )
        .await
        .map_err(|_| OneMcpError::timeout(Stage::Normalize))?
        .map_err(map_normalization)
    }

    async fn context_stage(
        &self,
        normalized: &NormalizedPrompt,
        cancel: &CancellationToken,
    ) -> Result<Vec<crate::knowledge::EntityContext>, OneMcpError> {
        if cancel.is_cancelled() {
            return Err(OneMcpError::cancelled(Stage::Plan));
        }
        let mut items: Vec<ContextItem> = Vec::new();
        for schema in &normalized.steps {
            let categories = action_categories(schema.action);
            for entity in &schema.entities {
                if items.iter().any(|i| &i.entity == entity) {
                    continue;
                }
                items.push(ContextItem::new(entity.clone(), categories.clone()));
            }
        }
        self.query
            .query(&items)
            .await
            .map_err(|e| map_graph(e, Stage::Query))
    }

    async fn plan_stage(
        &self,
        contexts: &[crate::knowledge::EntityContext],
        normalized: &NormalizedPrompt,
        cancel: &CancellationToken,
    ) -> Result<Plan, OneMcpError> {
        let timeout = self.config.timeouts.plan();
        tokio::time::timeout(
            timeout,
            self.planner.plan(
                &self.handbook,
                contexts,
                &normalized.steps,
                &[PARAMS_VAR],
                timeout,
                cancel,
            ),
        )
        .await
        .map_err(|_| OneMcpError::timeout(Stage::Plan))?
        .map_err(map_planning)
    }

    /// Sequential execution: step i+1 observes every committed write of
    /// step i.
    #[allow(clippy::too_many_arguments)]
    async fn execute_sequential(
        &self,
        request_id: &str,
        plan: &Plan,
        params: &Value,
        store: &mut ValueStore,
        state: &mut RequestState,
        events: &Option<mpsc::Sender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<Plan, OneMcpError> {
        let mut executed = plan.clone();
        for (i, step) in plan.steps.iter().enumerate() {
            transition(request_id, state, RequestState::Executing(i));
            if cancel.is_cancelled() {
                return Err(OneMcpError::cancelled(Stage::Execute));
            }
            let (outputs, snippet_text) = self
                .run_step(step, params, store, events, cancel)
                .await?;
            executed.steps[i].snippet = snippet_text;
            for (name, value) in outputs {
                store.insert(name, value);
            }
        }
        Ok(executed)
    }

    /// Parallel fanout: siblings run concurrently on a bounded pool with no
    /// ordering between them; commits merge at the join, and the first
    /// failure cancels the rest.
    #[allow(clippy::too_many_arguments)]
    async fn execute_fanout(
        &self,
        request_id: &str,
        plan: &Plan,
        params: &Value,
        store: &mut ValueStore,
        state: &mut RequestState,
        events: &Option<mpsc::Sender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<Plan, OneMcpError> {
        transition(request_id, state, RequestState::Executing(0));
        let semaphore = Arc::new(Semaphore::new(self.config.fanout_concurrency));
        let child = cancel.child_token();
        let snapshot = store.clone();

        let results = futures::future::try_join_all(plan.steps.iter().map(|step| {
            let semaphore = semaphore.clone();
            let child = child.clone();
            let snapshot = snapshot.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| OneMcpError::cancelled(Stage::Execute))?;
                match self.run_step(step, params, &snapshot, events, &child).await {
                    Ok(result) => Ok((step.id.clone(), result)),
                    Err(err) => {
                        // Fail fast: stop the siblings at their next poll.
                        child.cancel();
                        Err(err)
                    }
                }
            }
        }))
        .await?;

        let mut executed = plan.clone();
        for (step_id, (outputs, snippet_text)) in results {
            if let Some(slot) = executed.steps.iter_mut().find(|s| s.id == step_id) {
                slot.snippet = snippet_text;
            }
            for (name, value) in outputs {
                store.insert(name, value);
            }
        }
        Ok(executed)
    }

    /// Compile (with repair) and execute one step. Returns the committed
    /// outputs and the snippet text that finally compiled.
    async fn run_step(
        &self,
        step: &Step,
        params: &Value,
        store: &ValueStore,
        events: &Option<mpsc::Sender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(BTreeMap<String, Value>, String), OneMcpError> {
        emit(events, RunEvent::StepStart {
            step_id: step.id.clone(),
        })
        .await;

        let result = self.run_step_inner(step, params, store, events, cancel).await;
        emit(events, RunEvent::StepEnd {
            step_id: step.id.clone(),
            ok: result.is_ok(),
        })
        .await;
        result
    }

    async fn run_step_inner(
        &self,
        step: &Step,
        params: &Value,
        store: &ValueStore,
        events: &Option<mpsc::Sender<RunEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(BTreeMap<String, Value>, String), OneMcpError> {
        // Compile with the repair loop.
        let compile_timeout = self.config.timeouts.compile();
        let (compiled, snippet_text) = tokio::time::timeout(
            compile_timeout,
            self.runtime
                .compile_step(step, compile_timeout, cancel),
        )
        .await
        .map_err(|_| OneMcpError::timeout(Stage::Compile).with_context("step_id", &step.id))?
        .map_err(|e| map_compile(e, &step.id))?;

        // Bind declared inputs.
        let mut inputs = BTreeMap::new();
        for name in &step.input_vars {
            let value = if name == PARAMS_VAR {
                params.clone()
            } else {
                store.value(name).cloned().ok_or_else(|| {
                    OneMcpError::new(
                        ErrorCode::Execution,
                        format!("step input `{name}` is missing from the value store"),
                    )
                    .at_stage(Stage::Execute)
                    .with_context("step_id", &step.id)
                })?
            };
            inputs.insert(name.clone(), value);
        }
        let view = StepStoreView::new(inputs, step.output_vars.iter().cloned().collect());

        // Execute in the sandbox.
        let outcome = self
            .runtime
            .execute_step(&compiled, view, cancel)
            .await
            .map_err(|e| map_runtime(e, &step.id))?;

        for log in &outcome.logs {
            emit(events, RunEvent::StepLog {
                step_id: step.id.clone(),
                level: log.level.clone(),
                args: log.args.clone(),
            })
            .await;
        }

        // Declared outputs must all exist after a successful execution.
        let missing: Vec<&String> = step
            .output_vars
            .iter()
            .filter(|name| !outcome.outputs.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(OneMcpError::new(
                ErrorCode::Execution,
                format!(
                    "step completed without declared outputs: {}",
                    missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
            .at_stage(Stage::Execute)
            .with_context("step_id", &step.id));
        }

        debug!(step_id = %step.id, outputs = outcome.outputs.len(), "step committed");
        Ok((outcome.outputs, snippet_text))
    }
}

fn transition(request_id: &str, state: &mut RequestState, next: RequestState) {
    debug!(request_id, from = ?state, to = ?next, "state transition");
    *state = next;
}

async fn emit(events: &Option<mpsc::Sender<RunEvent>>, event: RunEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

/// The ambient `params` object: merged schema params plus filters/group_by.
fn ambient_params(normalized: &NormalizedPrompt) -> Value {
    let mut obj = serde_json::Map::new();
    let mut filters = Vec::new();
    let mut group_by = Vec::new();
    for schema in &normalized.steps {
        for (k, v) in &schema.params {
            obj.insert(k.clone(), v.clone());
        }
        for filter in &schema.filters {
            filters.push(serde_json::json!({
                "field": filter.field,
                "op": filter.op,
                "value": filter.value,
            }));
        }
        for g in &schema.group_by {
            if !group_by.contains(g) {
                group_by.push(g.clone());
            }
        }
    }
    obj.insert("filters".to_string(), Value::Array(filters));
    obj.insert(
        "group_by".to_string(),
        Value::Array(group_by.into_iter().map(Value::String).collect()),
    );
    Value::Object(obj)
}

/// Operation categories worth retrieving for an action.
fn action_categories(action: Action) -> Vec<OperationCategory> {
    match action {
        Action::Search | Action::Get | Action::List | Action::Summarize | Action::Rank => {
            vec![OperationCategory::Retrieve]
        }
        Action::Aggregate => vec![OperationCategory::Compute, OperationCategory::Retrieve],
        Action::Create => vec![OperationCategory::Create],
        Action::Update => vec![OperationCategory::Update],
        Action::Delete => vec![OperationCategory::Delete],
        Action::Trigger => vec![OperationCategory::Create, OperationCategory::Compute],
    }
}

// --- error mapping ---------------------------------------------------------

fn map_llm(err: LlmError, stage: Stage) -> OneMcpError {
    match err {
        LlmError::Cancelled => OneMcpError::cancelled(stage),
        LlmError::Timeout(_) => OneMcpError::timeout(stage),
        other => OneMcpError::new(ErrorCode::Provider, "llm call failed")
            .at_stage(stage)
            .with_cause(other.to_string()),
    }
}

fn map_normalization(err: NormalizationError) -> OneMcpError {
    match err {
        NormalizationError::Llm(inner) => map_llm(inner, Stage::Normalize),
        other => OneMcpError::new(ErrorCode::Normalization, other.to_string())
            .at_stage(Stage::Normalize),
    }
}

fn map_planning(err: PlanningError) -> OneMcpError {
    match err {
        PlanningError::Llm(inner) => map_llm(inner, Stage::Plan),
        other => OneMcpError::new(ErrorCode::Planning, other.to_string()).at_stage(Stage::Plan),
    }
}

fn map_compile(err: CompileFailure, step_id: &str) -> OneMcpError {
    match err {
        CompileFailure::Llm(inner) => map_llm(inner, Stage::Compile).with_context("step_id", step_id),
        other => OneMcpError::new(ErrorCode::Compilation, other.to_string())
            .at_stage(Stage::Compile)
            .with_context("step_id", step_id),
    }
}

fn map_runtime(err: RuntimeError, step_id: &str) -> OneMcpError {
    let base = match &err {
        RuntimeError::Cancelled => OneMcpError::cancelled(Stage::Execute),
        RuntimeError::Timeout => OneMcpError::timeout(Stage::Execute),
        RuntimeError::Bridge(b) => OneMcpError::new(ErrorCode::Network, err.to_string())
            .at_stage(Stage::Execute)
            .with_cause(b.to_string()),
        _ => OneMcpError::new(ErrorCode::Execution, err.to_string()).at_stage(Stage::Execute),
    };
    base.with_context("step_id", step_id)
}

fn map_graph(err: GraphStoreError, stage: Stage) -> OneMcpError {
    OneMcpError::new(ErrorCode::Io, err.to_string()).at_stage(stage)
}
