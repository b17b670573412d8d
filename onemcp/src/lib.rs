//! # OneMCP
//!
//! Turns natural-language prompts into reusable, cached execution plans that
//! invoke HTTP APIs described by an OpenAPI **handbook**. One pipeline per
//! request: normalize the prompt onto the handbook vocabulary, retrieve the
//! relevant knowledge-graph context, ask the model for a small multi-step
//! program, compile and sandbox-execute each step against a shared Value
//! Store, and summarize - with plans cached under the normalized key so
//! equivalent prompts bypass the model entirely.
//!
//! ## Main modules
//!
//! - [`handbook`]: on-disk bundle loading - agent descriptor, OpenAPI
//!   documents with `$ref` resolution, docs tree, validation
//!   ([`Handbook`], [`ValidationError`]).
//! - [`knowledge`]: the knowledge graph - node/edge model, pluggable
//!   [`GraphStore`], semantic markdown chunker, indexer, and the
//!   entity-scoped [`GraphQueryService`].
//! - [`schema`]: prompt normalization - [`Dictionary`], [`PromptSchema`],
//!   [`Normalizer`], and deterministic cache keys.
//! - [`plan`]: [`Plan`]/[`Step`] types, the LLM-backed [`Planner`], and the
//!   single-flight [`PlanCache`] with atomic JSON persistence.
//! - [`store`]: the request-scoped [`ValueStore`] and per-step
//!   [`StepStoreView`] with declared-output enforcement.
//! - [`runtime`]: the snippet language (lexer/parser), compiler with import
//!   inference, model-assisted repair loop, HTTP bridge, and cooperative
//!   sandbox ([`StepRuntime`]).
//! - [`llm`]: provider-agnostic [`LlmClient`] with a registry of factories
//!   (`openai`, `anthropic`, `mock`) and transport-only retry.
//! - [`orchestrator`]: the per-request state machine ([`Engine`]).
//! - [`error`]: the `{code, stage, message, cause, context}` envelope
//!   surfaced to callers ([`OneMcpError`]).
//!
//! Key types are re-exported at the crate root:
//! `use onemcp::{Engine, Handbook, PlanCache, MemoryGraphStore};`.

pub mod error;
pub mod handbook;
pub mod knowledge;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod runtime;
pub mod schema;
pub mod store;

pub use error::{ErrorCode, OneMcpError, Stage};
pub use handbook::{AgentDescriptor, Handbook, Operation, Service, StageTimeouts, ValidationError};
pub use knowledge::{
    Chunk, ChunkerConfig, ContextItem, EntityContext, GraphNode, GraphQueryService, GraphStore,
    KnowledgeIndexer, MarkdownChunker, MemoryGraphStore, NodeType, OperationCategory,
};
pub use llm::{
    ChatCompletion, ChatRequest, ConfigError, LlmClient, LlmError, LlmUsage, MockLlm,
    ProviderConfig, ProviderRegistry, ToolCall, ToolSpec,
};
pub use message::Message;
pub use orchestrator::{Engine, EngineConfig, RequestState, RunOutcome, Summarizer, PARAMS_VAR};
pub use plan::{Plan, PlanCache, PlanCacheEntry, Planner, PlanningError, Step, WorkflowKind};
pub use runtime::{
    BridgeResponse, CompileOutcome, Diagnostic, HttpBridge, SandboxConfig, StepRuntime,
};
pub use schema::{
    Action, Dictionary, Filter, NormalizationError, NormalizedPrompt, Normalizer, PromptSchema,
};
pub use store::{StepStoreView, TypeTag, ValueEntry, ValueStore};
