//! Snippet runtime: compile → (repair) → sandbox-execute.
//!
//! The orchestrator drives one [`StepRuntime`] per server instance. A step's
//! snippet compiles against the handbook's service roots with import
//! inference, goes through the model-assisted repair loop when needed, and
//! executes inside the cooperative sandbox with the HTTP bridge and the
//! step's store view as its only capabilities.

pub mod bridge;
pub mod compile;
pub mod interp;
pub mod lang;
pub mod repair;
pub mod sandbox;

pub use bridge::{BridgeError, BridgeResponse, HttpBridge};
pub use compile::{CompileOutcome, CompiledSnippet, Compiler, STD_NAMESPACES};
pub use interp::{LogRecord, RuntimeError};
pub use lang::Diagnostic;
pub use repair::{compile_with_repair, CompileFailure, MAX_REPAIR_ATTEMPTS};
pub use sandbox::{Sandbox, SandboxConfig, SandboxOutcome};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::handbook::Handbook;
use crate::llm::LlmClient;
use crate::plan::Step;
use crate::store::StepStoreView;

/// Compile-and-execute facade used by the orchestrator.
pub struct StepRuntime {
    compiler: Compiler,
    sandbox: Sandbox,
    llm: Arc<dyn LlmClient>,
}

impl StepRuntime {
    pub fn new(handbook: &Handbook, llm: Arc<dyn LlmClient>, config: SandboxConfig) -> Self {
        let bridge = Arc::new(HttpBridge::from_handbook(handbook));
        Self {
            compiler: Compiler::new(
                handbook.services().map(|s| s.slug().to_string()),
            ),
            sandbox: Sandbox::new(bridge, config),
            llm,
        }
    }

    /// Compiles a step's snippet, repairing via the LLM when needed.
    /// Returns the compiled unit plus the snippet text that finally
    /// compiled, so callers can cache the repaired form.
    pub async fn compile_step(
        &self,
        step: &Step,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(CompiledSnippet, String), CompileFailure> {
        compile_with_repair(
            &self.compiler,
            &self.llm,
            &step.qualified_class_name,
            &step.snippet,
            &step.input_vars,
            &step.output_vars,
            timeout,
            cancel,
        )
        .await
    }

    /// Executes a compiled step against its view.
    pub async fn execute_step(
        &self,
        compiled: &CompiledSnippet,
        view: StepStoreView,
        cancel: &CancellationToken,
    ) -> Result<SandboxOutcome, RuntimeError> {
        self.sandbox.execute(compiled, view, cancel).await
    }
}
