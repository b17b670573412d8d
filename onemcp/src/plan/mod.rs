//! Executable plans: ordered (or fanned-out) code steps.
//!
//! A plan is what the planner emits and what the cache stores: a workflow
//! kind plus steps carrying snippets with declared input/output variables.
//! Validation runs before anything executes - unresolved services or
//! operations, duplicate fanout outputs, and unavailable inputs are planning
//! errors, not runtime surprises.

mod cache;
mod planner;

pub use cache::{PlanCache, PlanCacheEntry};
pub use planner::{Planner, PlanningError};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::handbook::Handbook;
use crate::runtime::lang;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Sequential,
    ParallelFanout,
}

/// One compiled unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Class-like name the snippet compiles under (diagnostics, logs).
    pub qualified_class_name: String,
    pub snippet: String,
    #[serde(default)]
    pub input_vars: Vec<String>,
    #[serde(default)]
    pub output_vars: Vec<String>,
    #[serde(default)]
    pub services_used: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub workflow: WorkflowKind,
    pub steps: Vec<Step>,
}

impl Plan {
    /// Static validation against the handbook.
    ///
    /// `ambient_vars` are the names the orchestrator pre-binds for every step
    /// (e.g. `params`). Within a sequential plan, a step may also consume any
    /// earlier step's outputs; fanout siblings only see the ambient set.
    pub fn validate(
        &self,
        handbook: &Handbook,
        ambient_vars: &[&str],
    ) -> Result<(), PlanningError> {
        if self.steps.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(PlanningError::DuplicateStepId(step.id.clone()));
            }
        }

        if self.workflow == WorkflowKind::ParallelFanout {
            let mut outputs = HashSet::new();
            for step in &self.steps {
                for name in &step.output_vars {
                    if !outputs.insert(name.as_str()) {
                        return Err(PlanningError::DuplicateOutput {
                            name: name.clone(),
                            step: step.id.clone(),
                        });
                    }
                }
            }
        }

        let mut available: HashSet<String> =
            ambient_vars.iter().map(|s| s.to_string()).collect();
        for step in &self.steps {
            for service in &step.services_used {
                if handbook.service(service).is_none() {
                    return Err(PlanningError::UnresolvedService {
                        service: service.clone(),
                        step: step.id.clone(),
                    });
                }
            }

            // Constant call sites must resolve now; dynamic operation ids and
            // syntax errors are left for the compile stage.
            for (service, operation) in lang::scan_service_calls(&step.snippet) {
                if handbook.operation(&service, &operation).is_none() {
                    return Err(PlanningError::UnresolvedOperation {
                        service,
                        operation,
                        step: step.id.clone(),
                    });
                }
            }

            if self.workflow == WorkflowKind::Sequential {
                for input in &step.input_vars {
                    if !available.contains(input) {
                        return Err(PlanningError::MissingInput {
                            input: input.clone(),
                            step: step.id.clone(),
                        });
                    }
                }
                available.extend(step.output_vars.iter().cloned());
            } else {
                for input in &step.input_vars {
                    if !available.contains(input) {
                        return Err(PlanningError::MissingInput {
                            input: input.clone(),
                            step: step.id.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
