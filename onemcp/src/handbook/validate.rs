//! Handbook structure validation.
//!
//! Collects every missing or incorrect artifact into one [`ValidationError`]
//! instead of failing on the first problem. Missing optional sections
//! (`regression-suite/`) produce warnings, not errors.

use std::fmt;
use std::path::Path;

use tracing::warn;

/// All structural problems found in a handbook root.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }

    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handbook validation failed: {}", self.problems.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Checks the on-disk layout. Returns every problem found; an empty result
/// means the structure is sound (content errors surface during load).
pub fn check_layout(root: &Path) -> Vec<String> {
    let mut problems = Vec::new();

    if !root.is_dir() {
        problems.push(format!("handbook root `{}` is not a directory", root.display()));
        return problems;
    }

    let agent = root.join("agent.yaml");
    if !agent.exists() {
        problems.push("agent.yaml: missing".to_string());
    } else if !agent.is_file() {
        problems.push("agent.yaml: not a file".to_string());
    } else if std::fs::metadata(&agent).map(|m| m.len()).unwrap_or(0) == 0 {
        problems.push("agent.yaml: empty".to_string());
    }

    for required in ["apis", "docs"] {
        let dir = root.join(required);
        if !dir.is_dir() {
            problems.push(format!("{required}/: missing"));
        }
    }

    if !root.join("regression-suite").is_dir() {
        warn!(root = %root.display(), "regression-suite/ missing (optional)");
    }

    problems
}
