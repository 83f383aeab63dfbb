//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of dispatchable work declared in a manifest.
//! They are immutable once loaded; outcomes are recorded separately as
//! [`TaskResult`] values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a task, unique across a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A single task declared in a manifest stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    /// Name of the stage that declared this task.
    pub stage: String,
    /// Target files; advisory context for the prompt only.
    pub files: Vec<String>,
    /// Explicit dependencies. Stage barriers add more in the graph.
    pub depends: Vec<TaskId>,
    pub tier: Option<String>,
    pub prompt_hint: Option<String>,
}

impl Task {
    /// Create a task with no files, dependencies, tier or hint.
    pub fn new(id: &str, title: &str, stage: &str) -> Self {
        Self {
            id: TaskId::new(id),
            title: title.to_string(),
            stage: stage.to_string(),
            files: Vec::new(),
            depends: Vec::new(),
            tier: None,
            prompt_hint: None,
        }
    }

    /// Tier to dispatch with: the task override or the manifest default.
    pub fn effective_tier<'a>(&'a self, default_tier: &'a str) -> &'a str {
        self.tier.as_deref().unwrap_or(default_tier)
    }
}

/// Terminal status of a dispatched (or skipped) task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pass,
    Warn,
    Fail,
    Error,
    Skipped,
    /// Pretend success recorded by `--dry-run`.
    DryRun,
    /// Any other verdict reported by the executor; treated as a failure.
    Other(String),
}

impl TaskStatus {
    /// Parse an executor verdict value. Unrecognised values are kept verbatim.
    pub fn from_verdict(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "pass" => TaskStatus::Pass,
            "warn" => TaskStatus::Warn,
            "fail" => TaskStatus::Fail,
            "error" => TaskStatus::Error,
            "skipped" => TaskStatus::Skipped,
            _ => TaskStatus::Other(value.trim().to_string()),
        }
    }

    /// Whether dependents may proceed (and receive this task's output).
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Pass | TaskStatus::Warn | TaskStatus::DryRun)
    }

    pub fn label(&self) -> &str {
        match self {
            TaskStatus::Pass => "pass",
            TaskStatus::Warn => "warn",
            TaskStatus::Fail => "fail",
            TaskStatus::Error => "error",
            TaskStatus::Skipped => "skipped",
            TaskStatus::DryRun => "pass (dry-run)",
            TaskStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one task. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub output_path: Option<PathBuf>,
    pub verdict_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn new(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            output_path: None,
            verdict_path: None,
            error: None,
        }
    }

    /// An `error` result carrying a message, used for timeouts and executor faults.
    pub fn error(task_id: TaskId, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(task_id, TaskStatus::Error)
        }
    }

    /// A `skipped` result caused by the failure of `failed`.
    pub fn skipped(task_id: TaskId, failed: &TaskId) -> Self {
        Self {
            error: Some(format!("Dependency {} failed", failed)),
            ..Self::new(task_id, TaskStatus::Skipped)
        }
    }

    pub fn dry_run(task_id: TaskId) -> Self {
        Self::new(task_id, TaskStatus::DryRun)
    }
}
