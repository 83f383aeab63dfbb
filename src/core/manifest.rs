//! Execution manifest loading.
//!
//! A manifest (`*.exec.yaml`) declares ordered stages of tasks plus run
//! settings. The raw document is parsed into private serde structs and then
//! converted into the typed [`Manifest`], rejecting duplicate task ids and
//! unknown execution modes at load time.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::clog_debug;

/// Strategy used to turn the dependency graph into dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    AllParallel,
    AllSequential,
    ManualBatching,
    DependencyDriven,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 4] = [
        ExecutionMode::AllParallel,
        ExecutionMode::AllSequential,
        ExecutionMode::DependencyDriven,
        ExecutionMode::ManualBatching,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::AllParallel => "all-parallel",
            ExecutionMode::AllSequential => "all-sequential",
            ExecutionMode::ManualBatching => "manual-batching",
            ExecutionMode::DependencyDriven => "dependency-driven",
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::DependencyDriven
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::UnknownMode(s.to_string()))
    }
}

/// An ordered stage: a name plus the ids of its tasks in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub task_ids: Vec<TaskId>,
}

/// Parsed execution plan.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub version: u32,
    pub mode: ExecutionMode,
    pub tier: String,
    pub max_parallel: usize,
    pub timeout_per_task: Duration,
    pub stages: Vec<Stage>,
    pub tasks: HashMap<TaskId, Task>,
}

impl Manifest {
    pub const DEFAULT_TIER: &'static str = "deep";
    pub const DEFAULT_MAX_PARALLEL: usize = 5;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Build a manifest from already-typed stages, rejecting duplicate ids.
    ///
    /// Each stage is a name plus its tasks in declaration order; every
    /// task's `stage` field is overwritten with the stage name.
    pub fn from_stages(mode: ExecutionMode, stages: Vec<(String, Vec<Task>)>) -> Result<Self> {
        let mut tasks = HashMap::new();
        let mut typed_stages = Vec::with_capacity(stages.len());
        for (name, stage_tasks) in stages {
            let mut task_ids = Vec::with_capacity(stage_tasks.len());
            for mut task in stage_tasks {
                if tasks.contains_key(&task.id) {
                    return Err(Error::DuplicateTask(task.id.to_string()));
                }
                task.stage = name.clone();
                task_ids.push(task.id.clone());
                tasks.insert(task.id.clone(), task);
            }
            typed_stages.push(Stage { name, task_ids });
        }
        Ok(Self {
            version: 1,
            mode,
            tier: Self::DEFAULT_TIER.to_string(),
            max_parallel: Self::DEFAULT_MAX_PARALLEL,
            timeout_per_task: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            stages: typed_stages,
            tasks,
        })
    }

    /// Parse a manifest document (YAML, or JSON as a YAML subset).
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawManifest = serde_yaml::from_str(text)?;
        let mode = match raw.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => ExecutionMode::default(),
        };

        let stages = raw
            .stages
            .into_iter()
            .map(|stage| {
                let name = stage.name.unwrap_or_else(|| "unnamed".to_string());
                let tasks = stage
                    .tasks
                    .into_iter()
                    .map(|t| Task {
                        id: TaskId(t.id),
                        title: t.title,
                        stage: name.clone(),
                        files: t.files,
                        depends: t.depends.into_iter().map(TaskId).collect(),
                        tier: t.tier,
                        prompt_hint: t.prompt_hint,
                    })
                    .collect();
                (name, tasks)
            })
            .collect();

        let mut manifest = Self::from_stages(mode, stages)?;
        manifest.version = raw.version.unwrap_or(1);
        if let Some(tier) = raw.tier {
            manifest.tier = tier;
        }
        if let Some(max_parallel) = raw.max_parallel {
            manifest.max_parallel = max_parallel.max(1);
        }
        if let Some(timeout) = raw.timeout_per_task {
            manifest.timeout_per_task = Duration::from_secs(timeout);
        }
        Ok(manifest)
    }

    /// Load and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        clog_debug!("Manifest::load path={}", path.display());
        if !path.is_file() {
            return Err(Error::ManifestNotFound(path.to_path_buf()));
        }
        let manifest = Self::parse(&std::fs::read_to_string(path)?)?;
        clog_debug!(
            "Manifest loaded: {} tasks in {} stages, mode={}",
            manifest.tasks.len(),
            manifest.stages.len(),
            manifest.mode
        );
        Ok(manifest)
    }

    /// Task ids in stage declaration order.
    pub fn task_order(&self) -> impl Iterator<Item = &TaskId> {
        self.stages.iter().flat_map(|s| s.task_ids.iter())
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    version: Option<u32>,
    mode: Option<String>,
    tier: Option<String>,
    max_parallel: Option<usize>,
    timeout_per_task: Option<u64>,
    #[serde(default)]
    stages: Vec<RawStage>,
}

#[derive(Debug, Deserialize)]
struct RawStage {
    name: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    title: String,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    depends: Vec<String>,
    tier: Option<String>,
    prompt_hint: Option<String>,
}
