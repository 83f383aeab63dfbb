//! Task dispatch.
//!
//! The [`Dispatcher`] turns a batch of ready task ids into prompts, runs
//! them through a [`TaskExecutor`] with bounded concurrency, and reads each
//! task's verdict sidecar back into a [`TaskResult`]. Dispatch failures never
//! escape this module: timeouts, spawn errors and panics all become `error`
//! results for the task that hit them.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{Config, Paths};
use crate::core::dag::DependencyGraph;
use crate::core::manifest::Manifest;
use crate::core::task::{Task, TaskId, TaskResult, TaskStatus};
use crate::error::Result;
use crate::{clog_debug, clog_trace, clog_warn};

/// Lines of dependency output embedded in a dependent's prompt.
pub const SUMMARY_MAX_LINES: usize = 50;

/// Environment variable carrying the dispatch profile to the executor.
pub const PROFILE_ENV: &str = "CLAVAIN_DISPATCH_PROFILE";

/// Characters of stderr kept in a timeout error.
pub const STDERR_TAIL_CHARS: usize = 500;

const VERDICT_SUFFIX: &str = "When done, report:\nVERDICT: CLEAN | NEEDS_ATTENTION [reason]\nFILES_CHANGED: [list]\n";

/// Stderr collected while a task runs.
///
/// Shared with the dispatcher so output written before a timeout is still
/// readable after the executor future is dropped.
#[derive(Debug, Clone, Default)]
pub struct StderrTail(Arc<Mutex<Vec<u8>>>);

impl StderrTail {
    pub fn push(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(bytes);
    }

    /// The last `max_chars` characters collected so far.
    pub fn tail(&self, max_chars: usize) -> String {
        let buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let text = String::from_utf8_lossy(&buf);
        let count = text.chars().count();
        text.chars().skip(count.saturating_sub(max_chars)).collect()
    }
}

/// Everything an executor needs to run one task.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub task_id: TaskId,
    pub prompt_path: PathBuf,
    pub project_dir: PathBuf,
    pub output_path: PathBuf,
    pub tier: String,
    /// Value for [`PROFILE_ENV`], if any.
    pub profile: Option<String>,
    /// Executors append the child's stderr here as it arrives.
    pub stderr: StderrTail,
}

/// How the executor process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub success: bool,
    pub stderr: String,
}

/// The external collaborator that actually performs a task.
///
/// Implementations write their primary output to `request.output_path` and
/// may write a `<output>.verdict` sidecar holding a `STATUS:` line.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutcome>;
}

/// Runs tasks through a `dispatch.sh`-style bash script.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    script: PathBuf,
}

impl ScriptExecutor {
    pub fn new(script: PathBuf) -> Self {
        Self { script }
    }

    fn command(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg(&self.script)
            .arg("--prompt-file")
            .arg(&request.prompt_path)
            .arg("-C")
            .arg(&request.project_dir)
            .arg("-o")
            .arg(&request.output_path)
            .arg("--tier")
            .arg(&request.tier)
            .arg("-s")
            .arg("workspace-write")
            .kill_on_drop(true);
        if let Some(profile) = &request.profile {
            cmd.env(PROFILE_ENV, profile);
        }
        cmd
    }
}

#[async_trait]
impl TaskExecutor for ScriptExecutor {
    async fn execute(&self, request: &ExecRequest) -> Result<ExecOutcome> {
        clog_debug!(
            "ScriptExecutor: {} --tier {} -o {}",
            self.script.display(),
            request.tier,
            request.output_path.display()
        );
        let mut child = self
            .command(request)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut pipe) = child.stderr.take() {
            let mut buf = [0u8; 4096];
            loop {
                let n = pipe.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                request.stderr.push(&buf[..n]);
            }
        }
        let status = child.wait().await?;
        Ok(ExecOutcome {
            success: status.success(),
            stderr: request.stderr.tail(usize::MAX),
        })
    }
}

/// Locate the dispatch script.
///
/// Order: the configured path, `dispatch.sh` next to the running binary,
/// then the first sorted match of
/// `<home>/.claude/plugins/cache/*/clavain/*/scripts/dispatch.sh`.
pub fn find_dispatch_script(config: &Config, paths: &Paths) -> Option<PathBuf> {
    if let Some(script) = &config.dispatch_script {
        if script.is_file() {
            return Some(script.clone());
        }
        clog_warn!("Configured dispatch_script {} does not exist", script.display());
    }

    if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        let candidate = dir.join("dispatch.sh");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let cache = paths.home_dir.as_ref()?.join(".claude/plugins/cache");
    plugin_cache_scripts(&cache).into_iter().next()
}

/// Every `*/clavain/*/scripts/dispatch.sh` under `cache`, sorted.
fn plugin_cache_scripts(cache: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for marketplace in subdirs(cache) {
        for version in subdirs(&marketplace.join("clavain")) {
            let script = version.join("scripts").join("dispatch.sh");
            if script.is_file() {
                found.push(script);
            }
        }
    }
    found.sort();
    found
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default()
}

/// `interserve` when the project carries the clodex toggle flag.
pub fn dispatch_profile(project_dir: &Path) -> Option<String> {
    project_dir
        .join(".claude")
        .join("clodex-toggle.flag")
        .exists()
        .then(|| "interserve".to_string())
}

/// Summarise a finished task's verdict and output for a dependent's prompt.
pub fn summarize_output(output_path: Option<&Path>, verdict_path: Option<&Path>, max_lines: usize) -> String {
    let mut parts = Vec::new();

    if let Some(verdict) = verdict_path.and_then(|p| std::fs::read_to_string(p).ok()) {
        parts.push(verdict.trim().to_string());
    }

    if let Some(output) = output_path.and_then(|p| std::fs::read_to_string(p).ok()) {
        let lines: Vec<&str> = output.split_inclusive('\n').collect();
        if lines.len() > max_lines {
            parts.push(lines[..max_lines].concat());
            parts.push(format!("\n... ({} more lines truncated)", lines.len() - max_lines));
        } else {
            parts.push(output);
        }
    }

    if parts.is_empty() {
        return "(no output)".to_string();
    }
    parts.join("\n")
}

/// Build the prompt for `task`.
///
/// `dep_results` holds only the direct dependencies that succeeded; they are
/// rendered in id order.
pub fn build_prompt(
    task: &Task,
    plan_path: Option<&Path>,
    dep_results: &BTreeMap<&TaskId, &TaskResult>,
    manifest: &Manifest,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !dep_results.is_empty() {
        sections.push("## Context from dependencies\n".to_string());
        for (dep_id, result) in dep_results {
            let title = manifest
                .task(dep_id)
                .map(|t| t.title.as_str())
                .unwrap_or(dep_id.as_str());
            sections.push(format!("### {}: {}", dep_id, title));
            sections.push(format!("**Status:** {}", result.status));
            sections.push(summarize_output(
                result.output_path.as_deref(),
                result.verdict_path.as_deref(),
                SUMMARY_MAX_LINES,
            ));
            sections.push(String::new());
        }
    }

    sections.push(format!("## Task: {}\n", task.title));
    if !task.files.is_empty() {
        sections.push("**Files:**".to_string());
        sections.extend(task.files.iter().map(|f| format!("- {}", f)));
        sections.push(String::new());
    }
    if let Some(hint) = &task.prompt_hint {
        sections.push(hint.clone());
        sections.push(String::new());
    }

    if let Some(plan) = plan_path {
        sections.push(format!("**Full plan:** {}", plan.display()));
        sections.push("Read the plan for detailed step-by-step instructions for this task.".to_string());
        sections.push(String::new());
    }

    sections.push(VERDICT_SUFFIX.to_string());
    sections.join("\n")
}

/// Status from the verdict sidecar, or from the exit status when absent.
///
/// A sidecar without a `STATUS:` line yields `error`.
pub fn parse_verdict_status(verdict_path: &Path, exit_success: bool) -> TaskStatus {
    match std::fs::read_to_string(verdict_path) {
        Ok(text) => text
            .lines()
            .find_map(|line| line.strip_prefix("STATUS:"))
            .map(TaskStatus::from_verdict)
            .unwrap_or(TaskStatus::Error),
        Err(_) if exit_success => TaskStatus::Pass,
        Err(_) => TaskStatus::Error,
    }
}

/// Dispatches batches of ready tasks for one orchestration run.
pub struct Dispatcher {
    manifest: Arc<Manifest>,
    graph: Arc<DependencyGraph>,
    executor: Arc<dyn TaskExecutor>,
    project_dir: PathBuf,
    plan_path: Option<PathBuf>,
    run_id: String,
    /// Run-scoped directory for prompts, outputs and verdicts.
    work_dir: PathBuf,
    profile: Option<String>,
}

impl Dispatcher {
    pub fn new(
        manifest: Arc<Manifest>,
        graph: Arc<DependencyGraph>,
        executor: Arc<dyn TaskExecutor>,
        project_dir: PathBuf,
        plan_path: Option<PathBuf>,
        run_id: String,
        work_dir: PathBuf,
    ) -> Self {
        let profile = dispatch_profile(&project_dir);
        Self {
            manifest,
            graph,
            executor,
            project_dir,
            plan_path,
            run_id,
            work_dir,
            profile,
        }
    }

    pub fn output_path(&self, task_id: &TaskId) -> PathBuf {
        self.work_dir
            .join(format!("orchestrate-{}-{}.md", self.run_id, task_id))
    }

    pub fn prompt_path(&self, task_id: &TaskId) -> PathBuf {
        self.work_dir
            .join(format!("orchestrate-{}-{}-prompt.md", self.run_id, task_id))
    }

    /// Dispatch `task_ids` concurrently and collect a result for every one.
    ///
    /// At most `min(max_parallel, batch size)` executors run at once.
    /// `completed` supplies the results of earlier waves for prompt context.
    pub async fn dispatch_batch(
        &self,
        task_ids: &[TaskId],
        completed: &HashMap<TaskId, TaskResult>,
    ) -> HashMap<TaskId, TaskResult> {
        let mut results = HashMap::with_capacity(task_ids.len());
        if task_ids.is_empty() {
            return results;
        }

        let permits = self.manifest.max_parallel.min(task_ids.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut join_set = JoinSet::new();

        for task_id in task_ids {
            let request = match self.prepare(task_id, completed) {
                Ok(request) => request,
                Err(message) => {
                    results.insert(task_id.clone(), TaskResult::error(task_id.clone(), message));
                    continue;
                }
            };
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.manifest.timeout_per_task;

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return TaskResult::error(request.task_id.clone(), "Dispatch semaphore closed");
                    }
                };
                run_one(executor.as_ref(), &request, timeout).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.task_id.clone(), result);
                }
                Err(e) => clog_warn!("Dispatch task aborted: {}", e),
            }
        }

        // A panicking worker loses its id; give it an error result.
        for task_id in task_ids {
            results
                .entry(task_id.clone())
                .or_insert_with(|| TaskResult::error(task_id.clone(), "Dispatch task panicked"));
        }
        results
    }

    /// Write the prompt file and build the executor request.
    fn prepare(&self, task_id: &TaskId, completed: &HashMap<TaskId, TaskResult>) -> std::result::Result<ExecRequest, String> {
        let task = self
            .manifest
            .task(task_id)
            .ok_or_else(|| format!("Task {} not in manifest", task_id))?;

        let dep_results: BTreeMap<&TaskId, &TaskResult> = self
            .graph
            .dependencies(task_id)
            .into_iter()
            .flatten()
            .filter_map(|dep| completed.get_key_value(dep))
            .filter(|(_, result)| matches!(result.status, TaskStatus::Pass | TaskStatus::Warn))
            .collect();

        let prompt = build_prompt(task, self.plan_path.as_deref(), &dep_results, &self.manifest);
        clog_trace!("Prompt for {}:\n{}", task_id, prompt);

        let prompt_path = self.prompt_path(task_id);
        std::fs::write(&prompt_path, prompt)
            .map_err(|e| format!("Failed to write prompt {}: {}", prompt_path.display(), e))?;

        Ok(ExecRequest {
            task_id: task_id.clone(),
            prompt_path,
            project_dir: self.project_dir.clone(),
            output_path: self.output_path(task_id),
            tier: task.effective_tier(&self.manifest.tier).to_string(),
            profile: self.profile.clone(),
            stderr: StderrTail::default(),
        })
    }
}

/// Run one request under `timeout` and read back its result.
async fn run_one(executor: &dyn TaskExecutor, request: &ExecRequest, timeout: Duration) -> TaskResult {
    let task_id = request.task_id.clone();
    clog_debug!("Dispatching {} (tier {})", task_id, request.tier);

    let outcome = match tokio::time::timeout(timeout, executor.execute(request)).await {
        Err(_) => {
            clog_warn!("Task {} timed out after {}s", task_id, timeout.as_secs());
            let mut message = format!("Timeout expired after {}s", timeout.as_secs());
            let partial = request.stderr.tail(STDERR_TAIL_CHARS);
            if !partial.trim().is_empty() {
                message.push_str(&format!(". Last stderr: {}", partial.trim()));
            }
            return TaskResult::error(task_id, message);
        }
        Ok(Err(e)) => {
            clog_warn!("Task {} executor error: {}", task_id, e);
            return TaskResult::error(task_id, e.to_string());
        }
        Ok(Ok(outcome)) => outcome,
    };

    let verdict_path = PathBuf::from(format!("{}.verdict", request.output_path.display()));
    let status = parse_verdict_status(&verdict_path, outcome.success);
    clog_debug!("Task {} finished: {}", task_id, status);
    if !outcome.success && !outcome.stderr.is_empty() {
        clog_debug!("Task {} stderr: {}", task_id, outcome.stderr.trim());
    }

    TaskResult {
        output_path: request.output_path.exists().then(|| request.output_path.clone()),
        verdict_path: verdict_path.exists().then_some(verdict_path),
        ..TaskResult::new(task_id, status)
    }
}
