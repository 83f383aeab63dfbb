//! Orchestration run loop.
//!
//! [`Orchestrator`] owns a validated manifest and graph. A run resolves the
//! execution plan, dispatches waves through the [`Dispatcher`], folds each
//! wave's results back into the scheduler (or, for static plans, into the
//! skip bookkeeping), and returns a [`RunSummary`]. The scheduler and the
//! `completed` map are only touched here, between waves.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::dag::DependencyGraph;
use crate::core::manifest::{ExecutionMode, Manifest};
use crate::core::task::{TaskId, TaskResult};
use crate::error::{Error, Result};
use crate::orchestration::dispatch::{Dispatcher, TaskExecutor};
use crate::orchestration::order::{self, ExecutionPlan};
use crate::{clog, clog_debug, clog_warn};

/// Per-run options from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub project_dir: PathBuf,
    pub plan_path: Option<PathBuf>,
    /// Print waves and pretend every task passed.
    pub dry_run: bool,
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Started {
        total: usize,
        mode: ExecutionMode,
        max_parallel: usize,
    },
    Wave {
        number: usize,
        task_ids: Vec<TaskId>,
        dry_run: bool,
    },
    /// Dependents skipped because `failed` did not pass.
    Skipped {
        failed: TaskId,
        skipped: Vec<TaskId>,
    },
}

/// A manifest paired with its validated dependency graph.
#[derive(Debug)]
pub struct Orchestrator {
    manifest: Arc<Manifest>,
    graph: Arc<DependencyGraph>,
    mode: ExecutionMode,
}

impl Orchestrator {
    /// Build and validate the graph. Any structural problem is fatal and
    /// every finding is returned in [`Error::InvalidGraph`].
    pub fn new(manifest: Manifest, mode_override: Option<ExecutionMode>) -> Result<Self> {
        let graph = DependencyGraph::build(&manifest);
        let errors = graph.validate();
        if !errors.is_empty() {
            return Err(Error::InvalidGraph(errors));
        }
        let mode = mode_override.unwrap_or(manifest.mode);
        Ok(Self {
            manifest: Arc::new(manifest),
            graph: Arc::new(graph),
            mode,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Execute the run.
    ///
    /// `executor` may be `None` only for dry runs. Temporary prompts and
    /// outputs live in a run-scoped directory removed when this returns.
    pub async fn run(
        &self,
        options: &RunOptions,
        executor: Option<Arc<dyn TaskExecutor>>,
        on_event: &mut dyn FnMut(&RunEvent),
    ) -> Result<RunSummary> {
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        clog!(
            "Run {} starting: {} tasks, mode={}, dry_run={}",
            run_id,
            self.manifest.task_count(),
            self.mode,
            options.dry_run
        );

        // Held until the end of this function, so it is removed on every path.
        let mut work_dir = None;
        let dispatcher = if options.dry_run {
            None
        } else {
            let executor = executor.ok_or(Error::ExecutorNotFound)?;
            let dir = tempfile::Builder::new()
                .prefix(&format!("orchestrate-{}-", run_id))
                .tempdir()?;
            let dispatcher = Dispatcher::new(
                Arc::clone(&self.manifest),
                Arc::clone(&self.graph),
                executor,
                options.project_dir.clone(),
                options.plan_path.clone(),
                run_id.clone(),
                dir.path().to_path_buf(),
            );
            work_dir = Some(dir);
            Some(dispatcher)
        };

        on_event(&RunEvent::Started {
            total: self.manifest.task_count(),
            mode: self.mode,
            max_parallel: self.manifest.max_parallel,
        });

        let mut completed = HashMap::new();
        match order::resolve(self.mode, &self.graph, &self.manifest)? {
            ExecutionPlan::Dynamic(mut scheduler) => {
                let mut wave = 0;
                while scheduler.is_active() {
                    let ready = scheduler.get_ready();
                    if ready.is_empty() {
                        clog_warn!("Scheduler active with nothing ready; stopping");
                        break;
                    }
                    wave += 1;
                    on_event(&RunEvent::Wave {
                        number: wave,
                        task_ids: ready.clone(),
                        dry_run: options.dry_run,
                    });

                    let mut results = match &dispatcher {
                        Some(d) => d.dispatch_batch(&ready, &completed).await,
                        None => dry_run_results(&ready),
                    };
                    for task_id in &ready {
                        let Some(result) = results.remove(task_id) else {
                            continue;
                        };
                        let success = result.status.is_success();
                        completed.insert(task_id.clone(), result);
                        if success {
                            scheduler.mark_done(task_id)?;
                            continue;
                        }
                        let skipped = scheduler.mark_failed(task_id)?;
                        for skip_id in &skipped {
                            completed.insert(skip_id.clone(), TaskResult::skipped(skip_id.clone(), task_id));
                        }
                        if !skipped.is_empty() {
                            on_event(&RunEvent::Skipped {
                                failed: task_id.clone(),
                                skipped,
                            });
                        }
                    }
                }
            }
            ExecutionPlan::Batches(batches) => {
                let dependents = self.graph.dependents_index();
                for (index, batch) in batches.iter().enumerate() {
                    let active: Vec<TaskId> = batch
                        .iter()
                        .filter(|id| !completed.contains_key(*id))
                        .cloned()
                        .collect();
                    if active.is_empty() {
                        continue;
                    }
                    on_event(&RunEvent::Wave {
                        number: index + 1,
                        task_ids: active.clone(),
                        dry_run: options.dry_run,
                    });

                    let mut results = match &dispatcher {
                        Some(d) => d.dispatch_batch(&active, &completed).await,
                        None => dry_run_results(&active),
                    };
                    for task_id in &active {
                        let Some(result) = results.remove(task_id) else {
                            continue;
                        };
                        let success = result.status.is_success();
                        completed.insert(task_id.clone(), result);
                        if !success {
                            let skipped = propagate_failure(task_id, &dependents, &mut completed);
                            if !skipped.is_empty() {
                                on_event(&RunEvent::Skipped {
                                    failed: task_id.clone(),
                                    skipped,
                                });
                            }
                        }
                    }
                }
            }
        }

        drop(work_dir);
        let summary = RunSummary::new(completed, &self.manifest);
        clog!(
            "Run {} finished: {} total, {} passed, {} failed/skipped",
            run_id,
            summary.total(),
            summary.passed(),
            summary.failed()
        );
        Ok(summary)
    }
}

fn dry_run_results(task_ids: &[TaskId]) -> HashMap<TaskId, TaskResult> {
    task_ids
        .iter()
        .map(|id| (id.clone(), TaskResult::dry_run(id.clone())))
        .collect()
}

/// Mark every transitive dependent of `failed_id` without a result as skipped.
///
/// Used by the static plans; returns the newly skipped ids nearest first.
pub fn propagate_failure(
    failed_id: &TaskId,
    dependents: &HashMap<TaskId, BTreeSet<TaskId>>,
    completed: &mut HashMap<TaskId, TaskResult>,
) -> Vec<TaskId> {
    let mut skipped = Vec::new();
    let mut queue: Vec<TaskId> = dependents
        .get(failed_id)
        .map(|d| d.iter().cloned().collect())
        .unwrap_or_default();
    let mut cursor = 0;
    while cursor < queue.len() {
        let dependent = queue[cursor].clone();
        cursor += 1;
        if completed.contains_key(&dependent) {
            continue;
        }
        clog_debug!("Skipping {}: dependency {} failed", dependent, failed_id);
        completed.insert(dependent.clone(), TaskResult::skipped(dependent.clone(), failed_id));
        if let Some(next) = dependents.get(&dependent) {
            queue.extend(next.iter().cloned());
        }
        skipped.push(dependent);
    }
    skipped
}

/// Every task's terminal result, in manifest declaration order.
#[derive(Debug, Clone)]
pub struct RunSummary {
    results: Vec<TaskResult>,
}

impl RunSummary {
    fn new(mut completed: HashMap<TaskId, TaskResult>, manifest: &Manifest) -> Self {
        let results = manifest
            .task_order()
            .filter_map(|id| completed.remove(id))
            .collect();
        Self { results }
    }

    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.task_id == task_id)
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    /// True when every task passed or warned.
    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Results grouped by status label, labels sorted.
    pub fn by_status(&self) -> BTreeMap<&str, Vec<&TaskResult>> {
        let mut groups: BTreeMap<&str, Vec<&TaskResult>> = BTreeMap::new();
        for result in &self.results {
            groups.entry(result.status.label()).or_default().push(result);
        }
        groups
    }

    /// Render the end-of-run report.
    pub fn format(&self, manifest: &Manifest) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "\n{}\nOrchestration Summary\n{}", rule, rule);
        for (status, results) in self.by_status() {
            let _ = writeln!(out, "\n  {}: {}", status.to_uppercase(), results.len());
            for result in results {
                let title = manifest
                    .task(&result.task_id)
                    .map(|t| t.title.as_str())
                    .unwrap_or(result.task_id.as_str());
                let reason = result
                    .error
                    .as_ref()
                    .map(|e| format!(" — {}", e))
                    .unwrap_or_default();
                let _ = writeln!(out, "    {}: {}{}", result.task_id, title, reason);
            }
        }
        let _ = writeln!(
            out,
            "\n  Total: {}, Passed: {}, Failed/Skipped: {}",
            self.total(),
            self.passed(),
            self.failed()
        );
        out.push_str(&rule);
        out
    }
}

/// Render one wave the way the CLI prints it.
pub fn format_wave(number: usize, task_ids: &[TaskId], manifest: &Manifest, dry_run: bool) -> String {
    let prefix = if dry_run { "[DRY RUN] " } else { "" };
    let mut out = format!("{}Wave {}: {} task(s)\n", prefix, number, task_ids.len());
    for id in task_ids {
        let task = manifest.task(id);
        let title = task.map(|t| t.title.as_str()).unwrap_or(id.as_str());
        let files = match task {
            Some(t) if !t.files.is_empty() => t.files.join(", "),
            _ => "(no files)".to_string(),
        };
        let tier = task.and_then(|t| t.tier.as_deref()).unwrap_or("default");
        let deps = match task {
            Some(t) if !t.depends.is_empty() => {
                let names: Vec<&str> = t.depends.iter().map(|d| d.as_str()).collect();
                format!(" ← [{}]", names.join(", "))
            }
            _ => String::new(),
        };
        let _ = writeln!(out, "  {}: {} ({}) [tier: {}]{}", id, title, files, tier, deps);
    }
    out
}

/// Outcome of `--validate`.
pub fn validation_report(manifest: &Manifest) -> std::result::Result<String, Vec<String>> {
    let errors = DependencyGraph::build(manifest).validate();
    if errors.is_empty() {
        Ok(format!(
            "Manifest valid: {} tasks, 0 cycles, mode: {}",
            manifest.task_count(),
            manifest.mode
        ))
    } else {
        Err(errors)
    }
}
