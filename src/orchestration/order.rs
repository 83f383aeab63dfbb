//! Execution-order strategies.
//!
//! Turns a validated [`DependencyGraph`] into either precomputed batches
//! (all-parallel, all-sequential, manual-batching) or a live
//! [`DependencyDrivenScheduler`] (dependency-driven).

use crate::core::dag::DependencyGraph;
use crate::core::manifest::{ExecutionMode, Manifest};
use crate::core::task::TaskId;
use crate::error::Result;
use crate::orchestration::scheduler::DependencyDrivenScheduler;

/// Resolved dispatch order for one run.
#[derive(Debug)]
pub enum ExecutionPlan {
    /// Batches run one after another; tasks inside a batch run concurrently.
    Batches(Vec<Vec<TaskId>>),
    /// Tasks are handed out as their predecessors resolve.
    Dynamic(DependencyDrivenScheduler),
}

impl ExecutionPlan {
    pub fn batches(&self) -> Option<&[Vec<TaskId>]> {
        match self {
            ExecutionPlan::Batches(b) => Some(b),
            ExecutionPlan::Dynamic(_) => None,
        }
    }
}

/// Resolve the plan for `mode`.
pub fn resolve(mode: ExecutionMode, graph: &DependencyGraph, manifest: &Manifest) -> Result<ExecutionPlan> {
    Ok(match mode {
        ExecutionMode::AllParallel => ExecutionPlan::Batches(all_parallel(graph)),
        ExecutionMode::AllSequential => ExecutionPlan::Batches(all_sequential(graph)?),
        ExecutionMode::ManualBatching => ExecutionPlan::Batches(manual_batching(graph, manifest)?),
        ExecutionMode::DependencyDriven => {
            ExecutionPlan::Dynamic(DependencyDrivenScheduler::new(graph))
        }
    })
}

/// One batch with every task; dependencies are ignored.
pub fn all_parallel(graph: &DependencyGraph) -> Vec<Vec<TaskId>> {
    if graph.is_empty() {
        return Vec::new();
    }
    vec![graph.task_ids().to_vec()]
}

/// One task per batch in topological order.
///
/// Ties break by declaration order, so the order is stable for a fixed graph.
pub fn all_sequential(graph: &DependencyGraph) -> Result<Vec<Vec<TaskId>>> {
    Ok(topological_waves(graph)?
        .into_iter()
        .flatten()
        .map(|id| vec![id])
        .collect())
}

/// One group of sub-waves per declared stage.
///
/// Within a stage only same-stage dependencies order tasks: a task with no
/// intra-stage dependency lands in the stage's first sub-wave. Empty stages
/// produce no batches.
pub fn manual_batching(graph: &DependencyGraph, manifest: &Manifest) -> Result<Vec<Vec<TaskId>>> {
    let mut batches = Vec::new();
    for stage in &manifest.stages {
        if stage.task_ids.is_empty() {
            continue;
        }
        batches.extend(topological_waves(&graph.subgraph(&stage.task_ids))?);
    }
    Ok(batches)
}

/// Waves of an acyclic graph, as if every task succeeded.
///
/// Stops early on a cycle instead of spinning; validation reports those.
pub fn topological_waves(graph: &DependencyGraph) -> Result<Vec<Vec<TaskId>>> {
    let mut scheduler = DependencyDrivenScheduler::new(graph);
    let mut waves = Vec::new();
    while scheduler.is_active() {
        let ready = scheduler.get_ready();
        if ready.is_empty() {
            break;
        }
        for id in &ready {
            scheduler.mark_done(id)?;
        }
        waves.push(ready);
    }
    Ok(waves)
}
