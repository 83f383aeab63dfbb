//! Dependency-driven scheduler.
//!
//! The scheduler is a topological-readiness engine over a validated
//! [`DependencyGraph`]. It hands out tasks as soon as every predecessor has
//! reached a terminal state, accepts completion and failure signals, and
//! propagates failures to every transitive dependent.
//!
//! Per-task states: blocked → ready → done | failed | skipped.
//!
//! The scheduler is not synchronised. A single orchestration loop owns it and
//! makes every `get_ready`/`mark_done`/`mark_failed` call; only dispatch of
//! already-ready tasks runs in parallel.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::dag::DependencyGraph;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::clog_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Waiting on at least one predecessor.
    Blocked,
    /// All predecessors resolved; not yet handed out.
    Ready,
    /// Handed out by `get_ready`, awaiting a signal.
    Dispatched,
    Done,
    Failed,
    /// Skipped because a predecessor failed. Resolved internally once ready.
    Skipped,
}

/// Live readiness state for one orchestration run.
#[derive(Debug)]
pub struct DependencyDrivenScheduler {
    /// Declaration order for deterministic hand-out.
    order: Vec<TaskId>,
    /// Remaining unresolved predecessors per task.
    pending: HashMap<TaskId, usize>,
    /// Reverse-dependency index, computed once.
    dependents: HashMap<TaskId, BTreeSet<TaskId>>,
    state: HashMap<TaskId, NodeState>,
    skip_set: HashSet<TaskId>,
    /// Tasks in done/failed/skipped.
    terminal: usize,
}

impl DependencyDrivenScheduler {
    /// Create a scheduler for a graph that has passed validation.
    ///
    /// Dependencies on unknown ids are ignored rather than blocking forever.
    pub fn new(graph: &DependencyGraph) -> Self {
        let order = graph.task_ids().to_vec();
        let mut pending = HashMap::with_capacity(order.len());
        let mut state = HashMap::with_capacity(order.len());

        for id in &order {
            let count = graph
                .dependencies(id)
                .map(|deps| deps.iter().filter(|d| graph.contains(d)).count())
                .unwrap_or(0);
            pending.insert(id.clone(), count);
            let initial = if count == 0 {
                NodeState::Ready
            } else {
                NodeState::Blocked
            };
            state.insert(id.clone(), initial);
        }

        Self {
            order,
            pending,
            dependents: graph.dependents_index(),
            state,
            skip_set: HashSet::new(),
            terminal: 0,
        }
    }

    /// True while any task is not yet done, failed or skipped.
    pub fn is_active(&self) -> bool {
        self.terminal < self.order.len()
    }

    /// Return every ready task not handed out before, in declaration order.
    ///
    /// Ready tasks that were skipped are resolved on the spot instead of
    /// being returned, which may in turn ready (skipped) dependents; this
    /// repeats until no skipped task is ready.
    pub fn get_ready(&mut self) -> Vec<TaskId> {
        let mut ready = Vec::new();
        loop {
            let newly_ready: Vec<TaskId> = self
                .order
                .iter()
                .filter(|id| self.state[*id] == NodeState::Ready)
                .cloned()
                .collect();

            let mut resolved_skip = false;
            for id in newly_ready {
                if self.skip_set.contains(&id) {
                    clog_debug!("Scheduler: resolving skipped task {}", id);
                    self.state.insert(id.clone(), NodeState::Skipped);
                    self.release(&id);
                    resolved_skip = true;
                } else {
                    self.state.insert(id.clone(), NodeState::Dispatched);
                    ready.push(id);
                }
            }

            if !resolved_skip {
                break;
            }
        }
        clog_debug!("Scheduler: get_ready -> {:?}", ready);
        ready
    }

    /// Mark a handed-out task as successfully completed.
    pub fn mark_done(&mut self, task_id: &TaskId) -> Result<()> {
        self.expect_dispatched(task_id)?;
        clog_debug!("Scheduler: {} done", task_id);
        self.state.insert(task_id.clone(), NodeState::Done);
        self.terminal += 1;
        self.release(task_id);
        Ok(())
    }

    /// Mark a handed-out task as failed.
    ///
    /// Returns the transitive dependents newly marked skipped, nearest first.
    /// Tasks already skipped by an earlier failure are not reported again.
    pub fn mark_failed(&mut self, task_id: &TaskId) -> Result<Vec<TaskId>> {
        self.expect_dispatched(task_id)?;
        self.state.insert(task_id.clone(), NodeState::Failed);
        self.terminal += 1;
        self.release(task_id);

        let mut skipped = Vec::new();
        let mut queue: Vec<TaskId> = self
            .dependents
            .get(task_id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        let mut cursor = 0;
        while cursor < queue.len() {
            let dependent = queue[cursor].clone();
            cursor += 1;
            if self.skip_set.insert(dependent.clone()) {
                // Skipped tasks are terminal for `is_active`; they are
                // released to their own dependents once they become ready.
                self.terminal += 1;
                if let Some(next) = self.dependents.get(&dependent) {
                    queue.extend(next.iter().cloned());
                }
                skipped.push(dependent);
            }
        }

        clog_debug!("Scheduler: {} failed, skipping {:?}", task_id, skipped);
        Ok(skipped)
    }

    fn expect_dispatched(&self, task_id: &TaskId) -> Result<()> {
        match self.state.get(task_id) {
            Some(NodeState::Dispatched) => Ok(()),
            Some(other) => Err(Error::Validation(format!(
                "Task {} cannot be resolved from state {:?}",
                task_id, other
            ))),
            None => Err(Error::Validation(format!("Task {} not in graph", task_id))),
        }
    }

    /// Decrement predecessor counts of `task_id`'s dependents.
    fn release(&mut self, task_id: &TaskId) {
        let Some(dependents) = self.dependents.get(task_id) else {
            return;
        };
        for dependent in dependents {
            if let Some(count) = self.pending.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 && self.state.get(dependent) == Some(&NodeState::Blocked) {
                    self.state.insert(dependent.clone(), NodeState::Ready);
                }
            }
        }
    }
}
