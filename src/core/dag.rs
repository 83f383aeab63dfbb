//! Task dependency graph.
//!
//! The graph maps every task id to the set of task ids it depends on. It is
//! built once from a manifest, validated, and then only read. Validation
//! uses petgraph for cycle detection so every structural problem is reported
//! together before anything is dispatched.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::manifest::Manifest;
use crate::core::task::TaskId;

/// Dependency sets keyed by task id, with declaration order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    /// Task ids in declaration order. Drives every deterministic tie-break.
    order: Vec<TaskId>,
    deps: HashMap<TaskId, BTreeSet<TaskId>>,
}

impl DependencyGraph {
    /// Build the graph from a manifest using additive stage barriers.
    ///
    /// A task's dependency set is its explicit `depends` list unioned with
    /// every task of every strictly earlier stage. Stage membership alone
    /// orders a task after all prior stages even when `depends` is empty.
    pub fn build(manifest: &Manifest) -> Self {
        let mut graph = Self::default();
        let mut prior_stage_tasks: BTreeSet<TaskId> = BTreeSet::new();

        for stage in &manifest.stages {
            for id in &stage.task_ids {
                let mut deps: BTreeSet<TaskId> = manifest
                    .task(id)
                    .map(|t| t.depends.iter().cloned().collect())
                    .unwrap_or_default();
                deps.extend(prior_stage_tasks.iter().cloned());
                graph.insert(id.clone(), deps);
            }
            prior_stage_tasks.extend(stage.task_ids.iter().cloned());
        }

        graph
    }

    /// Build a graph directly from `(task, dependencies)` pairs.
    ///
    /// Pair order becomes declaration order. Dependencies are not checked;
    /// call [`validate`](Self::validate) before scheduling.
    pub fn from_edges<I, D, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::default();
        for (id, deps) in edges {
            let deps = deps.into_iter().map(|d| TaskId(d.into())).collect();
            graph.insert(TaskId(id.into()), deps);
        }
        graph
    }

    fn insert(&mut self, id: TaskId, deps: BTreeSet<TaskId>) {
        if !self.deps.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.deps.insert(id, deps);
    }

    /// Task ids in declaration order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.order
    }

    pub fn dependencies(&self, id: &TaskId) -> Option<&BTreeSet<TaskId>> {
        self.deps.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.deps.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Reverse index: task id to the set of tasks that directly depend on it.
    pub fn dependents_index(&self) -> HashMap<TaskId, BTreeSet<TaskId>> {
        let mut reverse: HashMap<TaskId, BTreeSet<TaskId>> = HashMap::new();
        for id in &self.order {
            for dep in &self.deps[id] {
                reverse.entry(dep.clone()).or_default().insert(id.clone());
            }
        }
        reverse
    }

    /// Restrict the graph to `ids`, dropping dependencies outside the set.
    pub fn subgraph(&self, ids: &[TaskId]) -> Self {
        let keep: HashSet<&TaskId> = ids.iter().collect();
        let mut sub = Self::default();
        for id in ids {
            let deps = self
                .deps
                .get(id)
                .map(|d| d.iter().filter(|x| keep.contains(x)).cloned().collect())
                .unwrap_or_default();
            sub.insert(id.clone(), deps);
        }
        sub
    }

    /// Check the graph, returning every problem found (empty means valid).
    ///
    /// Reports unknown dependency references, self-dependencies and at most
    /// one cycle, in that order.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for id in &self.order {
            for dep in &self.deps[id] {
                if !self.deps.contains_key(dep) {
                    errors.push(format!("Task '{}' depends on unknown task '{}'", id, dep));
                }
                if dep == id {
                    errors.push(format!("Task '{}' depends on itself", id));
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            let path: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
            errors.push(format!("Cycle detected: {}", path.join(" -> ")));
        }

        errors
    }

    /// Find one dependency cycle, described as `a -> b -> ... -> a` where
    /// each arrow reads "depends on".
    fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let mut graph: DiGraph<&TaskId, ()> = DiGraph::new();
        let index: HashMap<&TaskId, NodeIndex> = self
            .order
            .iter()
            .map(|id| (id, graph.add_node(id)))
            .collect();

        for id in &self.order {
            for dep in &self.deps[id] {
                if let Some(&dep_idx) = index.get(dep) {
                    graph.add_edge(index[id], dep_idx, ());
                }
            }
        }

        if !is_cyclic_directed(&graph) {
            return None;
        }

        let component = tarjan_scc(&graph).into_iter().find(|scc| {
            scc.len() > 1 || graph.find_edge(scc[0], scc[0]).is_some()
        })?;
        let members: HashSet<&TaskId> = component.iter().map(|&n| graph[n]).collect();

        // Walk inside the component until a node repeats; the tail is a cycle.
        let start = self.order.iter().find(|id| members.contains(id))?;
        let mut path: Vec<&TaskId> = vec![start];
        loop {
            let current = *path.last()?;
            let next = self.deps[current].iter().find(|d| members.contains(d))?;
            if let Some(pos) = path.iter().position(|p| *p == next) {
                let mut cycle: Vec<TaskId> = path[pos..].iter().map(|&id| id.clone()).collect();
                cycle.push(next.clone());
                return Some(cycle);
            }
            path.push(next);
        }
    }
}
