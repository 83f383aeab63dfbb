//! Core domain models for task orchestration.
//!
//! Tasks, the staged manifest that declares them, and the dependency graph
//! built from that manifest.

pub mod dag;
pub mod manifest;
pub mod task;

pub use dag::DependencyGraph;
pub use manifest::{ExecutionMode, Manifest, Stage};
pub use task::{Task, TaskId, TaskResult, TaskStatus};
