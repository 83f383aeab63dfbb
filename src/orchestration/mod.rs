//! Task orchestration.
//!
//! Execution-order strategies, the dependency-driven scheduler, task
//! dispatch through an external executor, and the run loop tying them
//! together.

pub mod dispatch;
pub mod order;
pub mod runner;
pub mod scheduler;

pub use dispatch::{
    find_dispatch_script, Dispatcher, ExecOutcome, ExecRequest, ScriptExecutor, StderrTail,
    TaskExecutor,
};
pub use order::ExecutionPlan;
pub use runner::{format_wave, validation_report, Orchestrator, RunEvent, RunOptions, RunSummary};
pub use scheduler::DependencyDrivenScheduler;
