//! Integration test suite for clavain.
//!
//! These tests drive the orchestration and sync engines end to end against
//! real files: a bash dispatch script stands in for the task executor, and
//! throw-away git repositories stand in for upstreams.
//!
//! # Test Categories
//!
//! - `orchestration_e2e`: manifest to run summary through the script executor
//! - `sync_e2e`: upstream clones through classification, apply and checkpoint
//!
//! # CI Compatibility
//!
//! No test calls a model. Semantic analysis uses an in-memory analyzer.

mod fixtures;

mod orchestration_e2e;
mod sync_e2e;
