//! Upstream sync: map, classify and apply upstream changes to the local fork.

pub mod analyzer;
pub mod classify;
pub mod config;
pub mod engine;
pub mod filemap;
pub mod git;
pub mod namespace;
pub mod report;
pub mod resolver;
pub mod state;

pub use analyzer::{ClaudeAnalyzer, SemanticAnalyzer};
pub use classify::{classify_file, Classification, FileVersions};
pub use config::{SyncPolicy, Upstream, UpstreamConfig};
pub use engine::{find_upstreams_dir, FileAction, SyncEngine, SyncMode, SyncRun, UpstreamOutcome, UpstreamStatus};
pub use git::{GitUpstream, UpstreamRepo};
pub use report::SyncReport;
pub use resolver::{ConflictDecision, ConflictResolver, Decision, DecisionSource, Resolution, Risk};
pub use state::update_synced_commit;
