//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A bash stand-in for `dispatch.sh` and a project to run it in
//! - Throw-away upstream git repositories and local clones of them
//! - An in-memory semantic analyzer

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use git2::{Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use clavain::core::Manifest;
use clavain::orchestration::{ScriptExecutor, TaskExecutor};
use clavain::sync::analyzer::AnalysisRequest;
use clavain::sync::{ConflictDecision, SemanticAnalyzer};
use clavain::Result;

/// Stand-in for `dispatch.sh`.
///
/// Task ids ending in `-fail` report `STATUS: fail`; ids ending in `-quiet`
/// write no verdict and exit 0; ids ending in `-slow` write to stderr and
/// then hang. Every call is appended to
/// `<project>/calls.log` and its prompt copied to `<project>/<task>.prompt`.
pub const DISPATCH_SCRIPT: &str = r#"#!/usr/bin/env bash
set -euo pipefail
while [ $# -gt 0 ]; do
  case "$1" in
    --prompt-file) prompt="$2"; shift 2 ;;
    -C) project="$2"; shift 2 ;;
    -o) out="$2"; shift 2 ;;
    --tier) tier="$2"; shift 2 ;;
    *) shift ;;
  esac
done
name="$(basename "$out" .md)"
task="${name#orchestrate-*-}"
echo "$task tier=$tier" >> "$project/calls.log"
cp "$prompt" "$project/$task.prompt"
echo "output of $task" > "$out"
if [[ "$task" == *-slow ]]; then
  echo "partial progress on $task" >&2
  exec sleep 30
fi
case "$task" in
  *-fail) echo "STATUS: fail" > "$out.verdict" ;;
  *-quiet) ;;
  *) printf 'STATUS: pass\nVERDICT: CLEAN\n' > "$out.verdict" ;;
esac
"#;

/// A project directory with the dispatch stand-in installed.
pub struct ScriptProject {
    pub temp_dir: TempDir,
    pub script: PathBuf,
}

impl ScriptProject {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let script = temp_dir.path().join("dispatch.sh");
        std::fs::write(&script, DISPATCH_SCRIPT).expect("Failed to write dispatch script");
        Self { temp_dir, script }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::new(ScriptExecutor::new(self.script.clone()))
    }

    /// Task ids the script saw, in call order, with their tier.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("calls.log"))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Prompt the executor received for `task`.
    pub fn prompt(&self, task: &str) -> String {
        std::fs::read_to_string(self.path().join(format!("{}.prompt", task)))
            .expect("Prompt was not recorded")
    }
}

pub fn manifest(yaml: &str) -> Manifest {
    Manifest::parse(yaml).expect("Failed to parse manifest")
}

/// An upstream repository on `main`, built with git2.
pub struct OriginRepo {
    pub temp_dir: TempDir,
    repo: Repository,
}

impl OriginRepo {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(temp_dir.path(), &opts).expect("Failed to init repo");
        Self { temp_dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write (`Some`) or delete (`None`) files and commit. Returns the hash.
    pub fn commit(&self, files: &[(&str, Option<&str>)], message: &str) -> String {
        let mut index = self.repo.index().expect("Failed to open index");
        for (path, content) in files {
            let full = self.path().join(path);
            match content {
                Some(text) => {
                    if let Some(parent) = full.parent() {
                        std::fs::create_dir_all(parent).expect("Failed to create dirs");
                    }
                    std::fs::write(&full, text).expect("Failed to write file");
                    index.add_path(Path::new(path)).expect("Failed to stage file");
                }
                None => {
                    std::fs::remove_file(&full).expect("Failed to delete file");
                    index.remove_path(Path::new(path)).expect("Failed to unstage file");
                }
            }
        }
        index.write().expect("Failed to write index");
        let tree_id = index.write_tree().expect("Failed to write tree");
        let tree = self.repo.find_tree(tree_id).expect("Failed to find tree");
        let sig = Signature::now("Upstream Dev", "dev@upstream.test").expect("Failed to build signature");
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("Failed to commit")
            .to_string()
    }
}

/// A local fork with `upstreams.json` and a `.upstream-work` clone area.
pub struct SyncProject {
    pub temp_dir: TempDir,
}

impl SyncProject {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::create_dir(temp_dir.path().join(".upstream-work")).expect("Failed to create work dir");
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn upstreams_dir(&self) -> PathBuf {
        self.path().join(".upstream-work")
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("upstreams.json")
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create dirs");
        }
        std::fs::write(full, content).expect("Failed to write file");
    }

    pub fn read(&self, path: &str) -> String {
        std::fs::read_to_string(self.path().join(path)).expect("Failed to read file")
    }

    pub fn write_config(&self, json: &str) {
        std::fs::write(self.config_path(), json).expect("Failed to write upstreams.json");
    }

    pub fn config_text(&self) -> String {
        std::fs::read_to_string(self.config_path()).expect("Failed to read upstreams.json")
    }

    /// Clone `origin` into `.upstream-work/<name>`.
    pub fn clone_upstream(&self, name: &str, origin: &OriginRepo) -> PathBuf {
        let dest = self.upstreams_dir().join(name);
        let url = origin.path().to_str().expect("Non-UTF-8 temp path");
        Repository::clone(url, &dest).expect("Failed to clone upstream");
        dest
    }

    pub fn checkpoint(&self, name: &str) -> String {
        let doc: serde_json::Value =
            serde_json::from_str(&self.config_text()).expect("Invalid upstreams.json");
        doc["upstreams"]
            .as_array()
            .and_then(|list| list.iter().find(|u| u["name"] == name))
            .and_then(|u| u["lastSyncedCommit"].as_str())
            .expect("Upstream not in config")
            .to_string()
    }
}

/// Returns one canned decision and records what it was asked.
pub struct FixedAnalyzer {
    answer: ConflictDecision,
    calls: AtomicUsize,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl FixedAnalyzer {
    pub fn new(answer: ConflictDecision) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().expect("Poisoned").clone()
    }
}

#[async_trait]
impl SemanticAnalyzer for FixedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<ConflictDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("Poisoned").push(request.clone());
        Ok(self.answer.clone())
    }
}
