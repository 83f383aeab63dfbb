//! The upstream sync loop.
//!
//! For each upstream: refresh the clone, diff the last synced commit against
//! HEAD, classify every mapped file, apply what is safe, resolve conflicts
//! when running unattended, and advance the checkpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::sync::analyzer::SemanticAnalyzer;
use crate::sync::classify::{classify_file, Classification, FileVersions};
use crate::sync::config::{SyncPolicy, Upstream, UpstreamConfig};
use crate::sync::git::{ChangeKind, GitUpstream, UpstreamRepo};
use crate::sync::report::SyncReport;
use crate::sync::resolver::{ConflictDecision, ConflictInput, ConflictResolver, Decision, Risk};
use crate::sync::state::update_synced_commit;
use crate::{clog, clog_debug, clog_warn};

/// Directory searched for clones when none is configured.
pub const DEFAULT_WORK_DIR: &str = ".upstream-work";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Classify and report only; nothing is written.
    DryRun,
    /// Unattended: conflicts go through the resolver.
    Auto,
    /// Conflicts are left for a human.
    Interactive,
}

impl SyncMode {
    /// `--dry-run` wins over `--auto`.
    pub fn from_flags(dry_run: bool, auto: bool) -> Self {
        if dry_run {
            SyncMode::DryRun
        } else if auto {
            SyncMode::Auto
        } else {
            SyncMode::Interactive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::DryRun => "dry-run",
            SyncMode::Auto => "auto",
            SyncMode::Interactive => "interactive",
        }
    }

    pub fn writes(&self) -> bool {
        *self != SyncMode::DryRun
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one classified file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Rewritten upstream content was written locally.
    Applied,
    /// Local content kept on purpose.
    Preserved,
    /// Nothing written; a human should look at it.
    LeftForReview,
    /// Nothing to do (skip rules, dry-run).
    Untouched,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub local_path: String,
    pub classification: Classification,
    pub action: FileAction,
    /// Present when a conflict went through the resolver.
    pub decision: Option<ConflictDecision>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamStatus {
    CloneMissing(PathBuf),
    UpToDate { head: String },
    /// The checkpoint commit is not in the clone; nothing was touched.
    BaseUnreachable { base: String },
    NoChanges { head: String, new_commits: usize },
    Synced { head: String, new_commits: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamOutcome {
    pub name: String,
    pub status: UpstreamStatus,
    pub files: Vec<FileRecord>,
    /// Whether `lastSyncedCommit` was written.
    pub checkpoint_advanced: bool,
}

impl UpstreamOutcome {
    fn new(name: &str, status: UpstreamStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            files: Vec::new(),
            checkpoint_advanced: false,
        }
    }

    /// Local paths written during this sync.
    pub fn modified(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|f| f.action == FileAction::Applied)
            .map(|f| f.local_path.as_str())
    }
}

/// Result of syncing every selected upstream.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub outcomes: Vec<UpstreamOutcome>,
    pub report: SyncReport,
    pub contamination: Vec<String>,
}

impl SyncRun {
    pub fn modified(&self) -> Vec<&str> {
        self.outcomes.iter().flat_map(|o| o.modified()).collect()
    }
}

pub struct SyncEngine {
    project_root: PathBuf,
    config_path: PathBuf,
    mode: SyncMode,
    analyzer: Option<Arc<dyn SemanticAnalyzer>>,
}

impl SyncEngine {
    /// `analyzer` is `None` when semantic analysis is disabled; conflicts in
    /// auto mode then only go through the deterministic pre-filter.
    pub fn new(
        project_root: PathBuf,
        config_path: PathBuf,
        mode: SyncMode,
        analyzer: Option<Arc<dyn SemanticAnalyzer>>,
    ) -> Self {
        Self {
            project_root,
            config_path,
            mode,
            analyzer,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Sync every upstream in `config` (or only `only`), then scan the
    /// written files for contamination. `on_upstream` sees each outcome as
    /// soon as it is known.
    pub async fn run(
        &self,
        config: &UpstreamConfig,
        upstreams_dir: &Path,
        only: Option<&str>,
        on_upstream: &mut dyn FnMut(&UpstreamOutcome),
    ) -> Result<SyncRun> {
        if let Some(name) = only {
            if config.upstream(name).is_none() {
                return Err(Error::Validation(format!("Unknown upstream '{}'", name)));
            }
        }

        let mut report = SyncReport::new();
        let mut outcomes = Vec::new();
        for upstream in &config.upstreams {
            if only.is_some_and(|name| name != upstream.name) {
                continue;
            }
            let clone_dir = upstreams_dir.join(&upstream.name);
            let outcome = if GitUpstream::is_clone(&clone_dir) {
                let repo = GitUpstream::open(&clone_dir)?;
                self.sync_upstream(upstream, &repo, &config.sync_config, &mut report)
                    .await?
            } else {
                clog_warn!("Clone for {} not found at {}", upstream.name, clone_dir.display());
                UpstreamOutcome::new(&upstream.name, UpstreamStatus::CloneMissing(clone_dir))
            };
            on_upstream(&outcome);
            outcomes.push(outcome);
        }

        let modified: Vec<&str> = outcomes.iter().flat_map(|o| o.modified()).collect();
        let contamination = contamination_check(&modified, &self.project_root, &config.sync_config);
        Ok(SyncRun {
            outcomes,
            report,
            contamination,
        })
    }

    /// Sync one upstream from an already-open clone.
    pub async fn sync_upstream(
        &self,
        upstream: &Upstream,
        repo: &dyn UpstreamRepo,
        policy: &SyncPolicy,
        report: &mut SyncReport,
    ) -> Result<UpstreamOutcome> {
        clog!("Syncing upstream {} (mode {})", upstream.name, self.mode);
        repo.refresh(&upstream.branch);
        let head = repo.head_commit()?;
        let base = upstream.last_synced_commit.as_str();

        if head == base {
            clog!("{}: no new commits (HEAD {})", upstream.name, short(&head));
            return Ok(UpstreamOutcome::new(&upstream.name, UpstreamStatus::UpToDate { head }));
        }
        if !repo.commit_is_reachable(base) {
            clog_warn!("{}: last synced commit {} not reachable; skipping", upstream.name, base);
            return Ok(UpstreamOutcome::new(
                &upstream.name,
                UpstreamStatus::BaseUnreachable { base: base.to_string() },
            ));
        }

        let new_commits = repo.count_new_commits(base)?;
        clog!("{}: {} new commit(s) ({} -> {})", upstream.name, new_commits, short(base), short(&head));
        let changed = repo.changed_files(base, &upstream.base_path)?;

        if changed.is_empty() {
            let mut outcome = UpstreamOutcome::new(
                &upstream.name,
                UpstreamStatus::NoChanges { head: head.clone(), new_commits },
            );
            outcome.checkpoint_advanced = self.advance_checkpoint(&upstream.name, &head)?;
            return Ok(outcome);
        }

        let resolver = ConflictResolver::new(self.analyzer.clone(), policy.content_blocklist.clone());
        let mut outcome = UpstreamOutcome::new(
            &upstream.name,
            UpstreamStatus::Synced { head: head.clone(), new_commits },
        );

        for file in changed.iter().filter(|f| f.kind != ChangeKind::Deleted) {
            let relative = strip_base_path(&file.path, &upstream.base_path);
            let Some(local_path) = upstream.file_map.resolve(relative) else {
                clog_debug!("{}: {} is not mapped", upstream.name, relative);
                continue;
            };

            let local_full = self.project_root.join(&local_path);
            let local = read_local(&local_full);
            let Some(upstream_content) = repo.file_at(&head, &file.path) else {
                clog_debug!("{}: {} unreadable at {}", upstream.name, file.path, short(&head));
                continue;
            };
            let ancestor = repo.file_at(base, &file.path);

            let classification = classify_file(
                &FileVersions {
                    local_path: &local_path,
                    local: local.as_deref(),
                    upstream: &upstream_content,
                    ancestor: ancestor.as_deref(),
                },
                policy,
            );
            clog_debug!("{}: {} -> {}", upstream.name, local_path, classification);
            report.add_entry(&local_path, classification);

            let mut decision = None;
            let action = match classification {
                Classification::Copy | Classification::Auto => {
                    if self.mode.writes() {
                        write_upstream(&local_full, &upstream_content, policy)?;
                        FileAction::Applied
                    } else {
                        FileAction::Untouched
                    }
                }
                Classification::KeepLocal => FileAction::Preserved,
                Classification::Conflict => match self.mode {
                    SyncMode::DryRun => FileAction::Untouched,
                    SyncMode::Interactive => FileAction::LeftForReview,
                    SyncMode::Auto => {
                        let replacements = &policy.namespace_replacements;
                        let rewritten_upstream = replacements.apply(&upstream_content);
                        let rewritten_ancestor = replacements.apply(ancestor.as_deref().unwrap_or(""));
                        let resolved = resolver
                            .resolve(&ConflictInput {
                                local_path: &local_path,
                                local: local.as_deref().unwrap_or(""),
                                upstream: &rewritten_upstream,
                                ancestor: &rewritten_ancestor,
                            })
                            .await;
                        report.add_decision(&local_path, &resolved);
                        let resolved = resolved.decision;
                        let action = match (resolved.decision, resolved.risk) {
                            (Decision::AcceptUpstream, Risk::Low) => {
                                write_upstream(&local_full, &upstream_content, policy)?;
                                FileAction::Applied
                            }
                            (Decision::KeepLocal, Risk::Low) => FileAction::Preserved,
                            _ => FileAction::LeftForReview,
                        };
                        decision = Some(resolved);
                        action
                    }
                },
                c if c.is_review() => FileAction::LeftForReview,
                _ => FileAction::Untouched,
            };

            outcome.files.push(FileRecord {
                local_path,
                classification,
                action,
                decision,
            });
        }

        outcome.checkpoint_advanced = self.advance_checkpoint(&upstream.name, &head)?;
        Ok(outcome)
    }

    fn advance_checkpoint(&self, name: &str, head: &str) -> Result<bool> {
        if !self.mode.writes() {
            return Ok(false);
        }
        update_synced_commit(&self.config_path, name, head)
    }
}

/// Clone directory: the configured one, else `<project>/.upstream-work`.
pub fn find_upstreams_dir(config: &Config, project_root: &Path) -> Result<PathBuf> {
    if let Some(dir) = &config.upstreams_dir {
        if dir.is_dir() {
            return Ok(dir.clone());
        }
        clog_warn!("Configured upstreams_dir {} does not exist", dir.display());
    }
    let work_dir = project_root.join(DEFAULT_WORK_DIR);
    if work_dir.is_dir() {
        return Ok(work_dir);
    }
    Err(Error::UpstreamsDirNotFound(work_dir))
}

/// Scan written files for blocklist terms and leftover raw namespace keys.
/// Returns one warning per hit.
pub fn contamination_check(modified: &[&str], project_root: &Path, policy: &SyncPolicy) -> Vec<String> {
    let mut warnings = Vec::new();
    for file in modified {
        let Ok(content) = std::fs::read_to_string(project_root.join(file)) else {
            continue;
        };
        for term in policy.content_blocklist.iter().filter(|t| !t.is_empty()) {
            if content.contains(term.as_str()) {
                warnings.push(format!("{} contains blocklisted term: {}", file, term));
            }
        }
        for key in policy.namespace_replacements.keys() {
            if content.contains(key) {
                warnings.push(format!("{} still contains raw namespace: {}", file, key));
            }
        }
    }
    if !warnings.is_empty() {
        clog_warn!("{} contamination warning(s)", warnings.len());
    }
    warnings
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> &'a str {
    if base_path.is_empty() {
        return path;
    }
    path.strip_prefix(base_path)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
}

fn read_local(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    std::fs::read_to_string(path).ok()
}

fn write_upstream(path: &Path, upstream: &str, policy: &SyncPolicy) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, policy.namespace_replacements.apply(upstream))?;
    clog_debug!("Wrote {}", path.display());
    Ok(())
}

fn short(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}
