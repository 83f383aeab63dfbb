//! Read access to upstream clones.
//!
//! The sync loop only needs a handful of content-addressed queries against
//! an upstream clone; [`UpstreamRepo`] names them and [`GitUpstream`]
//! answers them with git2.

use std::path::{Path, PathBuf};

use git2::{Delta, DiffOptions, ObjectType, Repository, ResetType};

use crate::error::Result;
use crate::{clog_debug, clog_warn};

/// Kind of change reported for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub kind: ChangeKind,
    /// Path relative to the repository root.
    pub path: String,
}

/// Queries the sync loop makes against one upstream clone.
pub trait UpstreamRepo {
    /// Fetch `origin` and hard-reset to `origin/<branch>`. Failures are
    /// logged and otherwise ignored; the sync proceeds on what is local.
    fn refresh(&self, branch: &str);

    /// Full hash of HEAD.
    fn head_commit(&self) -> Result<String>;

    fn commit_is_reachable(&self, commit: &str) -> bool;

    /// Commits reachable from HEAD but not from `since`.
    fn count_new_commits(&self, since: &str) -> Result<usize>;

    /// Files changed between `since` and HEAD, limited to `path_filter`
    /// (empty means the whole tree).
    fn changed_files(&self, since: &str, path_filter: &str) -> Result<Vec<ChangedFile>>;

    /// Text content of `path` at `commit`, or `None` if absent or not UTF-8.
    fn file_at(&self, commit: &str, path: &str) -> Option<String>;
}

/// git2-backed [`UpstreamRepo`] over a local clone.
pub struct GitUpstream {
    clone_dir: PathBuf,
}

impl GitUpstream {
    pub fn open(clone_dir: &Path) -> Result<Self> {
        clog_debug!("GitUpstream::open path={}", clone_dir.display());
        let _ = Repository::open(clone_dir)?;
        Ok(Self {
            clone_dir: clone_dir.to_path_buf(),
        })
    }

    /// Whether `dir` looks like a clone (has a `.git` directory).
    pub fn is_clone(dir: &Path) -> bool {
        dir.join(".git").is_dir()
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::open(&self.clone_dir)?)
    }

    fn try_refresh(&self, branch: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut remote = repo.find_remote("origin")?;
        remote.fetch(&[] as &[&str], None, None)?;
        let target = repo
            .revparse_single(&format!("refs/remotes/origin/{}", branch))?
            .peel(ObjectType::Commit)?;
        repo.reset(&target, ResetType::Hard, None)?;
        Ok(())
    }
}

impl UpstreamRepo for GitUpstream {
    fn refresh(&self, branch: &str) {
        if let Err(e) = self.try_refresh(branch) {
            clog_warn!(
                "Refreshing {} (origin/{}) failed: {}",
                self.clone_dir.display(),
                branch,
                e
            );
        }
    }

    fn head_commit(&self) -> Result<String> {
        let repo = self.repo()?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn commit_is_reachable(&self, commit: &str) -> bool {
        if commit.is_empty() {
            return false;
        }
        self.repo()
            .map(|repo| repo.revparse_single(commit).is_ok())
            .unwrap_or(false)
    }

    fn count_new_commits(&self, since: &str) -> Result<usize> {
        let repo = self.repo()?;
        let mut walk = repo.revwalk()?;
        walk.push_head()?;
        walk.hide(repo.revparse_single(since)?.peel_to_commit()?.id())?;
        Ok(walk.count())
    }

    fn changed_files(&self, since: &str, path_filter: &str) -> Result<Vec<ChangedFile>> {
        let repo = self.repo()?;
        let old_tree = repo.revparse_single(since)?.peel_to_tree()?;
        let new_tree = repo.head()?.peel_to_tree()?;

        let mut opts = DiffOptions::new();
        if !path_filter.is_empty() && path_filter != "." {
            opts.pathspec(path_filter);
        }
        let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))?;

        let files = diff
            .deltas()
            .filter_map(|delta| {
                let kind = match delta.status() {
                    Delta::Added => ChangeKind::Added,
                    Delta::Modified => ChangeKind::Modified,
                    Delta::Deleted => ChangeKind::Deleted,
                    _ => ChangeKind::Other,
                };
                let file = if kind == ChangeKind::Deleted {
                    delta.old_file()
                } else {
                    delta.new_file()
                };
                let path = file.path()?.to_str()?.to_string();
                Some(ChangedFile { kind, path })
            })
            .collect::<Vec<_>>();
        clog_debug!("{} changed file(s) since {} under '{}'", files.len(), since, path_filter);
        Ok(files)
    }

    fn file_at(&self, commit: &str, path: &str) -> Option<String> {
        let repo = self.repo().ok()?;
        let object = repo.revparse_single(&format!("{}:{}", commit, path)).ok()?;
        let blob = object.peel_to_blob().ok()?;
        std::str::from_utf8(blob.content()).ok().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    fn commit_files(repo: &Repository, files: &[(&str, Option<&str>)], message: &str) -> String {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let mut index = repo.index().unwrap();
        for (path, content) in files {
            let full = workdir.join(path);
            match content {
                Some(text) => {
                    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
                    std::fs::write(&full, text).unwrap();
                    index.add_path(Path::new(path)).unwrap();
                }
                None => {
                    std::fs::remove_file(&full).unwrap();
                    index.remove_path(Path::new(path)).unwrap();
                }
            }
        }
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_history_queries() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let first = commit_files(
            &repo,
            &[("skills/a.md", Some("a1\n")), ("skills/b.md", Some("b1\n")), ("README.md", Some("r\n"))],
            "initial",
        );
        let second = commit_files(
            &repo,
            &[("skills/a.md", Some("a2\n")), ("skills/b.md", None), ("skills/c.md", Some("c1\n")), ("README.md", Some("r2\n"))],
            "update",
        );

        let upstream = GitUpstream::open(dir.path()).unwrap();
        assert!(GitUpstream::is_clone(dir.path()));
        assert_eq!(upstream.head_commit().unwrap(), second);
        assert!(upstream.commit_is_reachable(&first));
        assert!(!upstream.commit_is_reachable("0123456789abcdef0123456789abcdef01234567"));
        assert!(!upstream.commit_is_reachable(""));
        assert_eq!(upstream.count_new_commits(&first).unwrap(), 1);

        let mut changed = upstream.changed_files(&first, "skills").unwrap();
        changed.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            changed,
            vec![
                ChangedFile { kind: ChangeKind::Modified, path: "skills/a.md".into() },
                ChangedFile { kind: ChangeKind::Deleted, path: "skills/b.md".into() },
                ChangedFile { kind: ChangeKind::Added, path: "skills/c.md".into() },
            ]
        );
        assert_eq!(upstream.changed_files(&first, ".").unwrap().len(), 4);

        assert_eq!(upstream.file_at(&first, "skills/a.md").as_deref(), Some("a1\n"));
        assert_eq!(upstream.file_at(&second, "skills/a.md").as_deref(), Some("a2\n"));
        assert_eq!(upstream.file_at(&second, "skills/b.md"), None);
    }

    #[test]
    fn test_refresh_without_remote_is_harmless() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let head = commit_files(&repo, &[("x.md", Some("x"))], "only");
        let upstream = GitUpstream::open(dir.path()).unwrap();
        upstream.refresh("main");
        assert_eq!(upstream.head_commit().unwrap(), head);
    }

    #[test]
    fn test_open_non_repo_fails() {
        let dir = TempDir::new().unwrap();
        assert!(GitUpstream::open(dir.path()).is_err());
        assert!(!GitUpstream::is_clone(dir.path()));
    }
}
