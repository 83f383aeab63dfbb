//! Three-way file classification.
//!
//! A pure decision over one file's local, upstream and ancestor contents
//! plus the sync policy. No I/O happens here.

use crate::sync::config::SyncPolicy;
use crate::sync::namespace::has_blocklist_term;

/// Outcome of classifying one changed upstream file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    SkipProtected,
    SkipDeleted,
    SkipNotPresent,
    /// Rewritten upstream is identical to local.
    Copy,
    /// Only upstream changed; safe to apply.
    Auto,
    /// Only local changed.
    KeepLocal,
    /// Both sides changed.
    Conflict,
    /// No ancestor, so no three-way comparison is possible.
    ReviewNew,
    /// Upstream-only change that carries a blocklisted term.
    ReviewBlocklist,
    /// Neither side changed yet contents differ. Never auto-applied.
    ReviewUnexpected,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::SkipProtected => "SKIP:protected",
            Classification::SkipDeleted => "SKIP:deleted-locally",
            Classification::SkipNotPresent => "SKIP:not-present-locally",
            Classification::Copy => "COPY",
            Classification::Auto => "AUTO",
            Classification::KeepLocal => "KEEP-LOCAL",
            Classification::Conflict => "CONFLICT",
            Classification::ReviewNew => "REVIEW:new-upstream-file",
            Classification::ReviewBlocklist => "REVIEW:blocklist-in-upstream",
            Classification::ReviewUnexpected => "REVIEW:unexpected-divergence",
        }
    }

    /// Label family before any `:` (`SKIP`, `REVIEW`, `COPY`, ...).
    pub fn family(&self) -> &'static str {
        let label = self.label();
        label.split(':').next().unwrap_or(label)
    }

    /// Label detail after `:`, for SKIP and REVIEW outcomes.
    pub fn reason(&self) -> Option<&'static str> {
        self.label().split_once(':').map(|(_, reason)| reason)
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Classification::SkipProtected | Classification::SkipDeleted | Classification::SkipNotPresent
        )
    }

    pub fn is_review(&self) -> bool {
        matches!(
            self,
            Classification::ReviewNew | Classification::ReviewBlocklist | Classification::ReviewUnexpected
        )
    }

    /// Whether the rewritten upstream content is written without review.
    pub fn applies_upstream(&self) -> bool {
        matches!(self, Classification::Copy | Classification::Auto)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The three versions of one file.
#[derive(Debug, Clone, Copy)]
pub struct FileVersions<'a> {
    /// Path relative to the local project.
    pub local_path: &'a str,
    /// `None` when the file does not exist locally.
    pub local: Option<&'a str>,
    /// Raw upstream content, before namespace rewriting.
    pub upstream: &'a str,
    /// Content at the last synced commit; `None` for new files.
    pub ancestor: Option<&'a str>,
}

/// Classify one file. First matching rule wins.
pub fn classify_file(file: &FileVersions<'_>, policy: &SyncPolicy) -> Classification {
    if policy.protected_files.contains(file.local_path) {
        return Classification::SkipProtected;
    }
    if policy.deleted_locally.contains(file.local_path) {
        return Classification::SkipDeleted;
    }
    let Some(local) = file.local else {
        return Classification::SkipNotPresent;
    };

    let replacements = &policy.namespace_replacements;
    let upstream = replacements.apply(file.upstream);
    if upstream == local {
        return Classification::Copy;
    }

    let Some(ancestor) = file.ancestor else {
        return Classification::ReviewNew;
    };
    let ancestor = replacements.apply(ancestor);

    let upstream_changed = upstream != ancestor;
    let local_changed = local != ancestor;

    match (upstream_changed, local_changed) {
        (true, false) => {
            if has_blocklist_term(&upstream, &policy.content_blocklist).is_some() {
                Classification::ReviewBlocklist
            } else {
                Classification::Auto
            }
        }
        (false, true) => Classification::KeepLocal,
        (true, true) => Classification::Conflict,
        (false, false) => Classification::ReviewUnexpected,
    }
}
