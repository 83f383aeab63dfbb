//! Markdown sync report.

use crate::sync::classify::Classification;
use crate::sync::resolver::{Decision, DecisionSource, Resolution};

#[derive(Debug, Clone)]
struct DecisionEntry {
    file: String,
    resolution: Resolution,
}

/// Classification outcomes and conflict decisions across all upstreams.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    entries: Vec<(String, Classification)>,
    decisions: Vec<DecisionEntry>,
}

/// Per-family counts of recorded classifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportCounts {
    pub copy: usize,
    pub auto: usize,
    pub keep_local: usize,
    pub conflict: usize,
    pub skip: usize,
    pub review: usize,
    /// Analyzer decisions other than `needs_human`.
    pub resolved: usize,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, file: &str, classification: Classification) {
        self.entries.push((file.to_string(), classification));
    }

    pub fn add_decision(&mut self, file: &str, resolution: &Resolution) {
        self.decisions.push(DecisionEntry {
            file: file.to_string(),
            resolution: resolution.clone(),
        });
    }

    pub fn entries(&self) -> &[(String, Classification)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.decisions.is_empty()
    }

    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for (_, classification) in &self.entries {
            match classification {
                Classification::Copy => counts.copy += 1,
                Classification::Auto => counts.auto += 1,
                Classification::KeepLocal => counts.keep_local += 1,
                Classification::Conflict => counts.conflict += 1,
                c if c.is_skip() => counts.skip += 1,
                _ => counts.review += 1,
            }
        }
        counts.resolved = self
            .decisions
            .iter()
            .filter(|e| {
                e.resolution.source == DecisionSource::Analyzer
                    && e.resolution.decision.decision != Decision::NeedsHuman
            })
            .count();
        counts
    }

    pub fn generate(&self) -> String {
        let c = self.counts();
        let mut lines = vec![
            String::new(),
            "═══ Clavain Upstream Sync Report ═══".to_string(),
            String::new(),
            "## Classification Summary".to_string(),
            "| Category    | Count | Description                      |".to_string(),
            "|-------------|-------|----------------------------------|".to_string(),
            row("COPY", c.copy, "Content identical"),
            row("AUTO", c.auto, "Upstream-only, auto-applied"),
            row("KEEP-LOCAL", c.keep_local, "Local-only, preserved"),
            row(
                "CONFLICT",
                c.conflict,
                &format!("Both changed, {} AI-resolved", c.resolved),
            ),
            row("SKIP", c.skip, "Protected/deleted"),
            row("REVIEW", c.review, "Needs manual review"),
            String::new(),
        ];

        if !self.decisions.is_empty() {
            lines.push("## AI Decisions".to_string());
            for entry in &self.decisions {
                let d = &entry.resolution.decision;
                let via = match entry.resolution.source {
                    DecisionSource::Analyzer => String::new(),
                    other => format!(", {}", other),
                };
                lines.push(format!("- {}: **{}** (risk: {}{})", entry.file, d.decision, d.risk, via));
                if !d.rationale.is_empty() {
                    lines.push(format!("  \"{}\"", d.rationale));
                }
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

fn row(category: &str, count: usize, description: &str) -> String {
    format!("| {:<11} | {:<5} | {:<32} |", category, count, description)
}
