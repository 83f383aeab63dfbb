//! Conflict resolution for files both sides changed.
//!
//! A deterministic pre-filter settles most conflicts without any external
//! call. Only true divergence reaches the [`SemanticAnalyzer`], and every
//! analyzer failure collapses to the same [`ConflictDecision::fallback`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::sync::analyzer::{AnalysisRequest, SemanticAnalyzer};
use crate::sync::namespace::blocklist_terms_ignore_case;
use crate::{clog_debug, clog_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AcceptUpstream,
    KeepLocal,
    NeedsHuman,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AcceptUpstream => "accept_upstream",
            Decision::KeepLocal => "keep_local",
            Decision::NeedsHuman => "needs_human",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }
}

impl std::fmt::Display for Risk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to handle one conflicted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDecision {
    pub decision: Decision,
    pub risk: Risk,
    pub rationale: String,
    #[serde(default)]
    pub blocklist_found: Vec<String>,
}

impl ConflictDecision {
    /// The single outcome for any analyzer failure.
    pub fn fallback() -> Self {
        Self {
            decision: Decision::NeedsHuman,
            risk: Risk::High,
            rationale: "AI analysis failed".to_string(),
            blocklist_found: Vec::new(),
        }
    }

    fn low(decision: Decision, rationale: impl Into<String>) -> Self {
        Self {
            decision,
            risk: Risk::Low,
            rationale: rationale.into(),
            blocklist_found: Vec::new(),
        }
    }
}

/// Which step produced a [`ConflictDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Prefilter,
    Analyzer,
    /// No analyzer, or the analyzer failed.
    Fallback,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Prefilter => "pre-filter",
            DecisionSource::Analyzer => "analyzer",
            DecisionSource::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision together with the step that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: ConflictDecision,
    pub source: DecisionSource,
}

impl Resolution {
    fn new(decision: ConflictDecision, source: DecisionSource) -> Self {
        Self { decision, source }
    }

    fn fallback() -> Self {
        Self::new(ConflictDecision::fallback(), DecisionSource::Fallback)
    }
}

/// One conflicted file. Upstream and ancestor are already namespace-rewritten.
#[derive(Debug, Clone, Copy)]
pub struct ConflictInput<'a> {
    pub local_path: &'a str,
    pub local: &'a str,
    pub upstream: &'a str,
    pub ancestor: &'a str,
}

pub struct ConflictResolver {
    analyzer: Option<Arc<dyn SemanticAnalyzer>>,
    blocklist: Vec<String>,
}

impl ConflictResolver {
    /// `analyzer` is `None` when semantic analysis is disabled or unavailable.
    pub fn new(analyzer: Option<Arc<dyn SemanticAnalyzer>>, blocklist: Vec<String>) -> Self {
        Self { analyzer, blocklist }
    }

    /// Decide without any external call, if possible.
    ///
    /// Checked in order: blocklisted upstream (ignoring case), unchanged
    /// local, unchanged upstream.
    pub fn prefilter(&self, input: &ConflictInput<'_>) -> Option<ConflictDecision> {
        let found = blocklist_terms_ignore_case(input.upstream, &self.blocklist);
        if !found.is_empty() {
            return Some(ConflictDecision {
                rationale: format!("Upstream contains blocklisted term(s): {}", found.join(", ")),
                blocklist_found: found,
                ..ConflictDecision::low(Decision::KeepLocal, "")
            });
        }
        if input.local == input.ancestor {
            return Some(ConflictDecision::low(
                Decision::AcceptUpstream,
                "Local unchanged since last sync; upstream-only change",
            ));
        }
        if input.upstream == input.ancestor {
            return Some(ConflictDecision::low(
                Decision::KeepLocal,
                "Upstream unchanged since last sync; local-only change",
            ));
        }
        None
    }

    /// Resolve one conflict. Never fails.
    pub async fn resolve(&self, input: &ConflictInput<'_>) -> Resolution {
        if let Some(decision) = self.prefilter(input) {
            clog_debug!(
                "Conflict {} settled by pre-filter: {} ({})",
                input.local_path,
                decision.decision,
                decision.rationale
            );
            return Resolution::new(decision, DecisionSource::Prefilter);
        }

        let Some(analyzer) = &self.analyzer else {
            clog_warn!("Conflict {}: no semantic analyzer available", input.local_path);
            return Resolution::fallback();
        };

        let request = AnalysisRequest {
            local_path: input.local_path.to_string(),
            local: input.local.to_string(),
            upstream: input.upstream.to_string(),
            ancestor: input.ancestor.to_string(),
            blocklist: self.blocklist.clone(),
        };
        match analyzer.analyze(&request).await {
            Ok(decision) => {
                clog_debug!(
                    "Conflict {} analyzed: {} (risk {})",
                    input.local_path,
                    decision.decision,
                    decision.risk
                );
                Resolution::new(decision, DecisionSource::Analyzer)
            }
            Err(e) => {
                clog_warn!("Conflict {}: analysis failed: {}", input.local_path, e);
                Resolution::fallback()
            }
        }
    }
}
