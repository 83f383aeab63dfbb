//! Semantic conflict analysis.
//!
//! The [`SemanticAnalyzer`] capability receives the three versions of a
//! conflicted file and returns a structured [`ConflictDecision`]. The
//! `ClaudeAnalyzer` implementation runs the Claude CLI in headless mode with
//! a JSON schema constraint.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::sync::resolver::ConflictDecision;
use crate::{clog_debug, clog_trace};

/// JSON schema the analyzer output must satisfy.
pub const DECISION_SCHEMA: &str = r#"{"type": "object", "properties": {"decision": {"type": "string", "enum": ["accept_upstream", "keep_local", "needs_human"]}, "rationale": {"type": "string"}, "blocklist_found": {"type": "array", "items": {"type": "string"}}, "risk": {"type": "string", "enum": ["low", "medium", "high"]}}, "required": ["decision", "rationale", "risk"]}"#;

/// One conflicted file as sent to the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub local_path: String,
    pub local: String,
    /// Upstream after namespace rewriting.
    pub upstream: String,
    /// Ancestor after namespace rewriting.
    pub ancestor: String,
    pub blocklist: Vec<String>,
}

impl AnalysisRequest {
    pub fn prompt(&self) -> String {
        let blocklist = if self.blocklist.is_empty() {
            "(none)".to_string()
        } else {
            self.blocklist.join(", ")
        };
        format!(
            "You are analyzing a file conflict during an upstream sync for the Clavain plugin.
Three versions exist: ancestor (at last sync), local (Clavain's version), upstream (new).

Context:
- Clavain is a general-purpose engineering plugin (no Rails/Ruby/Every.to)
- Namespace: /clavain: (not /compound-engineering: or /workflows:)
- Blocklist terms that should NOT appear: {blocklist}

File: {path}

ANCESTOR (at last sync):
{ancestor}

LOCAL (Clavain's current version):
{local}

UPSTREAM (new version, after namespace replacement):
{upstream}

Analyze: What did each side change? Are the changes orthogonal or conflicting?
Should Clavain accept upstream, keep local, or does this need human review?
Check for blocklist terms in the upstream changes.",
            blocklist = blocklist,
            path = self.local_path,
            ancestor = self.ancestor,
            local = self.local,
            upstream = self.upstream,
        )
    }
}

#[async_trait]
pub trait SemanticAnalyzer: Send + Sync {
    /// Analyze one conflict. Any error is collapsed to the fallback decision
    /// by the caller.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<ConflictDecision>;
}

/// Runs `claude -p` with structured JSON output.
#[derive(Debug, Clone)]
pub struct ClaudeAnalyzer {
    binary: PathBuf,
    model: String,
    timeout: Duration,
}

impl ClaudeAnalyzer {
    /// Locate the analyzer binary named in `config` on `PATH`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let command = config.effective_analyzer_command();
        let binary = which::which(command).map_err(|_| Error::AnalyzerNotFound(command.to_string()))?;
        Ok(Self::with_binary(binary)
            .with_model(config.effective_analyzer_model())
            .with_timeout(config.analyzer_timeout()))
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            model: "haiku".to_string(),
            timeout: Duration::from_secs(crate::config::DEFAULT_ANALYZER_TIMEOUT_SECS),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--json-schema")
            .arg(DECISION_SCHEMA)
            .arg("--model")
            .arg(&self.model)
            .arg("--max-turns")
            .arg("1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, prompt: &str) -> Result<String> {
        let mut child = self.command().spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SemanticAnalyzer for ClaudeAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<ConflictDecision> {
        clog_debug!("ClaudeAnalyzer: analyzing {} with {}", request.local_path, self.model);
        let stdout = tokio::time::timeout(self.timeout, self.run(&request.prompt()))
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;
        clog_trace!("ClaudeAnalyzer raw output: {}", stdout);
        parse_decision(&stdout)
    }
}

/// Envelope printed by `claude -p --output-format json`.
#[derive(Debug, Deserialize)]
struct ResultEnvelope {
    structured_output: Option<serde_json::Value>,
    result: Option<String>,
}

/// Parse analyzer output: a bare decision object, or the CLI envelope with
/// the decision in `structured_output` or as a JSON string in `result`.
pub fn parse_decision(stdout: &str) -> Result<ConflictDecision> {
    let trimmed = stdout.trim();
    if let Ok(decision) = serde_json::from_str::<ConflictDecision>(trimmed) {
        return Ok(decision);
    }

    let envelope: ResultEnvelope = serde_json::from_str(trimmed)
        .map_err(|e| Error::Analyzer(format!("unparseable output: {}", e)))?;
    if let Some(value) = envelope.structured_output {
        return serde_json::from_value(value)
            .map_err(|e| Error::Analyzer(format!("bad structured_output: {}", e)));
    }
    if let Some(result) = envelope.result {
        return serde_json::from_str(result.trim())
            .map_err(|e| Error::Analyzer(format!("bad result payload: {}", e)));
    }
    Err(Error::Analyzer("no decision in output".to_string()))
}
