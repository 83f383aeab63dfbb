use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("Duplicate task ID '{0}'")]
    DuplicateTask(String),

    #[error("Unknown mode '{0}'")]
    UnknownMode(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Manifest INVALID: {} error(s)", .0.len())]
    InvalidGraph(Vec<String>),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("dispatch.sh not found")]
    ExecutorNotFound,

    #[error("Analyzer binary not found: {0}")]
    AnalyzerNotFound(String),

    #[error("Analyzer error: {0}")]
    Analyzer(String),

    #[error("No upstreams directory found (looked in {})", .0.display())]
    UpstreamsDirNotFound(PathBuf),

    #[error("No home directory")]
    NoHomeDir,
}

pub type Result<T> = std::result::Result<T, Error>;
