//! Process-level paths and tool configuration.
//!
//! All filesystem locations the engines touch are resolved once at process
//! start into a [`Paths`] value and passed down explicitly.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{clog_debug, Error, Result};

/// Default analyzer timeout (2 minutes).
pub const DEFAULT_ANALYZER_TIMEOUT_SECS: u64 = 120;

/// Filesystem layout rooted at a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
    pub log_file: PathBuf,
    /// Used only to locate a plugin-cached dispatch script.
    pub home_dir: Option<PathBuf>,
}

impl Paths {
    pub fn new(base_dir: impl Into<PathBuf>, home_dir: Option<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            config_file: base_dir.join("clavain.toml"),
            log_file: base_dir.join("clavain.log"),
            base_dir,
            home_dir,
        }
    }

    /// Resolve paths from an explicit override, `CLAVAIN_HOME`, or `~/.clavain`.
    pub fn resolve(base_override: Option<PathBuf>) -> Result<Self> {
        let home = dirs::home_dir();
        let base = match base_override {
            Some(dir) => dir,
            None => match std::env::var_os("CLAVAIN_HOME") {
                Some(dir) => PathBuf::from(dir),
                None => home.clone().ok_or(Error::NoHomeDir)?.join(".clavain"),
            },
        };
        Ok(Self::new(expand_tilde(&base, home.as_deref()), home))
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Config {
    pub dispatch_script: Option<PathBuf>,
    pub analyzer_command: Option<String>,
    pub analyzer_model: Option<String>,
    pub analyzer_timeout_secs: Option<u64>,
    pub upstreams_dir: Option<PathBuf>,
}

impl Config {
    pub fn effective_analyzer_command(&self) -> &str {
        self.analyzer_command.as_deref().unwrap_or("claude")
    }

    pub fn effective_analyzer_model(&self) -> &str {
        self.analyzer_model.as_deref().unwrap_or("haiku")
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(
            self.analyzer_timeout_secs
                .unwrap_or(DEFAULT_ANALYZER_TIMEOUT_SECS),
        )
    }

    pub fn load(paths: &Paths) -> Result<Self> {
        let path = &paths.config_file;
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        clog_debug!("Config loaded: {:?}", config);
        Ok(config)
    }
}

fn expand_tilde(path: &Path, home: Option<&Path>) -> PathBuf {
    if let (Ok(rest), Some(home)) = (path.strip_prefix("~"), home) {
        return home.join(rest);
    }
    path.to_path_buf()
}
