//! `upstreams.json` parsing.
//!
//! The document is parsed into typed records at the boundary. Map-valued
//! fields (`fileMap`, `namespaceReplacements`) keep their document order.

use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;
use crate::sync::filemap::FileMap;
use crate::sync::namespace::Replacements;
use crate::clog_debug;

/// One upstream repository.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub name: String,
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub last_synced_commit: String,
    /// Sub-directory of the upstream that is mirrored; empty for the root.
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub file_map: FileMap,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Policy shared by every upstream (`syncConfig`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    /// Local paths that are never overwritten.
    #[serde(default)]
    pub protected_files: HashSet<String>,
    /// Local paths deliberately removed from the fork.
    #[serde(default)]
    pub deleted_locally: HashSet<String>,
    #[serde(default)]
    pub namespace_replacements: Replacements,
    /// Terms that must not land in synced content.
    #[serde(default)]
    pub content_blocklist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub sync_config: SyncPolicy,
}

impl UpstreamConfig {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        clog_debug!("UpstreamConfig::load path={}", path.display());
        let config = Self::parse(&std::fs::read_to_string(path)?)?;
        clog_debug!("Loaded {} upstream(s)", config.upstreams.len());
        Ok(config)
    }

    pub fn upstream(&self, name: &str) -> Option<&Upstream> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

/// Deserialize a JSON object of strings into ordered `(key, value)` pairs.
pub(crate) fn string_pairs<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
    map.into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            other => Err(serde::de::Error::custom(format!(
                "expected string value for '{}', got {}",
                key, other
            ))),
        })
        .collect()
}
