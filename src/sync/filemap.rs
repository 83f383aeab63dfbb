//! Upstream-to-local path mapping.

use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::clog_warn;

/// Ordered `source glob -> destination glob` table from `fileMap`.
///
/// Glob keys are compiled once, when the table is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMap {
    entries: Vec<MapEntry>,
}

#[derive(Debug, Clone)]
struct MapEntry {
    src: String,
    dst: String,
    /// Set for keys containing `*` or `?`.
    glob: Option<Regex>,
}

impl MapEntry {
    fn new(src: String, dst: String) -> Self {
        let glob = if src.contains('*') || src.contains('?') {
            compile_glob(&src)
        } else {
            None
        };
        Self { src, dst, glob }
    }
}

impl PartialEq for MapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.src == other.src && self.dst == other.dst
    }
}

impl Eq for MapEntry {}

impl FileMap {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| MapEntry::new(k.into(), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map an upstream path (already relative to `basePath`) to a local path.
    ///
    /// An exact key wins. Otherwise the first glob key that matches is used:
    /// the text after the source's literal prefix is appended to the
    /// destination's literal prefix.
    pub fn resolve(&self, changed_file: &str) -> Option<String> {
        if let Some(entry) = self.entries.iter().find(|e| e.src == changed_file) {
            return Some(entry.dst.clone());
        }

        let entry = self.entries.iter().find(|e| {
            e.glob
                .as_ref()
                .is_some_and(|re| re.is_match(changed_file))
        })?;
        let src_prefix = literal_prefix(&entry.src);
        let dst_prefix = literal_prefix(&entry.dst);
        let suffix = changed_file.get(src_prefix.len()..).unwrap_or("");
        Some(format!("{}{}", dst_prefix, suffix))
    }
}

impl<'de> Deserialize<'de> for FileMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::sync::config::string_pairs(deserializer).map(FileMap::new)
    }
}

/// Text before the first `*`.
fn literal_prefix(pattern: &str) -> &str {
    pattern.split('*').next().unwrap_or("")
}

/// Compile a shell-style pattern: `*` matches anything (including `/`), `?`
/// one character, `[seq]`/`[!seq]` a character class.
fn compile_glob(pattern: &str) -> Option<Regex> {
    match Regex::new(&glob_to_regex(pattern)) {
        Ok(re) => Some(re),
        Err(e) => {
            clog_warn!("fileMap pattern '{}' ignored: {}", pattern, e);
            None
        }
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("(?s)^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    let mut body: String = chars[i + 1..end].iter().collect();
                    if let Some(rest) = body.strip_prefix('!') {
                        body = format!("^{}", rest);
                    }
                    out.push('[');
                    out.push_str(&body.replace('\\', "\\\\"));
                    out.push(']');
                    i = end;
                }
                None => out.push_str("\\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// Index of the `]` closing the class opened at `start`, if any.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    (j..chars.len()).find(|&k| chars[k] == ']')
}
