//! Sync checkpoint persistence.
//!
//! The only mutation ever made to `upstreams.json` is advancing one
//! upstream's `lastSyncedCommit`. The document is rewritten through a
//! temporary file in the same directory and renamed over the original, so a
//! crash leaves either the old or the new file, never a partial one.

use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::{clog, clog_debug};

/// Set `lastSyncedCommit` of upstream `name` to `commit`.
///
/// Returns `Ok(false)` without touching the file when no upstream has that
/// name. Other keys keep their order; output is two-space indented JSON
/// followed by one newline. Permission bits (and ownership, where allowed)
/// of the original file carry over.
pub fn update_synced_commit(config_path: &Path, name: &str, commit: &str) -> Result<bool> {
    clog_debug!(
        "update_synced_commit path={} upstream={} commit={}",
        config_path.display(),
        name,
        commit
    );
    let text = std::fs::read_to_string(config_path)?;
    let mut document: serde_json::Value = serde_json::from_str(&text)?;
    let metadata = std::fs::metadata(config_path)?;

    let entry = document
        .get_mut("upstreams")
        .and_then(|u| u.as_array_mut())
        .and_then(|list| {
            list.iter_mut()
                .find(|u| u.get("name").and_then(|n| n.as_str()) == Some(name))
        });
    let Some(entry) = entry.and_then(|e| e.as_object_mut()) else {
        clog_debug!("Upstream {} not in {}; nothing to update", name, config_path.display());
        return Ok(false);
    };
    entry.insert(
        "lastSyncedCommit".to_string(),
        serde_json::Value::String(commit.to_string()),
    );

    let parent = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new().suffix(".tmp").tempfile_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, &document)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;

    std::fs::set_permissions(tmp.path(), metadata.permissions())?;
    preserve_owner(tmp.path(), &metadata)?;

    // Dropping `tmp` on any error above removes the temporary file.
    tmp.persist(config_path).map_err(|e| Error::Io(e.error))?;
    clog!("Checkpoint for {} advanced to {}", name, commit);
    Ok(true)
}

#[cfg(unix)]
fn preserve_owner(path: &Path, metadata: &std::fs::Metadata) -> Result<()> {
    use std::os::unix::fs::MetadataExt;
    match std::os::unix::fs::chown(path, Some(metadata.uid()), Some(metadata.gid())) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            clog_debug!("chown not permitted for {}; keeping default owner", path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn preserve_owner(_path: &Path, _metadata: &std::fs::Metadata) -> Result<()> {
    Ok(())
}
