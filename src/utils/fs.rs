//! Atomic file write operations using temp-and-rename strategy.
//!
//! Every user-visible output file (assembly archives, cache artifacts)
//! goes through [`atomic_write`] so readers never observe a partial file.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Create a directory and all of its parents if they do not exist yet.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Safely write a string to a file using atomic operations.
///
/// Convenience wrapper around [`atomic_write`] for text content.
pub fn safe_write(path: &Path, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

/// Atomically write bytes to a file using a write-then-rename strategy.
///
/// The content is written to a temporary file in the target directory,
/// synced, and renamed over the destination. The file either contains the
/// new content or the old content, never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp.write_all(content)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync temp file for {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("Failed to rename temp file to {}", path.display()))?;
    Ok(())
}

/// Last-modified time of a file in milliseconds since the Unix epoch.
///
/// Returns `None` when the file does not exist or the platform withholds
/// the timestamp. Fingerprints treat a missing mtime as "changed".
pub fn modified_ms(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as u64)
}
