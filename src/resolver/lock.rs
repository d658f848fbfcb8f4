//! Per-coordinate file locks for the local repository cache.
//!
//! Two parallel resolutions must not fetch the same artifact into the
//! cache at once: writers take an exclusive OS file lock keyed by the
//! artifact's relative path, readers take a shared lock only when
//! refreshing stale snapshot metadata. Locks live under a `.locks/`
//! directory beside the cached artifacts and are released on drop.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// An OS file lock for one artifact coordinate.
pub struct CoordinateLock {
    _file: File,
    path: PathBuf,
}

impl CoordinateLock {
    /// Acquire an exclusive (writer) lock, blocking until available.
    pub fn exclusive(cache_root: &Path, coordinate: &str) -> Result<Self> {
        let (file, path) = Self::open(cache_root, coordinate)?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock coordinate: {coordinate}"))?;
        Ok(Self { _file: file, path })
    }

    /// Acquire a shared (reader) lock, blocking until available.
    pub fn shared(cache_root: &Path, coordinate: &str) -> Result<Self> {
        let (file, path) = Self::open(cache_root, coordinate)?;
        file.lock_shared()
            .with_context(|| format!("Failed to lock coordinate: {coordinate}"))?;
        Ok(Self { _file: file, path })
    }

    fn open(cache_root: &Path, coordinate: &str) -> Result<(File, PathBuf)> {
        let locks_dir = cache_root.join(".locks");
        std::fs::create_dir_all(&locks_dir).with_context(|| {
            format!("Failed to create locks directory: {}", locks_dir.display())
        })?;

        let sanitized: String = coordinate
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        let lock_path = locks_dir.join(format!("{sanitized}.lock"));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        Ok((file, lock_path))
    }
}

impl Drop for CoordinateLock {
    fn drop(&mut self) {
        // The OS releases the lock when the handle closes; unlock
        // explicitly so waiters wake promptly.
        if let Err(e) = self._file.unlock() {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock =
            CoordinateLock::exclusive(temp_dir.path(), "org/example/widget/1.0/widget-1.0.jar")
                .unwrap();
        assert!(temp_dir.path().join(".locks").is_dir());
        drop(lock);
    }

    #[test]
    fn test_shared_locks_coexist() {
        let temp_dir = TempDir::new().unwrap();
        let a = CoordinateLock::shared(temp_dir.path(), "same").unwrap();
        let b = CoordinateLock::shared(temp_dir.path(), "same").unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn test_exclusive_blocks_second_locker() {
        use std::sync::{Arc, Barrier};
        use std::thread;
        use std::time::{Duration, Instant};

        let temp_dir = TempDir::new().unwrap();
        let root = Arc::new(temp_dir.path().to_path_buf());
        let barrier = Arc::new(Barrier::new(2));

        let root1 = root.clone();
        let barrier1 = barrier.clone();
        let holder = thread::spawn(move || {
            let _lock = CoordinateLock::exclusive(&root1, "contended").unwrap();
            barrier1.wait();
            thread::sleep(Duration::from_millis(100));
        });

        let waiter = thread::spawn(move || {
            barrier.wait();
            let start = Instant::now();
            let _lock = CoordinateLock::exclusive(&root, "contended").unwrap();
            assert!(start.elapsed() >= Duration::from_millis(50));
        });

        holder.join().unwrap();
        waiter.join().unwrap();
    }
}
