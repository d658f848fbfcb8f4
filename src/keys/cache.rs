//! Evaluation caches for key bindings.
//!
//! A cached binding pairs a fingerprint function with a compute function.
//! Three instances cover the engine's needs:
//!
//! - [`constant`]: a fixed value regardless of scope;
//! - [`once`]: memoize on first call;
//! - [`cached_by`]: capture a dependency fingerprint per evaluation and
//!   answer from the store whenever the fingerprint matches any prior
//!   invocation that is still valid.
//!
//! File fingerprints record `(path, last-modified-ms)` only; content
//! hashes are deliberately not used on the invalidation hot path.
//! Collections fingerprint element-wise.
//!
//! A compute function can expire its own entry from within the binding:
//! [`Eval::expires_now`] drops the result immediately after returning it,
//! [`Eval::expires_with`] invalidates when a file's mtime changes, and
//! [`Eval::expires_when`] invalidates when a predicate turns true.
//!
//! Cache hits and misses surface to the installed listener as `feature`
//! events with the tags in [`crate::keys::listener`].
//!
//! [`Eval::expires_now`]: crate::keys::Eval::expires_now
//! [`Eval::expires_with`]: crate::keys::Eval::expires_with
//! [`Eval::expires_when`]: crate::keys::Eval::expires_when

use crate::keys::evaluator::Eval;
use crate::keys::key::KeyValue;
use crate::keys::listener::{FEATURE_CACHE_HIT, FEATURE_CACHE_MISS};
use crate::utils::fs::modified_ms;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A value's dependency fingerprint.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Fingerprint {
    /// Matches every prior invocation.
    Constant,
    /// An opaque text element.
    Text(String),
    /// A file identified by path and mtime. A missing mtime never equals
    /// a recorded one, so deleted files read as changed.
    File {
        /// Absolute or build-relative path
        path: PathBuf,
        /// Milliseconds since the Unix epoch, `None` when unreadable
        modified_ms: Option<u64>,
    },
    /// Element-wise combination, order significant.
    Many(Vec<Fingerprint>),
}

impl Fingerprint {
    /// Fingerprint a file by `(path, mtime)`.
    pub fn of_file(path: &Path) -> Self {
        Fingerprint::File {
            path: path.to_path_buf(),
            modified_ms: modified_ms(path),
        }
    }
}

/// Conversion into a [`Fingerprint`], implemented for the value shapes
/// bindings typically depend on.
pub trait ToFingerprint {
    /// Compute this value's fingerprint.
    fn to_fingerprint(&self) -> Fingerprint;
}

impl ToFingerprint for Fingerprint {
    fn to_fingerprint(&self) -> Fingerprint {
        self.clone()
    }
}

impl ToFingerprint for PathBuf {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::of_file(self)
    }
}

impl ToFingerprint for &Path {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::of_file(self)
    }
}

impl ToFingerprint for String {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::Text(self.clone())
    }
}

impl ToFingerprint for &str {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::Text((*self).to_string())
    }
}

impl ToFingerprint for bool {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::Text(self.to_string())
    }
}

impl<T: ToFingerprint> ToFingerprint for Vec<T> {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::Many(self.iter().map(ToFingerprint::to_fingerprint).collect())
    }
}

impl<T: ToFingerprint> ToFingerprint for Option<T> {
    fn to_fingerprint(&self) -> Fingerprint {
        match self {
            Some(value) => Fingerprint::Many(vec![value.to_fingerprint()]),
            None => Fingerprint::Many(Vec::new()),
        }
    }
}

impl<A: ToFingerprint, B: ToFingerprint> ToFingerprint for (A, B) {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::Many(vec![self.0.to_fingerprint(), self.1.to_fingerprint()])
    }
}

impl<A: ToFingerprint, B: ToFingerprint, C: ToFingerprint> ToFingerprint for (A, B, C) {
    fn to_fingerprint(&self) -> Fingerprint {
        Fingerprint::Many(vec![
            self.0.to_fingerprint(),
            self.1.to_fingerprint(),
            self.2.to_fingerprint(),
        ])
    }
}

/// Expiry request recorded by a compute function while it runs.
pub(crate) enum ExpirySignal {
    /// Do not store this result at all.
    Now,
    /// Invalidate the stored result when the file's mtime changes.
    WithPath(PathBuf),
    /// Invalidate the stored result when the predicate returns true.
    When(Arc<dyn Fn() -> bool + Send + Sync>),
}

/// Validity guard attached to a stored cache entry.
enum ExpiryGuard {
    WithPath {
        path: PathBuf,
        modified_ms: Option<u64>,
    },
    When(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl ExpiryGuard {
    fn still_valid(&self) -> bool {
        match self {
            ExpiryGuard::WithPath {
                path,
                modified_ms: recorded,
            } => modified_ms(path) == *recorded && recorded.is_some(),
            ExpiryGuard::When(predicate) => !predicate(),
        }
    }
}

struct CacheEntry<T> {
    fingerprint: Fingerprint,
    value: T,
    guards: Vec<ExpiryGuard>,
}

/// Binding producer returning a fixed value regardless of scope.
pub fn constant<T: KeyValue>(
    value: T,
) -> impl Fn(&mut Eval<'_>) -> Result<T> + Send + Sync + 'static {
    move |_| Ok(value.clone())
}

/// Binding producer that memoizes its compute function on first call.
pub fn once<T, C>(compute: C) -> impl Fn(&mut Eval<'_>) -> Result<T> + Send + Sync + 'static
where
    T: KeyValue,
    C: Fn(&mut Eval<'_>) -> Result<T> + Send + Sync + 'static,
{
    let store: Mutex<Option<T>> = Mutex::new(None);
    move |ev| {
        if let Some(value) = store.lock().expect("cache store poisoned").clone() {
            ev.feature(FEATURE_CACHE_HIT);
            return Ok(value);
        }
        ev.feature(FEATURE_CACHE_MISS);
        let value = compute(ev)?;
        *store.lock().expect("cache store poisoned") = Some(value.clone());
        Ok(value)
    }
}

/// Binding producer cached by an input fingerprint.
///
/// `inputs` computes the dependency fingerprint for the current
/// evaluation; `compute` produces the value. A stored result is returned
/// whenever the fingerprint matches any prior invocation whose expiry
/// guards still hold.
pub fn cached_by<T, I, F, C>(
    inputs: F,
    compute: C,
) -> impl Fn(&mut Eval<'_>) -> Result<T> + Send + Sync + 'static
where
    T: KeyValue,
    I: ToFingerprint,
    F: Fn(&mut Eval<'_>) -> Result<I> + Send + Sync + 'static,
    C: Fn(&mut Eval<'_>) -> Result<T> + Send + Sync + 'static,
{
    let store: Mutex<Vec<CacheEntry<T>>> = Mutex::new(Vec::new());
    move |ev| {
        let fingerprint = inputs(ev)?.to_fingerprint();

        {
            let mut entries = store.lock().expect("cache store poisoned");
            // Drop entries whose guards no longer hold before matching.
            entries.retain(|entry| entry.guards.iter().all(ExpiryGuard::still_valid));
            if let Some(entry) = entries.iter().find(|entry| entry.fingerprint == fingerprint) {
                let value = entry.value.clone();
                ev.feature(FEATURE_CACHE_HIT);
                return Ok(value);
            }
        }

        ev.feature(FEATURE_CACHE_MISS);
        let value = compute(ev)?;

        let mut expires_now = false;
        let mut guards = Vec::new();
        for signal in ev.take_expiry_signals() {
            match signal {
                ExpirySignal::Now => expires_now = true,
                ExpirySignal::WithPath(path) => guards.push(ExpiryGuard::WithPath {
                    modified_ms: modified_ms(&path),
                    path,
                }),
                ExpirySignal::When(predicate) => guards.push(ExpiryGuard::When(predicate)),
            }
        }

        if !expires_now {
            let mut entries = store.lock().expect("cache store poisoned");
            entries.retain(|entry| entry.fingerprint != fingerprint);
            entries.push(CacheEntry {
                fingerprint,
                value: value.clone(),
                guards,
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_fingerprint_changes_with_mtime() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("input.txt");
        fs::write(&file, "one").unwrap();
        let before = Fingerprint::of_file(&file);
        assert_eq!(before, Fingerprint::of_file(&file));

        // Force a different mtime; equality must break.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        let file_handle = fs::File::options().write(true).open(&file).unwrap();
        file_handle.set_modified(later).unwrap();
        assert_ne!(before, Fingerprint::of_file(&file));
    }

    #[test]
    fn test_missing_file_fingerprint() {
        let fp = Fingerprint::of_file(Path::new("/no/such/file"));
        assert_eq!(
            fp,
            Fingerprint::File {
                path: PathBuf::from("/no/such/file"),
                modified_ms: None
            }
        );
    }

    #[test]
    fn test_collection_fingerprints_element_wise() {
        let many = vec!["a".to_string(), "b".to_string()].to_fingerprint();
        assert_eq!(
            many,
            Fingerprint::Many(vec![
                Fingerprint::Text("a".to_string()),
                Fingerprint::Text("b".to_string())
            ])
        );
    }
}
