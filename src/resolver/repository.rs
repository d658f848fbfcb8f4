//! Repository model and chain construction.
//!
//! A repository is addressed by URL. `file:` repositories without a cache
//! are *local*; remote repositories may carry a cache repository acting as
//! a local mirror: fetched artifacts are written into the cache and
//! answered from it on subsequent requests, subject to the snapshot
//! recheck interval.

use crate::constants;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do when a fetched file's checksum sidecar disagrees.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChecksumPolicy {
    /// Reject the file and record an error on the node
    Fail,
    /// Accept the file with a logged warning
    Warn,
    /// Skip verification entirely
    Ignore,
}

/// How long cached snapshot metadata stays fresh.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SnapshotRecheck {
    /// Always refetch metadata (interval zero)
    Always,
    /// Never refetch after first success
    Never,
    /// Refetch when the cached file is older than the interval
    Interval(Duration),
}

impl SnapshotRecheck {
    /// Whether a cached metadata file of the given age is stale.
    pub fn is_stale(self, age: Duration) -> bool {
        match self {
            SnapshotRecheck::Always => true,
            SnapshotRecheck::Never => false,
            SnapshotRecheck::Interval(interval) => age > interval,
        }
    }
}

/// One artifact repository.
#[derive(Clone, Debug)]
pub struct Repository {
    /// Short name used in logs and failure trees
    pub name: String,
    /// Base URL, `https:` or `file:`, trailing slash optional
    pub url: String,
    /// Local mirror written through on remote fetches
    pub cache: Option<Box<Repository>>,
    /// Checksum handling for fetched files
    pub checksum_policy: ChecksumPolicy,
    /// Snapshot metadata freshness
    pub snapshot_recheck: SnapshotRecheck,
    /// A definitive miss here stops the chain
    pub authoritative: bool,
}

impl Repository {
    /// A remote repository with the default policies and no cache.
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: normalize_url(url.into()),
            cache: None,
            checksum_policy: ChecksumPolicy::Fail,
            snapshot_recheck: SnapshotRecheck::Interval(constants::DEFAULT_SNAPSHOT_RECHECK),
            authoritative: false,
        }
    }

    /// A `file:` repository over a local directory.
    pub fn local(name: impl Into<String>, root: &Path) -> Self {
        Self {
            name: name.into(),
            url: normalize_url(format!("file://{}", root.display())),
            cache: None,
            checksum_policy: ChecksumPolicy::Warn,
            snapshot_recheck: SnapshotRecheck::Always,
            authoritative: false,
        }
    }

    /// Maven Central mirrored through a local cache directory.
    pub fn maven_central(cache_dir: &Path) -> Self {
        Self::remote("central", constants::MAVEN_CENTRAL_URL)
            .with_cache(Repository::local("central-cache", cache_dir))
    }

    /// The default local repository directory, `~/.m2/repository`.
    pub fn default_local_repository_dir() -> PathBuf {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        home.join(constants::LOCAL_REPOSITORY_DIR)
    }

    /// Attach a cache repository.
    #[must_use]
    pub fn with_cache(mut self, cache: Repository) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    /// Replace the checksum policy.
    #[must_use]
    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    /// Replace the snapshot recheck interval.
    #[must_use]
    pub fn with_snapshot_recheck(mut self, recheck: SnapshotRecheck) -> Self {
        self.snapshot_recheck = recheck;
        self
    }

    /// Mark the repository authoritative.
    #[must_use]
    pub fn with_authoritative(mut self, authoritative: bool) -> Self {
        self.authoritative = authoritative;
        self
    }

    /// Whether this is a local repository: `file:` scheme and no cache.
    pub fn is_local(&self) -> bool {
        self.url.starts_with("file:") && self.cache.is_none()
    }

    /// Filesystem root of a `file:` repository.
    pub fn file_root(&self) -> Option<PathBuf> {
        let rest = self.url.strip_prefix("file://").or_else(|| self.url.strip_prefix("file:"))?;
        Some(PathBuf::from(rest))
    }

    /// A file's URL under this repository.
    pub fn join(&self, relative: &str) -> String {
        format!("{}{}", self.url, relative)
    }
}

fn normalize_url(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

/// Order a repository list for resolution: local repositories precede
/// remote ones, duplicates (by URL) are coalesced keeping the first.
pub fn repository_chain(repositories: &[Repository]) -> Vec<Repository> {
    let mut seen = std::collections::HashSet::new();
    let mut locals = Vec::new();
    let mut remotes = Vec::new();
    for repository in repositories {
        if !seen.insert(repository.url.clone()) {
            continue;
        }
        if repository.is_local() {
            locals.push(repository.clone());
        } else {
            remotes.push(repository.clone());
        }
    }
    locals.extend(remotes);
    locals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_detection() {
        let local = Repository::local("here", Path::new("/tmp/repo"));
        assert!(local.is_local());
        assert_eq!(local.file_root(), Some(PathBuf::from("/tmp/repo")));

        let remote = Repository::remote("there", "https://example.com/maven2");
        assert!(!remote.is_local());

        // A file: repository with a cache is a mirror, not a local repo.
        let mirrored = Repository::remote("mirrored", "file:///srv/repo")
            .with_cache(Repository::local("c", Path::new("/tmp/c")));
        assert!(!mirrored.is_local());
    }

    #[test]
    fn test_join_normalizes_slash() {
        let repo = Repository::remote("r", "https://example.com/maven2");
        assert_eq!(repo.join("a/b.jar"), "https://example.com/maven2/a/b.jar");
    }

    #[test]
    fn test_chain_orders_locals_first_and_dedups() {
        let remote = Repository::remote("remote", "https://example.com/m2");
        let local = Repository::local("local", Path::new("/tmp/r"));
        let chain = repository_chain(&[remote.clone(), local.clone(), remote.clone()]);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name, "local");
        assert_eq!(chain[1].name, "remote");
    }

    #[test]
    fn test_recheck_staleness() {
        assert!(SnapshotRecheck::Always.is_stale(Duration::ZERO));
        assert!(!SnapshotRecheck::Never.is_stale(Duration::from_secs(u64::MAX / 2)));
        let daily = SnapshotRecheck::Interval(Duration::from_secs(86_400));
        assert!(!daily.is_stale(Duration::from_secs(60)));
        assert!(daily.is_stale(Duration::from_secs(100_000)));
    }
}
