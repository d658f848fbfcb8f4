//! Artifact fetching with checksum validation and cache write-through.
//!
//! The fetcher retrieves repository files either from `file:` roots or
//! over HTTP with a blocking client and per-request deadline. Remote
//! repositories with a cache repository are mirrored: a successful fetch
//! is written through into the cache under an exclusive per-coordinate
//! lock, and later requests are answered from the cache. Snapshot
//! metadata freshness is governed by the repository's recheck interval.
//!
//! In offline mode remote fetches are disabled entirely; only cache and
//! local-repository content is consulted, and a miss is definitive.

use crate::constants;
use crate::core::KilnError;
use crate::resolver::lock::CoordinateLock;
use crate::resolver::repository::{ChecksumPolicy, Repository};
use crate::utils::fs::atomic_write;
use anyhow::{anyhow, Context, Result};
use sha1::Digest;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Checksum sidecar extensions in preference order.
const CHECKSUM_KINDS: [&str; 3] = ["sha1", "sha256", "md5"];

/// How a cached copy may satisfy a fetch.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Freshness {
    /// Any cached copy is acceptable (release artifacts never change)
    Any,
    /// Subject to the repository's snapshot recheck interval
    SnapshotMetadata,
}

/// A file successfully obtained from a repository.
#[derive(Clone, Debug)]
pub struct FetchedFile {
    /// Local path of the file
    pub path: PathBuf,
    /// URL the file corresponds to
    pub url: String,
    /// Whether the file was answered from a cache
    pub from_cache: bool,
    /// Name of the providing repository
    pub repository: String,
}

impl FetchedFile {
    /// Read the file's bytes.
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("Failed to read fetched file: {}", self.path.display()))
    }
}

/// Result of asking one repository for one file.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The repository provided the file
    Found(FetchedFile),
    /// The repository definitively does not have the file
    NotFound,
    /// The attempt failed (transport, checksum); try the next repository
    /// but record the reason
    Error(anyhow::Error),
}

/// Retrieves files from repositories, synchronously.
pub struct Fetcher {
    client: Option<reqwest::blocking::Client>,
    offline: bool,
}

impl Fetcher {
    /// Build a fetcher. In offline mode no HTTP client is constructed and
    /// remote repositories answer only from their caches.
    pub fn new(offline: bool) -> Result<Self> {
        let client = if offline {
            None
        } else {
            Some(
                reqwest::blocking::Client::builder()
                    .timeout(constants::HTTP_TIMEOUT)
                    .user_agent(constants::USER_AGENT)
                    .build()
                    .context("Failed to build HTTP client")?,
            )
        };
        Ok(Self { client, offline })
    }

    /// Whether remote fetches are disabled.
    pub fn offline(&self) -> bool {
        self.offline
    }

    /// Ask `repository` for the file at `relative` (repository layout
    /// path, `/`-separated).
    pub fn fetch(&self, repository: &Repository, relative: &str, freshness: Freshness) -> FetchOutcome {
        if repository.is_local() {
            return self.fetch_local(repository, relative);
        }
        self.fetch_remote(repository, relative, freshness)
    }

    fn fetch_local(&self, repository: &Repository, relative: &str) -> FetchOutcome {
        let Some(root) = repository.file_root() else {
            return FetchOutcome::Error(anyhow!(
                "repository '{}' has no usable file root",
                repository.name
            ));
        };
        let path = root.join(relative);
        if path.is_file() {
            debug!(repository = %repository.name, %relative, "found in local repository");
            FetchOutcome::Found(FetchedFile {
                path,
                url: repository.join(relative),
                from_cache: false,
                repository: repository.name.clone(),
            })
        } else {
            FetchOutcome::NotFound
        }
    }

    fn fetch_remote(
        &self,
        repository: &Repository,
        relative: &str,
        freshness: Freshness,
    ) -> FetchOutcome {
        let cache_root = repository
            .cache
            .as_ref()
            .and_then(|cache| cache.file_root());

        // Cached copy first.
        if let Some(root) = &cache_root {
            let cached = root.join(relative);
            if cached.is_file() {
                let stale = match freshness {
                    Freshness::Any => false,
                    Freshness::SnapshotMetadata => {
                        repository.snapshot_recheck.is_stale(file_age(&cached))
                    }
                };
                if !stale || self.offline {
                    debug!(repository = %repository.name, %relative, "answered from cache");
                    return FetchOutcome::Found(FetchedFile {
                        path: cached,
                        url: repository.join(relative),
                        from_cache: true,
                        repository: repository.name.clone(),
                    });
                }
                // Refreshing stale metadata: hold a shared lock while the
                // upstream is consulted so writers do not race the read.
                let _reader = CoordinateLock::shared(root, relative).ok();
                match self.download(repository, relative, &cache_root) {
                    FetchOutcome::NotFound | FetchOutcome::Error(_) => {
                        warn!(
                            repository = %repository.name,
                            %relative,
                            "metadata refresh failed, keeping stale cached copy"
                        );
                        return FetchOutcome::Found(FetchedFile {
                            path: cached,
                            url: repository.join(relative),
                            from_cache: true,
                            repository: repository.name.clone(),
                        });
                    }
                    found => return found,
                }
            }
        }

        if self.offline {
            return FetchOutcome::NotFound;
        }
        self.download(repository, relative, &cache_root)
    }

    fn download(
        &self,
        repository: &Repository,
        relative: &str,
        cache_root: &Option<PathBuf>,
    ) -> FetchOutcome {
        let url = repository.join(relative);

        let bytes = match self.get(&url) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return FetchOutcome::NotFound,
            Err(error) => return FetchOutcome::Error(error),
        };

        if let Err(error) = self.verify_checksum(repository, relative, &bytes) {
            return FetchOutcome::Error(error);
        }

        let target = match cache_root {
            Some(root) => {
                let target = root.join(relative);
                let _writer = match CoordinateLock::exclusive(root, relative) {
                    Ok(lock) => Some(lock),
                    Err(error) => {
                        warn!(%relative, "could not lock cache coordinate: {error}");
                        None
                    }
                };
                if let Err(error) = atomic_write(&target, &bytes) {
                    return FetchOutcome::Error(error);
                }
                target
            }
            None => {
                // No cache repository configured: keep the bytes under a
                // process-shared scratch mirror so an ArtifactPath exists.
                let target = std::env::temp_dir().join("kiln-fetched").join(relative);
                if let Err(error) = atomic_write(&target, &bytes) {
                    return FetchOutcome::Error(error);
                }
                target
            }
        };

        debug!(repository = %repository.name, %url, "downloaded");
        FetchOutcome::Found(FetchedFile {
            path: target,
            url,
            from_cache: false,
            repository: repository.name.clone(),
        })
    }

    /// Retrieve a URL. `Ok(None)` is a definitive miss. `file:` URLs
    /// (mirrored filesystem repositories) read straight from disk;
    /// everything else goes through the HTTP client.
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        if let Some(rest) = url.strip_prefix("file://").or_else(|| url.strip_prefix("file:")) {
            let path = std::path::Path::new(rest);
            if !path.is_file() {
                return Ok(None);
            }
            return std::fs::read(path)
                .map(Some)
                .with_context(|| format!("Failed to read {url}"));
        }

        let Some(client) = &self.client else {
            return Ok(None);
        };
        let response = client.get(url).send().map_err(|e| KilnError::NetworkError {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(KilnError::NetworkError {
                url: url.to_string(),
                reason: format!("HTTP status {}", response.status()),
            }
            .into());
        }
        let bytes = response.bytes().map_err(|e| KilnError::NetworkError {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(bytes.to_vec()))
    }

    /// Fetch and compare the checksum sidecar, honoring the repository's
    /// policy. SHA-1 is preferred, then SHA-256 and MD5; a repository
    /// that publishes no sidecar at all is tolerated with a debug note.
    fn verify_checksum(&self, repository: &Repository, relative: &str, bytes: &[u8]) -> Result<()> {
        if repository.checksum_policy == ChecksumPolicy::Ignore {
            return Ok(());
        }

        for kind in CHECKSUM_KINDS {
            let sidecar_url = repository.join(&format!("{relative}.{kind}"));
            let sidecar = match self.get(&sidecar_url) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(error) => {
                    debug!(%sidecar_url, "checksum sidecar unavailable: {error}");
                    continue;
                }
            };
            let expected = match String::from_utf8_lossy(&sidecar).split_whitespace().next() {
                Some(token) => token.to_ascii_lowercase(),
                None => continue,
            };
            let actual = digest_hex(kind, bytes);
            if expected == actual {
                return Ok(());
            }
            match repository.checksum_policy {
                ChecksumPolicy::Fail => {
                    return Err(KilnError::ChecksumMismatch {
                        url: repository.join(relative),
                        expected,
                        actual,
                    }
                    .into())
                }
                ChecksumPolicy::Warn => {
                    warn!(
                        url = %repository.join(relative),
                        %expected,
                        %actual,
                        "checksum mismatch tolerated by policy"
                    );
                    return Ok(());
                }
                ChecksumPolicy::Ignore => return Ok(()),
            }
        }

        debug!(url = %repository.join(relative), "no checksum published");
        Ok(())
    }
}

/// Ask each repository in the chain for a file. The first repository to
/// answer wins; a definitive miss at an authoritative repository stops
/// the walk. Returns the file (if any) and one attempt line per
/// repository that failed to provide it.
pub(crate) fn fetch_through_chain(
    fetcher: &Fetcher,
    chain: &[Repository],
    relative: &str,
    freshness: Freshness,
) -> (Option<FetchedFile>, Vec<String>) {
    let mut attempts = Vec::new();
    for repository in chain {
        match fetcher.fetch(repository, relative, freshness) {
            FetchOutcome::Found(file) => return (Some(file), attempts),
            FetchOutcome::NotFound => {
                attempts.push(format!("{}: not found", repository.name));
                if repository.authoritative {
                    attempts.push(format!(
                        "{}: authoritative, later repositories not consulted",
                        repository.name
                    ));
                    break;
                }
            }
            FetchOutcome::Error(error) => {
                attempts.push(format!("{}: {error:#}", repository.name));
            }
        }
    }
    (None, attempts)
}

fn digest_hex(kind: &str, bytes: &[u8]) -> String {
    match kind {
        "sha1" => {
            let mut hasher = sha1::Sha1::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
        "sha256" => {
            let mut hasher = sha2::Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
        _ => {
            let mut hasher = md5::Md5::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
    }
}

fn file_age(path: &std::path::Path) -> Duration {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_digest_kinds() {
        // Known digests of the empty input.
        assert_eq!(digest_hex("sha1", b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            digest_hex("sha256", b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(digest_hex("md5", b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_local_fetch_hit_and_miss() {
        let dir = TempDir::new().unwrap();
        let repo_root = dir.path().join("repo");
        fs::create_dir_all(repo_root.join("g/a/1.0")).unwrap();
        fs::write(repo_root.join("g/a/1.0/a-1.0.jar"), b"bytes").unwrap();

        let repo = Repository::local("local", &repo_root);
        let fetcher = Fetcher::new(true).unwrap();

        match fetcher.fetch(&repo, "g/a/1.0/a-1.0.jar", Freshness::Any) {
            FetchOutcome::Found(file) => {
                assert!(!file.from_cache);
                assert_eq!(file.read().unwrap(), b"bytes");
            }
            other => panic!("expected Found, got {other:?}"),
        }
        assert!(matches!(
            fetcher.fetch(&repo, "g/a/1.0/missing.jar", Freshness::Any),
            FetchOutcome::NotFound
        ));
    }

    #[test]
    fn test_offline_remote_answers_only_from_cache() {
        let dir = TempDir::new().unwrap();
        let cache_root = dir.path().join("cache");
        fs::create_dir_all(cache_root.join("g/a/1.0")).unwrap();
        fs::write(cache_root.join("g/a/1.0/a-1.0.jar"), b"cached").unwrap();

        let repo = Repository::remote("central", "https://unreachable.invalid/m2")
            .with_cache(Repository::local("cache", &cache_root));
        let fetcher = Fetcher::new(true).unwrap();

        match fetcher.fetch(&repo, "g/a/1.0/a-1.0.jar", Freshness::Any) {
            FetchOutcome::Found(file) => assert!(file.from_cache),
            other => panic!("expected cache hit, got {other:?}"),
        }
        assert!(matches!(
            fetcher.fetch(&repo, "g/a/1.0/other.jar", Freshness::Any),
            FetchOutcome::NotFound
        ));
    }
}
