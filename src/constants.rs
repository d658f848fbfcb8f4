//! Global constants used throughout the kiln codebase.
//!
//! This module contains timeout durations, retry parameters, and other
//! numeric constants that are used across multiple modules. Defining
//! them centrally improves maintainability and makes magic numbers
//! more discoverable.

use std::time::Duration;

/// Connect + read timeout applied to every remote repository request.
///
/// Exceeding the deadline surfaces as a per-node resolver error, never
/// as a process abort.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent with remote repository requests.
pub const USER_AGENT: &str = concat!("kiln/", env!("CARGO_PKG_VERSION"));

/// Default snapshot recheck interval for remote repositories (24 hours).
///
/// Cached `maven-metadata.xml` older than this is considered stale and
/// refetched from the upstream. A zero interval means always refetch.
pub const DEFAULT_SNAPSHOT_RECHECK: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum depth of a parent-POM chain before resolution gives up.
///
/// Real projects stay in the single digits; the cap exists to turn a
/// cyclic parent reference into an error instead of a hang.
pub const MAX_POM_PARENT_DEPTH: usize = 64;

/// Maximum passes of `${...}` property interpolation over a POM.
///
/// Properties may reference other properties; the pass count caps
/// self-referential definitions.
pub const MAX_INTERPOLATION_PASSES: usize = 10;

/// Directory under the build directory holding internal intermediates.
///
/// Entries prefixed with [`CACHE_DELETABLE_PREFIX`] are safe to delete
/// on `clean`.
pub const BUILD_CACHE_DIR: &str = "cache";

/// Prefix marking a build-cache entry as deletable on `clean`.
pub const CACHE_DELETABLE_PREFIX: &str = "-";

/// Default local repository location relative to the home directory.
pub const LOCAL_REPOSITORY_DIR: &str = ".m2/repository";

/// URL of Maven Central, the default remote repository.
pub const MAVEN_CENTRAL_URL: &str = "https://repo.maven.apache.org/maven2/";

/// Environment variable holding a JVM debug port for launched processes.
///
/// When set to an integer, a JDWP agent argument listening on that port
/// is appended to the run options.
pub const RUN_DEBUG_PORT_ENV: &str = "KILN_RUN_DEBUG_PORT";
