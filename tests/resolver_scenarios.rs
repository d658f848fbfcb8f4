//! End-to-end resolver scenarios against `file://` repositories built in
//! temp directories: release stability, transitive resolution, snapshot
//! recheck semantics, unique snapshot pinning, scope filtering,
//! mediation, checksums, and the authoritative cutoff.

use kiln::core::KilnError;
use kiln::resolver::{
    resolve_dependencies, ChecksumPolicy, Dependency, DependencyExclusion, DependencyId, Fetcher,
    Repository, SnapshotRecheck,
};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

mod common;
use common::{artifact_contents, publish_artifact, publish_file, publish_non_unique_snapshot, publish_unique_snapshot};

fn file_repo(name: &str, upstream: &Path, cache: &Path) -> Repository {
    Repository::remote(name, format!("file://{}", upstream.display()))
        .with_cache(Repository::local(format!("{name}-cache"), cache))
}

fn online() -> Fetcher {
    Fetcher::new(false).unwrap()
}

#[test]
fn test_release_stability_and_offline_cache() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("r1");
    let cache = temp.path().join("cache");
    publish_artifact(&upstream, "some-group", "some-artifact", "1.0", b"v1.0", &[]);

    let repository = file_repo("r1", &upstream, &cache);
    let roots = [Dependency::new(DependencyId::new(
        "some-group",
        "some-artifact",
        "1.0",
    ))];

    let graph = resolve_dependencies(&roots, &[repository.clone()], None, &online());
    assert!(graph.complete);
    let artifacts = graph.artifacts().unwrap();
    assert_eq!(artifact_contents(&artifacts), vec!["v1.0"]);
    assert!(!artifacts[0].from_cache);

    // The upstream disappears; offline resolution still answers from the
    // cache written through on the first pass.
    fs::remove_dir_all(&upstream).unwrap();
    let offline = Fetcher::new(true).unwrap();
    let graph = resolve_dependencies(&roots, &[repository], None, &offline);
    assert!(graph.complete);
    let artifacts = graph.artifacts().unwrap();
    assert_eq!(artifact_contents(&artifacts), vec!["v1.0"]);
    assert!(artifacts[0].from_cache);
}

#[test]
fn test_transitive_dependency_resolved() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("r2");
    let cache = temp.path().join("cache");
    publish_artifact(
        &upstream,
        "some-group",
        "some-artifact",
        "1.1",
        b"v1.1",
        &[("some-group", "some-core", "1.0", None)],
    );
    publish_artifact(&upstream, "some-group", "some-core", "1.0", b"v1.0", &[]);

    let graph = resolve_dependencies(
        &[Dependency::new(DependencyId::new(
            "some-group",
            "some-artifact",
            "1.1",
        ))],
        &[file_repo("r2", &upstream, &cache)],
        None,
        &online(),
    );
    assert!(graph.complete);
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["v1.0", "v1.1"]
    );
}

#[test]
fn test_non_unique_snapshot_recheck_interval() {
    let temp = TempDir::new().unwrap();
    let first_upstream = temp.path().join("r3");
    let second_upstream = temp.path().join("r3-prime");
    let cache = temp.path().join("cache");
    publish_non_unique_snapshot(
        &first_upstream,
        "some-group",
        "snapshot-artifact",
        "1.0-SNAPSHOT",
        b"v1.0-SNAPSHOT-1",
    );
    publish_non_unique_snapshot(
        &second_upstream,
        "some-group",
        "snapshot-artifact",
        "1.0-SNAPSHOT",
        b"v1.0-SNAPSHOT-2",
    );

    let daily = SnapshotRecheck::Interval(Duration::from_secs(24 * 60 * 60));
    let roots = [Dependency::new(DependencyId::new(
        "some-group",
        "snapshot-artifact",
        "1.0-SNAPSHOT",
    ))];

    // Warm the cache from the first upstream.
    let first = file_repo("r3", &first_upstream, &cache).with_snapshot_recheck(daily);
    let graph = resolve_dependencies(&roots, &[first], None, &online());
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["v1.0-SNAPSHOT-1"]
    );

    // A fresh cache within the daily recheck window is authoritative
    // even though the second upstream has newer content.
    let second_daily = file_repo("r3-prime", &second_upstream, &cache).with_snapshot_recheck(daily);
    let graph = resolve_dependencies(&roots, &[second_daily], None, &online());
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["v1.0-SNAPSHOT-1"]
    );

    // Recheck interval zero refetches and observes the new content.
    let second_always =
        file_repo("r3-prime", &second_upstream, &cache).with_snapshot_recheck(SnapshotRecheck::Always);
    let graph = resolve_dependencies(&roots, &[second_always], None, &online());
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["v1.0-SNAPSHOT-2"]
    );
}

#[test]
fn test_unique_snapshot_metadata_and_override() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("r4");
    publish_unique_snapshot(
        &upstream,
        "some-group",
        "unique-artifact",
        "2.0-SNAPSHOT",
        "20190101.123456",
        1,
        b"v2.0-SNAPSHOT-1",
        false,
    );
    publish_unique_snapshot(
        &upstream,
        "some-group",
        "unique-artifact",
        "2.0-SNAPSHOT",
        "20190101.123456",
        2,
        b"v2.0-SNAPSHOT-2",
        true,
    );

    // Published metadata pins the newest build.
    let cache = temp.path().join("cache-latest");
    let graph = resolve_dependencies(
        &[Dependency::new(DependencyId::new(
            "some-group",
            "unique-artifact",
            "2.0-SNAPSHOT",
        ))],
        &[file_repo("r4", &upstream, &cache)],
        None,
        &online(),
    );
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["v2.0-SNAPSHOT-2"]
    );

    // A snapshot-version override is used verbatim and wins over the
    // metadata pin.
    let cache = temp.path().join("cache-pinned");
    let graph = resolve_dependencies(
        &[Dependency::new(
            DependencyId::new("some-group", "unique-artifact", "2.0-SNAPSHOT")
                .with_snapshot_version("20190101.123456-1"),
        )],
        &[file_repo("r4", &upstream, &cache)],
        None,
        &online(),
    );
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["v2.0-SNAPSHOT-1"]
    );
}

#[test]
fn test_test_scoped_transitives_do_not_propagate() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("r5");
    let cache = temp.path().join("cache");
    publish_artifact(
        &upstream,
        "org.jline",
        "jline-terminal-jansi",
        "3.3.0",
        b"jline-terminal-jansi-3.3.0.jar",
        &[("test.lib", "testing-jar", "1.0", Some("test"))],
    );
    publish_artifact(&upstream, "test.lib", "testing-jar", "1.0", b"testing", &[]);

    let graph = resolve_dependencies(
        &[Dependency::new(DependencyId::new(
            "org.jline",
            "jline-terminal-jansi",
            "3.3.0",
        ))],
        &[file_repo("r5", &upstream, &cache)],
        None,
        &online(),
    );
    assert!(graph.complete);
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["jline-terminal-jansi-3.3.0.jar"]
    );
    assert_eq!(graph.nodes().count(), 1, "the test-scoped edge is pruned");
}

#[test]
fn test_mediation_nearest_wins_then_declaration_order() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("repo");
    let cache = temp.path().join("cache");
    publish_artifact(
        &upstream,
        "g",
        "app",
        "1.0",
        b"app",
        &[("g", "disputed", "2.0", None)],
    );
    publish_artifact(&upstream, "g", "disputed", "1.0", b"disputed-1.0", &[]);
    publish_artifact(&upstream, "g", "disputed", "2.0", b"disputed-2.0", &[]);

    // The root declaration of disputed:1.0 is nearer than app's
    // transitive disputed:2.0 and wins despite being declared second.
    let graph = resolve_dependencies(
        &[
            Dependency::new(DependencyId::new("g", "app", "1.0")),
            Dependency::new(DependencyId::new("g", "disputed", "1.0")),
        ],
        &[file_repo("repo", &upstream, &cache)],
        None,
        &online(),
    );
    assert!(graph.complete);
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["app", "disputed-1.0"]
    );
    assert_eq!(graph.overridden.len(), 1);
    let (loser, winner) = &graph.overridden[0];
    assert_eq!(loser.version, "2.0");
    assert_eq!(winner.version, "1.0");
}

#[test]
fn test_checksum_mismatch_policies() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("repo");
    publish_artifact(&upstream, "g", "corrupt", "1.0", b"real bytes", &[]);
    // Corrupt the published jar checksum.
    let dir = common::artifact_dir(&upstream, "g", "corrupt", "1.0");
    fs::write(dir.join("corrupt-1.0.jar.sha1"), "0".repeat(40)).unwrap();

    let roots = [Dependency::new(DependencyId::new("g", "corrupt", "1.0"))];

    let cache = temp.path().join("cache-fail");
    let failing = file_repo("repo", &upstream, &cache).with_checksum_policy(ChecksumPolicy::Fail);
    let graph = resolve_dependencies(&roots, &[failing], None, &online());
    assert!(!graph.complete);
    let error = graph.artifacts().unwrap_err();
    assert!(matches!(
        error.downcast_ref::<KilnError>(),
        Some(KilnError::ResolutionIncomplete { .. })
    ));
    assert!(graph.failure_tree().contains("g:corrupt:1.0"));

    // Warn tolerates the mismatch; ignore skips verification.
    for policy in [ChecksumPolicy::Warn, ChecksumPolicy::Ignore] {
        let cache = temp.path().join(format!("cache-{policy:?}"));
        let tolerant = file_repo("repo", &upstream, &cache).with_checksum_policy(policy);
        let graph = resolve_dependencies(&roots, &[tolerant], None, &online());
        assert!(graph.complete, "{policy:?} should tolerate the mismatch");
    }
}

#[test]
fn test_authoritative_repository_stops_the_chain() {
    let temp = TempDir::new().unwrap();
    let empty_upstream = temp.path().join("empty");
    let full_upstream = temp.path().join("full");
    fs::create_dir_all(&empty_upstream).unwrap();
    publish_artifact(&full_upstream, "g", "thing", "1.0", b"thing", &[]);

    let roots = [Dependency::new(DependencyId::new("g", "thing", "1.0"))];

    let cache_a = temp.path().join("cache-a");
    let cache_b = temp.path().join("cache-b");
    let authoritative =
        file_repo("gate", &empty_upstream, &cache_a).with_authoritative(true);
    let fallback = file_repo("full", &full_upstream, &cache_b);

    let graph = resolve_dependencies(
        &roots,
        &[authoritative.clone(), fallback.clone()],
        None,
        &online(),
    );
    assert!(!graph.complete, "the authoritative miss is definitive");
    assert!(graph.failure_tree().contains("authoritative"));

    // Without the flag the chain falls through to the second repository.
    let graph = resolve_dependencies(
        &roots,
        &[authoritative.with_authoritative(false), fallback],
        None,
        &online(),
    );
    assert!(graph.complete);
}

#[test]
fn test_exclusions_prune_transitive_subtrees() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("repo");
    let cache = temp.path().join("cache");
    publish_artifact(
        &upstream,
        "g",
        "lib",
        "1.0",
        b"lib",
        &[("g", "unwanted", "1.0", None)],
    );
    publish_artifact(&upstream, "g", "unwanted", "1.0", b"unwanted", &[]);

    let dependency = Dependency::new(DependencyId::new("g", "lib", "1.0"))
        .with_exclusions(vec![DependencyExclusion::of("g", "unwanted")]);
    let graph = resolve_dependencies(
        &[dependency],
        &[file_repo("repo", &upstream, &cache)],
        None,
        &online(),
    );
    assert!(graph.complete);
    assert_eq!(artifact_contents(&graph.artifacts().unwrap()), vec!["lib"]);
}

#[test]
fn test_id_mapper_fetches_variant_artifacts() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("repo");
    let cache = temp.path().join("cache");
    publish_artifact(&upstream, "g", "lib", "1.0", b"main", &[]);
    let dir = common::artifact_dir(&upstream, "g", "lib", "1.0");
    publish_file(&dir, "lib-1.0-sources.jar", b"sources");

    let mapper = |id: &DependencyId| id.clone().with_classifier("sources");
    let graph = resolve_dependencies(
        &[Dependency::new(DependencyId::new("g", "lib", "1.0"))],
        &[file_repo("repo", &upstream, &cache)],
        Some(&mapper),
        &online(),
    );
    assert!(graph.complete);
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["sources"]
    );
}

#[test]
fn test_single_endpoint_version_range_resolves() {
    let temp = TempDir::new().unwrap();
    let upstream = temp.path().join("repo");
    let cache = temp.path().join("cache");
    publish_artifact(&upstream, "g", "pinned", "1.0", b"pinned", &[]);

    let graph = resolve_dependencies(
        &[Dependency::new(DependencyId::new("g", "pinned", "[1.0]"))],
        &[file_repo("repo", &upstream, &cache)],
        None,
        &online(),
    );
    assert!(graph.complete);
    assert_eq!(
        artifact_contents(&graph.artifacts().unwrap()),
        vec!["pinned"]
    );
}
