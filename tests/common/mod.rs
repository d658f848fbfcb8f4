//! Shared fixtures: build Maven-2 repository layouts in temp directories.

#![allow(dead_code)]

use sha1::Digest;
use std::fs;
use std::path::{Path, PathBuf};

/// Hex SHA-1 of some bytes, as published in `.sha1` sidecars.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = sha1::Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Directory of a coordinate inside a repository root.
pub fn artifact_dir(root: &Path, group: &str, name: &str, version: &str) -> PathBuf {
    root.join(group.replace('.', "/")).join(name).join(version)
}

/// Write a file together with its `.sha1` sidecar.
pub fn publish_file(dir: &Path, file_name: &str, bytes: &[u8]) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(file_name), bytes).unwrap();
    fs::write(dir.join(format!("{file_name}.sha1")), sha1_hex(bytes)).unwrap();
}

/// A minimal descriptor with optional `(group, name, version, scope)`
/// dependencies.
pub fn pom_xml(
    group: &str,
    name: &str,
    version: &str,
    deps: &[(&str, &str, &str, Option<&str>)],
) -> String {
    let mut xml = format!(
        "<project>\n  <groupId>{group}</groupId>\n  <artifactId>{name}</artifactId>\n  <version>{version}</version>\n"
    );
    if !deps.is_empty() {
        xml.push_str("  <dependencies>\n");
        for (dep_group, dep_name, dep_version, scope) in deps {
            xml.push_str(&format!(
                "    <dependency>\n      <groupId>{dep_group}</groupId>\n      <artifactId>{dep_name}</artifactId>\n      <version>{dep_version}</version>\n"
            ));
            if let Some(scope) = scope {
                xml.push_str(&format!("      <scope>{scope}</scope>\n"));
            }
            xml.push_str("    </dependency>\n");
        }
        xml.push_str("  </dependencies>\n");
    }
    xml.push_str("</project>\n");
    xml
}

/// Publish a release artifact: descriptor, jar, and sidecars.
pub fn publish_artifact(
    root: &Path,
    group: &str,
    name: &str,
    version: &str,
    jar_bytes: &[u8],
    deps: &[(&str, &str, &str, Option<&str>)],
) {
    let dir = artifact_dir(root, group, name, version);
    publish_file(&dir, &format!("{name}-{version}.pom"), pom_xml(group, name, version, deps).as_bytes());
    publish_file(&dir, &format!("{name}-{version}.jar"), jar_bytes);
}

/// Publish a non-unique snapshot: the jar lives under the `-SNAPSHOT`
/// name and no metadata is written.
pub fn publish_non_unique_snapshot(
    root: &Path,
    group: &str,
    name: &str,
    version: &str,
    jar_bytes: &[u8],
) {
    assert!(version.ends_with("-SNAPSHOT"));
    let dir = artifact_dir(root, group, name, version);
    publish_file(&dir, &format!("{name}-{version}.pom"), pom_xml(group, name, version, &[]).as_bytes());
    publish_file(&dir, &format!("{name}-{version}.jar"), jar_bytes);
}

/// Publish one unique (timestamped) snapshot build. Metadata is written
/// only when `latest` is true, pointing at this build.
pub fn publish_unique_snapshot(
    root: &Path,
    group: &str,
    name: &str,
    version: &str,
    timestamp: &str,
    build_number: u32,
    jar_bytes: &[u8],
    latest: bool,
) {
    assert!(version.ends_with("-SNAPSHOT"));
    let dir = artifact_dir(root, group, name, version);
    let base = version.trim_end_matches("-SNAPSHOT");
    let concrete = format!("{base}-{timestamp}-{build_number}");
    publish_file(&dir, &format!("{name}-{concrete}.pom"), pom_xml(group, name, version, &[]).as_bytes());
    // The descriptor is also looked up under the base version.
    publish_file(&dir, &format!("{name}-{version}.pom"), pom_xml(group, name, version, &[]).as_bytes());
    publish_file(&dir, &format!("{name}-{concrete}.jar"), jar_bytes);
    if latest {
        let metadata = format!(
            "<metadata>\n  <groupId>{group}</groupId>\n  <artifactId>{name}</artifactId>\n  <version>{version}</version>\n  <versioning>\n    <snapshot>\n      <timestamp>{timestamp}</timestamp>\n      <buildNumber>{build_number}</buildNumber>\n    </snapshot>\n  </versioning>\n</metadata>\n"
        );
        publish_file(&dir, "maven-metadata.xml", metadata.as_bytes());
    }
}

/// Read the artifact bytes of every node in the graph, sorted, for
/// content-based assertions.
pub fn artifact_contents(artifacts: &[kiln::resolver::ArtifactPath]) -> Vec<String> {
    let mut contents: Vec<String> = artifacts
        .iter()
        .map(|artifact| String::from_utf8_lossy(&artifact.data().unwrap()).into_owned())
        .collect();
    contents.sort();
    contents
}
