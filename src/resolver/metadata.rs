//! `maven-metadata.xml` reading for snapshot versions.
//!
//! A unique-snapshot repository publishes, per artifact directory, a
//! metadata file carrying a `<snapshot>` timestamp/build-number pair and
//! optionally a `<snapshotVersions>` list with per-classifier concrete
//! values. When no metadata is published the non-unique filename
//! `...-SNAPSHOT.ext` is used instead.

use crate::resolver::coordinate::SNAPSHOT_SUFFIX;
use anyhow::Result;

/// Per-classifier concrete version entry from `<snapshotVersions>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotVersionEntry {
    /// Classifier the entry applies to, empty for the main artifact
    pub classifier: String,
    /// File extension the entry applies to
    pub extension: String,
    /// Concrete timestamped version, e.g. `2.0-20190101.123456-1`
    pub value: String,
}

/// Parsed snapshot portion of an artifact directory's metadata.
#[derive(Clone, Debug, Default)]
pub struct SnapshotMetadata {
    /// `<snapshot><timestamp>` value
    pub timestamp: Option<String>,
    /// `<snapshot><buildNumber>` value
    pub build_number: Option<String>,
    /// `<snapshotVersions>` entries
    pub snapshot_versions: Vec<SnapshotVersionEntry>,
}

impl SnapshotMetadata {
    /// The concrete version to use for an artifact file, or `None` when
    /// the metadata pins nothing (non-unique snapshots).
    pub fn concrete_version(
        &self,
        base_version: &str,
        classifier: &str,
        extension: &str,
    ) -> Option<String> {
        if let Some(entry) = self
            .snapshot_versions
            .iter()
            .find(|e| e.classifier == classifier && e.extension == extension)
        {
            return Some(entry.value.clone());
        }
        match (&self.timestamp, &self.build_number) {
            (Some(timestamp), Some(build_number)) => Some(format!(
                "{}-{}-{}",
                base_version.trim_end_matches(SNAPSHOT_SUFFIX),
                timestamp,
                build_number
            )),
            _ => None,
        }
    }
}

/// Parse a `maven-metadata.xml` document.
pub fn parse_metadata(text: &str) -> Result<SnapshotMetadata> {
    let document = roxmltree::Document::parse(text)?;
    let mut metadata = SnapshotMetadata::default();

    for node in document.descendants().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "snapshot" => {
                for field in node.children().filter(|n| n.is_element()) {
                    let value = field.text().map(str::trim).unwrap_or_default().to_string();
                    match field.tag_name().name() {
                        "timestamp" => metadata.timestamp = Some(value),
                        "buildNumber" => metadata.build_number = Some(value),
                        _ => {}
                    }
                }
            }
            "snapshotVersion" => {
                let mut entry = SnapshotVersionEntry {
                    classifier: String::new(),
                    extension: String::new(),
                    value: String::new(),
                };
                for field in node.children().filter(|n| n.is_element()) {
                    let value = field.text().map(str::trim).unwrap_or_default().to_string();
                    match field.tag_name().name() {
                        "classifier" => entry.classifier = value,
                        "extension" => entry.extension = value,
                        "value" => entry.value = value,
                        _ => {}
                    }
                }
                if !entry.value.is_empty() {
                    metadata.snapshot_versions.push(entry);
                }
            }
            _ => {}
        }
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIQUE: &str = r#"<metadata>
        <groupId>org.example</groupId>
        <artifactId>widget</artifactId>
        <version>2.0-SNAPSHOT</version>
        <versioning>
            <snapshot>
                <timestamp>20190101.123456</timestamp>
                <buildNumber>2</buildNumber>
            </snapshot>
            <snapshotVersions>
                <snapshotVersion>
                    <extension>jar</extension>
                    <value>2.0-20190101.123456-2</value>
                </snapshotVersion>
                <snapshotVersion>
                    <classifier>sources</classifier>
                    <extension>jar</extension>
                    <value>2.0-20190101.123456-1</value>
                </snapshotVersion>
            </snapshotVersions>
        </versioning>
    </metadata>"#;

    #[test]
    fn test_unique_snapshot_concrete_version() {
        let metadata = parse_metadata(UNIQUE).unwrap();
        assert_eq!(
            metadata.concrete_version("2.0-SNAPSHOT", "", "jar"),
            Some("2.0-20190101.123456-2".to_string())
        );
        assert_eq!(
            metadata.concrete_version("2.0-SNAPSHOT", "sources", "jar"),
            Some("2.0-20190101.123456-1".to_string())
        );
    }

    #[test]
    fn test_timestamp_fallback_without_entries() {
        let metadata = parse_metadata(
            r#"<metadata><versioning><snapshot>
                <timestamp>20200202.000000</timestamp>
                <buildNumber>7</buildNumber>
            </snapshot></versioning></metadata>"#,
        )
        .unwrap();
        assert_eq!(
            metadata.concrete_version("1.0-SNAPSHOT", "", "jar"),
            Some("1.0-20200202.000000-7".to_string())
        );
    }

    #[test]
    fn test_non_unique_metadata_pins_nothing() {
        let metadata = parse_metadata("<metadata><versioning/></metadata>").unwrap();
        assert_eq!(metadata.concrete_version("1.0-SNAPSHOT", "", "jar"), None);
    }
}
