//! Assembly: flatten classpath entries into a single archive.
//!
//! Inputs are ordered classpath entries (directory trees, archives to
//! descend into, or whole files) tagged with `own` (the project's output
//! rather than a library). Candidates are renamed, grouped by final
//! archive path, and conflicts are resolved deterministically:
//!
//! - groups whose candidates carry identical bytes collapse silently;
//! - an `own` candidate always wins a tie against non-`own` candidates,
//!   regardless of order;
//! - remaining conflicts go to the merge-strategy chooser (first / last /
//!   concatenate / fail / discard per path). The default chooser fails on
//!   any unexpected conflict.
//!
//! The archive is emitted deterministically: entries sorted by path,
//! timestamps normalized, optional prepend block for self-executing
//! archives, optional compression. Output is written to a temporary file
//! and renamed, so a failing strategy leaves no partial output behind.

use crate::core::KilnError;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// One classpath entry feeding the assembly.
#[derive(Clone, Debug)]
pub struct AssemblySource {
    /// Directory tree, archive, or plain file
    pub path: PathBuf,
    /// True for the project's own output; wins conflict ties
    pub own: bool,
    /// Descend into archive entries instead of embedding the file
    pub extract: bool,
}

impl AssemblySource {
    /// Describe an entry explicitly.
    pub fn new(path: PathBuf, own: bool, extract: bool) -> Self {
        Self { path, own, extract }
    }

    /// A classpath entry with the usual defaults: directories are
    /// walked, `.jar`/`.zip` archives are extracted, anything else is
    /// embedded as a single file.
    pub fn classpath_entry(path: PathBuf, own: bool) -> Self {
        let extract = path.is_dir()
            || matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("jar") | Some("zip")
            );
        Self { path, own, extract }
    }
}

/// How to resolve a group of conflicting candidates for one path.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MergeStrategy {
    /// Keep the first candidate in source order
    First,
    /// Keep the last candidate in source order
    Last,
    /// Concatenate all candidates in source order (text-like service
    /// files), separated by a newline where one is missing
    Concatenate,
    /// Abort the assembly
    Fail,
    /// Drop the path entirely
    Discard,
}

/// Per-path merge strategy selector.
pub type StrategyChooser = dyn Fn(&str) -> MergeStrategy + Send + Sync;

/// Rename function applied to every internal path (shading/relocation).
pub type RenameFn = dyn Fn(&str) -> String + Send + Sync;

/// Filter applied to the resolved map before emission; returning `None`
/// drops the entry (e.g. signature files).
pub type MapFilter = dyn Fn(&str, Vec<u8>) -> Option<Vec<u8>> + Send + Sync;

/// The default chooser: every unexpected conflict fails the assembly.
pub fn no_conflict_chooser(_path: &str) -> MergeStrategy {
    MergeStrategy::Fail
}

/// Assembly configuration.
#[derive(Clone)]
pub struct AssemblyOptions {
    /// Internal-path rename, identity when absent
    pub rename: Option<Arc<RenameFn>>,
    /// Conflict resolution per path
    pub strategy_chooser: Arc<StrategyChooser>,
    /// Map-filter pass over the resolved entries
    pub map_filter: Option<Arc<MapFilter>>,
    /// Bytes written before the archive (self-executing shell header)
    pub prepend_data: Option<Vec<u8>>,
    /// Deflate entries instead of storing them
    pub compress: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            rename: None,
            strategy_chooser: Arc::new(no_conflict_chooser),
            map_filter: None,
            prepend_data: None,
            compress: true,
        }
    }
}

struct Candidate {
    source_index: usize,
    own: bool,
    bytes: Vec<u8>,
}

/// Produce the assembly archive at `output`.
///
/// Every emitted entry is present exactly once; identical inputs produce
/// byte-identical archives.
pub fn assemble(
    sources: &[AssemblySource],
    options: &AssemblyOptions,
    output: &Path,
) -> Result<PathBuf> {
    let mut groups: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for (source_index, source) in sources.iter().enumerate() {
        for (internal_path, bytes) in enumerate_source(source)? {
            let renamed = match &options.rename {
                Some(rename) => rename(&internal_path),
                None => internal_path,
            };
            groups.entry(renamed).or_default().push(Candidate {
                source_index,
                own: source.own,
                bytes,
            });
        }
    }

    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for (path, mut candidates) in groups {
        candidates.sort_by_key(|candidate| candidate.source_index);
        if let Some(bytes) = resolve_group(&path, candidates, &options.strategy_chooser)? {
            entries.insert(path, bytes);
        }
    }

    if let Some(map_filter) = &options.map_filter {
        let mut filtered = BTreeMap::new();
        for (path, bytes) in entries {
            if let Some(bytes) = map_filter(&path, bytes) {
                filtered.insert(path, bytes);
            }
        }
        entries = filtered;
    }

    emit(entries, options, output)?;
    info!(output = %output.display(), "assembly written");
    Ok(output.to_path_buf())
}

fn enumerate_source(source: &AssemblySource) -> Result<Vec<(String, Vec<u8>)>> {
    let path = &source.path;
    if path.is_dir() {
        let mut out = Vec::new();
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to walk classpath entry: {}", path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(path)
                .expect("walkdir yields children of its root");
            let internal = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((internal, fs::read(entry.path())?));
        }
        return Ok(out);
    }

    if !path.is_file() {
        bail!("classpath entry does not exist: {}", path.display());
    }

    if source.extract {
        let file = File::open(path)
            .with_context(|| format!("Failed to open archive: {}", path.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read archive: {}", path.display()))?;
        let mut out = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            out.push((entry.name().to_string(), bytes));
        }
        return Ok(out);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(vec![(name, fs::read(path)?)])
}

/// Resolve one path's candidates to the bytes to emit, or `None` to drop
/// the path.
fn resolve_group(
    path: &str,
    candidates: Vec<Candidate>,
    chooser: &Arc<StrategyChooser>,
) -> Result<Option<Vec<u8>>> {
    if candidates.len() == 1 {
        return Ok(candidates.into_iter().next().map(|c| c.bytes));
    }
    if candidates
        .windows(2)
        .all(|pair| pair[0].bytes == pair[1].bytes)
    {
        debug!(%path, "identical duplicate entries collapsed");
        return Ok(candidates.into_iter().next().map(|c| c.bytes));
    }

    // Own output beats libraries at the same path, regardless of order.
    let own_count = candidates.iter().filter(|c| c.own).count();
    if own_count == 1 && own_count < candidates.len() {
        debug!(%path, "own entry wins over library entries");
        return Ok(candidates.into_iter().find(|c| c.own).map(|c| c.bytes));
    }
    let candidates: Vec<Candidate> = if own_count > 1 && own_count < candidates.len() {
        candidates.into_iter().filter(|c| c.own).collect()
    } else {
        candidates
    };

    let strategy = chooser(path);
    debug!(%path, ?strategy, count = candidates.len(), "conflict");
    match strategy {
        MergeStrategy::First => Ok(candidates.into_iter().next().map(|c| c.bytes)),
        MergeStrategy::Last => Ok(candidates.into_iter().next_back().map(|c| c.bytes)),
        MergeStrategy::Concatenate => {
            let mut merged = Vec::new();
            for candidate in candidates {
                if !merged.is_empty() && !merged.ends_with(b"\n") {
                    merged.push(b'\n');
                }
                merged.extend_from_slice(&candidate.bytes);
            }
            Ok(Some(merged))
        }
        MergeStrategy::Discard => Ok(None),
        MergeStrategy::Fail => Err(KilnError::AssemblyConflict {
            path: path.to_string(),
            candidates: candidates.len(),
        }
        .into()),
    }
}

fn emit(
    entries: BTreeMap<String, Vec<u8>>,
    options: &AssemblyOptions,
    output: &Path,
) -> Result<()> {
    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .context("Failed to create assembly staging file")?;

    if let Some(prepend) = &options.prepend_data {
        temp.write_all(prepend)?;
    }

    let method = if options.compress {
        zip::CompressionMethod::Deflated
    } else {
        zip::CompressionMethod::Stored
    };
    let entry_options = zip::write::SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut writer = zip::ZipWriter::new(temp.as_file_mut());
    for (path, bytes) in &entries {
        writer.start_file(path.as_str(), entry_options)?;
        writer.write_all(bytes)?;
    }
    writer.finish()?;

    temp.as_file().sync_all()?;
    temp.persist(output)
        .with_context(|| format!("Failed to move assembly into place: {}", output.display()))?;

    // Self-executing archives need the executable bit.
    #[cfg(unix)]
    if options.prepend_data.is_some() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(output, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut out = BTreeMap::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            out.insert(entry.name().to_string(), bytes);
        }
        out
    }

    fn dir_source(dir: &TempDir, name: &str, files: &[(&str, &str)], own: bool) -> AssemblySource {
        let root = dir.path().join(name);
        for (path, content) in files {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        AssemblySource::new(root, own, true)
    }

    #[test]
    fn test_empty_assembly_produces_empty_archive() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.jar");
        assemble(&[], &AssemblyOptions::default(), &output).unwrap();
        assert!(read_archive(&output).is_empty());
    }

    #[test]
    fn test_default_chooser_fails_and_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let a = dir_source(&dir, "a", &[("clash.txt", "one")], false);
        let b = dir_source(&dir, "b", &[("clash.txt", "two")], false);
        let output = dir.path().join("out.jar");

        let error = assemble(&[a, b], &AssemblyOptions::default(), &output).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<KilnError>(),
            Some(KilnError::AssemblyConflict { .. })
        ));
        assert!(!output.exists(), "no partial output file may remain");
    }

    #[test]
    fn test_identical_bytes_are_not_a_conflict() {
        let dir = TempDir::new().unwrap();
        let a = dir_source(&dir, "a", &[("same.txt", "same")], false);
        let b = dir_source(&dir, "b", &[("same.txt", "same")], false);
        let output = dir.path().join("out.jar");
        assemble(&[a, b], &AssemblyOptions::default(), &output).unwrap();
        assert_eq!(read_archive(&output)["same.txt"], b"same");
    }

    #[test]
    fn test_own_wins_tie_regardless_of_order() {
        let dir = TempDir::new().unwrap();
        let library = dir_source(&dir, "lib", &[("app.properties", "library")], false);
        let own = dir_source(&dir, "own", &[("app.properties", "own")], true);
        let output = dir.path().join("out.jar");
        // Library listed first; the own entry must still win.
        assemble(&[library, own], &AssemblyOptions::default(), &output).unwrap();
        assert_eq!(read_archive(&output)["app.properties"], b"own");
    }

    #[test]
    fn test_concatenate_strategy_for_service_files() {
        let dir = TempDir::new().unwrap();
        let a = dir_source(&dir, "a", &[("META-INF/services/s", "impl.A")], false);
        let b = dir_source(&dir, "b", &[("META-INF/services/s", "impl.B")], false);
        let output = dir.path().join("out.jar");
        let options = AssemblyOptions {
            strategy_chooser: Arc::new(|path: &str| {
                if path.starts_with("META-INF/services/") {
                    MergeStrategy::Concatenate
                } else {
                    MergeStrategy::Fail
                }
            }),
            ..Default::default()
        };
        assemble(&[a, b], &options, &output).unwrap();
        assert_eq!(read_archive(&output)["META-INF/services/s"], b"impl.A\nimpl.B");
    }

    #[test]
    fn test_rename_and_map_filter() {
        let dir = TempDir::new().unwrap();
        let source = dir_source(
            &dir,
            "src",
            &[("com/dep/A.class", "a"), ("META-INF/SIG.SF", "sig")],
            false,
        );
        let output = dir.path().join("out.jar");
        let options = AssemblyOptions {
            rename: Some(Arc::new(|path: &str| {
                path.replace("com/dep/", "shaded/com/dep/")
            })),
            map_filter: Some(Arc::new(|path: &str, bytes: Vec<u8>| {
                if path.ends_with(".SF") {
                    None
                } else {
                    Some(bytes)
                }
            })),
            ..Default::default()
        };
        assemble(&[source], &options, &output).unwrap();
        let entries = read_archive(&output);
        assert!(entries.contains_key("shaded/com/dep/A.class"));
        assert!(!entries.contains_key("META-INF/SIG.SF"));
    }

    #[test]
    fn test_byte_stable_output() {
        let dir = TempDir::new().unwrap();
        let source = dir_source(&dir, "s", &[("a.txt", "a"), ("b/b.txt", "b")], true);
        let out1 = dir.path().join("one.jar");
        let out2 = dir.path().join("two.jar");
        assemble(&[source.clone()], &AssemblyOptions::default(), &out1).unwrap();
        assemble(&[source], &AssemblyOptions::default(), &out2).unwrap();
        assert_eq!(fs::read(out1).unwrap(), fs::read(out2).unwrap());
    }

    #[test]
    fn test_prepend_data_for_self_executing_archive() {
        let dir = TempDir::new().unwrap();
        let source = dir_source(&dir, "s", &[("Main.class", "m")], true);
        let output = dir.path().join("app.jar");
        let options = AssemblyOptions {
            prepend_data: Some(b"#!/bin/sh\nexec java -jar \"$0\" \"$@\"\n".to_vec()),
            ..Default::default()
        };
        assemble(&[source], &options, &output).unwrap();

        let bytes = fs::read(&output).unwrap();
        assert!(bytes.starts_with(b"#!/bin/sh"));
        // The archive must still open despite the prepended header.
        assert_eq!(read_archive(&output)["Main.class"], b"m");
    }
}
