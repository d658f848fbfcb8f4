//! Immutable coordinate and dependency-graph value types.
//!
//! The canonical string form of a coordinate is
//! `group:name:version[:classifier][@type]`; parsing and printing round
//! trip. Versions ending in `-SNAPSHOT` mark in-development artifacts
//! whose content may change under a fixed version string.

use crate::core::KilnError;
use once_cell::sync::OnceCell;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Artifact type for plain Java archives.
pub const TYPE_JAR: &str = "jar";

/// Artifact type resolved from the project descriptor's `packaging`.
pub const TYPE_CHOOSE_BY_PACKAGING: &str = "choose-by-packaging";

/// Version suffix marking snapshots.
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// Identity of one artifact in a Maven-2 repository.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DependencyId {
    /// Group id, dots become directory separators in repository layout
    pub group: String,
    /// Artifact name
    pub name: String,
    /// Version string; may end in `-SNAPSHOT`
    pub version: String,
    /// Artifact classifier, empty for the main artifact
    pub classifier: String,
    /// Artifact type; [`TYPE_CHOOSE_BY_PACKAGING`] defers to the
    /// descriptor's packaging
    pub kind: String,
    /// Concrete snapshot version used verbatim instead of metadata
    /// lookup, empty when unset
    pub snapshot_version: String,
}

impl DependencyId {
    /// Create an id with the default classifier and type.
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: reduce_version_range(&version.into()),
            classifier: String::new(),
            kind: TYPE_CHOOSE_BY_PACKAGING.to_string(),
            snapshot_version: String::new(),
        }
    }

    /// Replace the classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = classifier.into();
        self
    }

    /// Replace the artifact type.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Pin a concrete snapshot version, e.g. `20190101.123456-1`.
    #[must_use]
    pub fn with_snapshot_version(mut self, snapshot_version: impl Into<String>) -> Self {
        self.snapshot_version = snapshot_version.into();
        self
    }

    /// Whether the version marks a snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.version.ends_with(SNAPSHOT_SUFFIX)
    }

    /// Repository directory of this coordinate:
    /// `group/with/slashes/name/version`.
    pub fn directory_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group.replace('.', "/"),
            self.name,
            self.version
        )
    }

    /// File name of the artifact under `concrete_version` with the given
    /// extension: `name-version[-classifier].ext`.
    pub fn file_name(&self, concrete_version: &str, extension: &str) -> String {
        if self.classifier.is_empty() {
            format!("{}-{}.{}", self.name, concrete_version, extension)
        } else {
            format!(
                "{}-{}-{}.{}",
                self.name, concrete_version, self.classifier, extension
            )
        }
    }

    /// File name of the project descriptor. Descriptors always live under
    /// the base version, even for unique snapshots.
    pub fn pom_file_name(&self) -> String {
        format!("{}-{}.pom", self.name, self.version)
    }

    /// Parse the canonical `group:name:version[:classifier][@type]` form.
    pub fn parse(input: &str) -> Result<Self, KilnError> {
        let (coordinate, kind) = match input.split_once('@') {
            Some((coordinate, kind)) if !kind.is_empty() => (coordinate, Some(kind)),
            Some(_) => {
                return Err(KilnError::InvalidCoordinate {
                    input: input.to_string(),
                    reason: "empty type after '@'".to_string(),
                })
            }
            None => (input, None),
        };

        let parts: Vec<&str> = coordinate.split(':').collect();
        if !(3..=4).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(KilnError::InvalidCoordinate {
                input: input.to_string(),
                reason: "expected group:name:version[:classifier]".to_string(),
            });
        }

        let mut id = DependencyId::new(parts[0], parts[1], parts[2]);
        if let Some(classifier) = parts.get(3) {
            id = id.with_classifier(*classifier);
        }
        if let Some(kind) = kind {
            id = id.with_kind(kind);
        }
        Ok(id)
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)?;
        if !self.classifier.is_empty() {
            write!(f, ":{}", self.classifier)?;
        }
        if self.kind != TYPE_CHOOSE_BY_PACKAGING {
            write!(f, "@{}", self.kind)?;
        }
        Ok(())
    }
}

/// Reduce a version range to a concrete version where possible.
///
/// Only single-endpoint enumerations like `[1.0]` reduce; every other
/// range string is kept raw, full range intersection is not implemented.
pub fn reduce_version_range(version: &str) -> String {
    if let Some(inner) = version
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        if !inner.is_empty() && !inner.contains(',') {
            return inner.to_string();
        }
    }
    version.to_string()
}

/// Dependency scope, with Maven-2 transitive propagation semantics.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum DepScope {
    /// On the compile and runtime classpaths, propagates
    Compile,
    /// Needed to compile, provided by the runtime environment
    Provided,
    /// On the runtime classpath only
    Runtime,
    /// Test classpaths only, never propagates
    Test,
    /// Project-level aggregation into the produced artifact
    Aggregate,
}

impl DepScope {
    /// Parse a POM scope string. Unknown scopes (including `system`)
    /// return `None` and the edge is pruned.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "compile" => Some(DepScope::Compile),
            "provided" => Some(DepScope::Provided),
            "runtime" => Some(DepScope::Runtime),
            "test" => Some(DepScope::Test),
            "aggregate" => Some(DepScope::Aggregate),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            DepScope::Compile => "compile",
            DepScope::Provided => "provided",
            DepScope::Runtime => "runtime",
            DepScope::Test => "test",
            DepScope::Aggregate => "aggregate",
        }
    }

    /// Effective scope of a transitive edge: parent scope crossed with
    /// the child's declared scope. `None` prunes the edge.
    pub fn propagate(parent: DepScope, child: DepScope) -> Option<DepScope> {
        match (parent, child) {
            (DepScope::Compile | DepScope::Aggregate, DepScope::Compile) => Some(DepScope::Compile),
            (DepScope::Compile | DepScope::Aggregate, DepScope::Runtime) => Some(DepScope::Runtime),
            (DepScope::Runtime, DepScope::Compile | DepScope::Runtime) => Some(DepScope::Runtime),
            (DepScope::Test, DepScope::Compile | DepScope::Runtime) => Some(DepScope::Test),
            (DepScope::Provided, DepScope::Compile | DepScope::Runtime) => Some(DepScope::Provided),
            _ => None,
        }
    }
}

impl fmt::Display for DepScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wildcard pattern excluding transitive dependencies.
///
/// Any `None` field is a wildcard; the pattern matches an id when every
/// present field is equal.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DependencyExclusion {
    /// Group to match, wildcard when absent
    pub group: Option<String>,
    /// Name to match
    pub name: Option<String>,
    /// Version to match
    pub version: Option<String>,
    /// Classifier to match
    pub classifier: Option<String>,
    /// Type to match
    pub kind: Option<String>,
}

impl DependencyExclusion {
    /// The common `group + name` exclusion.
    pub fn of(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Whether this pattern excludes `id`.
    pub fn matches(&self, id: &DependencyId) -> bool {
        fn field(pattern: &Option<String>, value: &str) -> bool {
            pattern.as_deref().map_or(true, |p| p == value)
        }
        field(&self.group, &id.group)
            && field(&self.name, &id.name)
            && field(&self.version, &id.version)
            && field(&self.classifier, &id.classifier)
            && field(&self.kind, &id.kind)
    }
}

/// A declared dependency edge.
#[derive(Clone, PartialEq, Debug)]
pub struct Dependency {
    /// What is depended on
    pub id: DependencyId,
    /// Scope of the edge
    pub scope: DepScope,
    /// Optional dependencies are pruned when reached transitively
    pub optional: bool,
    /// Patterns pruning this dependency's transitive subtree
    pub exclusions: Vec<DependencyExclusion>,
    /// Dependency management applied while resolving beneath this edge
    pub dependency_management: Vec<Dependency>,
}

impl Dependency {
    /// A compile-scope, non-optional dependency.
    pub fn new(id: DependencyId) -> Self {
        Self {
            id,
            scope: DepScope::Compile,
            optional: false,
            exclusions: Vec::new(),
            dependency_management: Vec::new(),
        }
    }

    /// Replace the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: DepScope) -> Self {
        self.scope = scope;
        self
    }

    /// Add exclusions.
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: Vec<DependencyExclusion>) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Attach dependency management.
    #[must_use]
    pub fn with_dependency_management(mut self, management: Vec<Dependency>) -> Self {
        self.dependency_management = management;
        self
    }
}

/// A file obtained from a repository, with lazily loaded content.
#[derive(Clone, Debug)]
pub struct ArtifactPath {
    /// Where the file lives on the local disk
    pub path: PathBuf,
    /// Name of the repository that provided the file
    pub repository: String,
    /// URL the file was originally obtained from
    pub origin_url: String,
    /// Whether the file was answered from a local cache
    pub from_cache: bool,
    data: Arc<OnceCell<Arc<Vec<u8>>>>,
}

impl ArtifactPath {
    /// Describe a file on disk.
    pub fn new(path: PathBuf, repository: String, origin_url: String, from_cache: bool) -> Self {
        Self {
            path,
            repository,
            origin_url,
            from_cache,
            data: Arc::new(OnceCell::new()),
        }
    }

    /// The file's bytes, loaded from disk on first read and retained.
    pub fn data(&self) -> anyhow::Result<Arc<Vec<u8>>> {
        let bytes = self.data.get_or_try_init(|| {
            std::fs::read(&self.path)
                .map(Arc::new)
                .map_err(anyhow::Error::from)
        })?;
        Ok(Arc::clone(bytes))
    }
}

/// One node of a resolution result.
#[derive(Clone, Debug)]
pub struct ResolvedDependency {
    /// The resolved coordinate
    pub id: DependencyId,
    /// Effective scope of the node
    pub scope: DepScope,
    /// Surviving transitive edges declared by this node
    pub dependencies: Vec<Dependency>,
    /// Repository name that provided the artifact or descriptor
    pub resolved_from: Option<String>,
    /// The artifact file; absent for descriptor-only (pom) nodes
    pub artifact: Option<ArtifactPath>,
    /// Failure log; the node has an error iff this is present
    pub log: Option<String>,
}

impl ResolvedDependency {
    /// Whether resolution of this node failed.
    pub fn has_error(&self) -> bool {
        self.log.is_some()
    }
}
