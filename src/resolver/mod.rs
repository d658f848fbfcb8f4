//! Maven-2 style dependency resolution.
//!
//! [`resolve_dependencies`] computes the transitive closure of a set of
//! root dependencies against a repository chain:
//!
//! 1. The chain is ordered (local repositories first, duplicates
//!    coalesced).
//! 2. A breadth-first walk applies classical Maven mediation: on a
//!    version conflict for the same `(group, name)`, the dependency
//!    closest to a root wins, ties broken by declaration order. Losers
//!    are recorded as overridden and never fetched.
//! 3. Each node's descriptor is loaded (with parent inheritance and
//!    property interpolation), dependency management is applied, scopes
//!    propagate per the Maven table, and optional / excluded /
//!    non-propagating edges are pruned.
//! 4. Artifacts are fetched with snapshot semantics and checksum
//!    verification.
//!
//! Per-node failures are recorded in the node's log rather than aborting
//! the walk, so the caller sees the complete failure set; the overall
//! completion flag turns false. [`ResolvedGraph::artifacts`] raises the
//! aggregated [`KilnError::ResolutionIncomplete`] failure tree.

pub mod coordinate;
pub mod fetch;
pub mod lock;
pub mod metadata;
pub mod pom;
pub mod repository;

pub use coordinate::{
    ArtifactPath, DepScope, Dependency, DependencyExclusion, DependencyId, ResolvedDependency,
    SNAPSHOT_SUFFIX, TYPE_CHOOSE_BY_PACKAGING, TYPE_JAR,
};
pub use fetch::{Fetcher, Freshness};
pub use pom::Pom;
pub use repository::{repository_chain, ChecksumPolicy, Repository, SnapshotRecheck};

use crate::core::KilnError;
use crate::resolver::fetch::fetch_through_chain;
use crate::resolver::metadata::parse_metadata;
use crate::resolver::pom::{DeclaredDependency, PomLoader};
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

/// Rewrites ids before artifact fetch, e.g. appending a `sources`
/// classifier.
pub type IdMapper = dyn Fn(&DependencyId) -> DependencyId + Send + Sync;

/// Result of one resolution pass.
#[derive(Debug, Default)]
pub struct ResolvedGraph {
    nodes: HashMap<DependencyId, ResolvedDependency>,
    order: Vec<DependencyId>,
    /// Ids of the resolved roots, in declaration order
    pub roots: Vec<DependencyId>,
    /// Mediation losers: `(loser, winner)` pairs, never fetched
    pub overridden: Vec<(DependencyId, DependencyId)>,
    /// True when every root and every reachable transitive dependency
    /// produced an artifact or was legitimately pruned
    pub complete: bool,
}

impl ResolvedGraph {
    /// Look up a node.
    pub fn get(&self, id: &DependencyId) -> Option<&ResolvedDependency> {
        self.nodes.get(id)
    }

    /// Nodes in resolution (breadth-first) order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResolvedDependency> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// All artifact files, in resolution order.
    ///
    /// # Errors
    ///
    /// [`KilnError::ResolutionIncomplete`] with the rendered failure tree
    /// when any node failed.
    pub fn artifacts(&self) -> Result<Vec<ArtifactPath>> {
        self.artifacts_where(|_| true)
    }

    /// Artifact files of nodes matching `filter`, in resolution order.
    pub fn artifacts_where(
        &self,
        filter: impl Fn(&ResolvedDependency) -> bool,
    ) -> Result<Vec<ArtifactPath>> {
        if !self.complete {
            return Err(KilnError::ResolutionIncomplete {
                tree: self.failure_tree(),
            }
            .into());
        }
        Ok(self
            .nodes()
            .filter(|node| filter(node))
            .filter_map(|node| node.artifact.clone())
            .collect())
    }

    /// Pretty-print the failing coordinates with the repositories
    /// attempted for each.
    pub fn failure_tree(&self) -> String {
        let mut out = String::new();
        for node in self.nodes() {
            let Some(log) = &node.log else { continue };
            let _ = writeln!(out, "{}", node.id);
            for line in log.lines() {
                let _ = writeln!(out, "  - {line}");
            }
        }
        out
    }
}

struct WorkItem {
    declared: DeclaredDependency,
    /// Effective scope of the parent node; `None` at roots
    parent_scope: Option<DepScope>,
    depth: usize,
    /// Exclusions inherited from the edges above this node
    inherited_exclusions: Arc<Vec<DependencyExclusion>>,
    /// Dependency management accumulated root-first; first match wins
    management: Arc<Vec<DeclaredDependency>>,
}

/// Resolve the transitive dependency graph of `roots`.
///
/// `mapper`, when present, rewrites each node id before its artifact is
/// fetched. The fetcher decides online/offline behavior.
pub fn resolve_dependencies(
    roots: &[Dependency],
    repositories: &[Repository],
    mapper: Option<&IdMapper>,
    fetcher: &Fetcher,
) -> ResolvedGraph {
    let chain = repository_chain(repositories);
    let mut loader = PomLoader::new(fetcher, &chain);
    let mut graph = ResolvedGraph {
        complete: true,
        ..ResolvedGraph::default()
    };

    // Winner registry for mediation, keyed by (group, name).
    let mut chosen: HashMap<(String, String), String> = HashMap::new();
    let mut queue: VecDeque<WorkItem> = VecDeque::new();

    for root in roots {
        queue.push_back(WorkItem {
            declared: DeclaredDependency::from_dependency(root),
            parent_scope: None,
            depth: 0,
            inherited_exclusions: Arc::new(Vec::new()),
            management: Arc::new(
                root.dependency_management
                    .iter()
                    .map(DeclaredDependency::from_dependency)
                    .collect(),
            ),
        });
    }

    while let Some(item) = queue.pop_front() {
        resolve_one(item, &mut queue, &mut chosen, &mut loader, &chain, mapper, fetcher, &mut graph);
    }

    info!(
        nodes = graph.order.len(),
        overridden = graph.overridden.len(),
        complete = graph.complete,
        "dependency resolution finished"
    );
    graph
}

#[allow(clippy::too_many_arguments)]
fn resolve_one(
    item: WorkItem,
    queue: &mut VecDeque<WorkItem>,
    chosen: &mut HashMap<(String, String), String>,
    loader: &mut PomLoader<'_>,
    chain: &[Repository],
    mapper: Option<&IdMapper>,
    fetcher: &Fetcher,
    graph: &mut ResolvedGraph,
) {
    let mut declared = item.declared;

    // Dependency management: the effective section is the accumulation
    // along the path from the roots; a matching entry supplies version,
    // scope, exclusions and the optional flag. A version the user pinned
    // explicitly at a root is kept.
    if let Some(entry) = item
        .management
        .iter()
        .find(|entry| manages_same_artifact(entry, &declared))
    {
        if entry.version.is_some() && (declared.version.is_none() || item.depth > 0) {
            declared.version = entry.version.clone();
        }
        if declared.scope.is_none() {
            declared.scope = entry.scope.clone();
        }
        if declared.optional.is_none() {
            declared.optional = entry.optional;
        }
        declared.exclusions.extend(entry.exclusions.iter().cloned());
    }

    let coordinate_label = format!("{}:{}", declared.group, declared.name);
    let Some(version) = declared.version.clone().filter(|v| !v.is_empty()) else {
        record_error(
            graph,
            declared.id(),
            item.depth,
            DepScope::Compile,
            "no version declared and no dependency management supplies one".to_string(),
        );
        return;
    };
    declared.version = Some(version.clone());

    // Scope: declared crossed with the parent's effective scope. Unknown
    // scopes (system and friends) prune the edge.
    let Some(declared_scope) = declared.effective_scope() else {
        debug!(%coordinate_label, scope = ?declared.scope, "pruning edge with unsupported scope");
        return;
    };
    let scope = match item.parent_scope {
        None => declared_scope,
        Some(parent) => match DepScope::propagate(parent, declared_scope) {
            Some(scope) => scope,
            None => return,
        },
    };

    // Optional transitives and excluded subtrees are pruned.
    if item.depth > 0 && declared.optional.unwrap_or(false) {
        return;
    }
    let pre_mediation_id = declared.id();
    if item.depth > 0
        && item
            .inherited_exclusions
            .iter()
            .any(|exclusion| exclusion.matches(&pre_mediation_id))
    {
        debug!(%pre_mediation_id, "pruned by exclusion");
        return;
    }

    // Mediation: nearest wins, then first declared. Breadth-first order
    // makes the first registration the winner.
    let mediation_key = (declared.group.clone(), declared.name.clone());
    match chosen.get(&mediation_key) {
        Some(winner_version) if *winner_version != version => {
            let winner = DependencyId::new(
                declared.group.clone(),
                declared.name.clone(),
                winner_version.clone(),
            );
            debug!(loser = %pre_mediation_id, %winner, "version overridden by mediation");
            graph.overridden.push((pre_mediation_id, winner));
            return;
        }
        Some(_) => {}
        None => {
            chosen.insert(mediation_key, version.clone());
        }
    }

    // Descriptor.
    let pom = match loader.load(&declared.group, &declared.name, &version) {
        Ok(loaded) => loaded,
        Err(error) => {
            record_error(graph, declared.id(), item.depth, scope, format!("{error:#}"));
            return;
        }
    };
    let (pom, pom_repository) = pom;

    // Artifact type selection.
    let extension = artifact_extension(&declared, &pom.packaging);

    let mut node_id = declared.id();
    if let Some(mapper) = mapper {
        node_id = mapper(&node_id);
    }
    if graph.nodes.contains_key(&node_id) {
        return;
    }
    if item.depth == 0 {
        graph.roots.push(node_id.clone());
    }

    // Artifact.
    let (artifact, mut log_lines) = match &extension {
        None => (None, Vec::new()),
        Some(extension) => fetch_artifact(fetcher, chain, &node_id, extension),
    };
    if extension.is_some() && artifact.is_none() && log_lines.is_empty() {
        log_lines.push("artifact not found in any repository".to_string());
    }
    let failed = extension.is_some() && artifact.is_none();
    if !failed {
        log_lines.clear();
    }

    // Children.
    let child_exclusions: Arc<Vec<DependencyExclusion>> = Arc::new(
        item.inherited_exclusions
            .iter()
            .chain(declared.exclusions.iter())
            .cloned()
            .collect(),
    );
    let child_management: Arc<Vec<DeclaredDependency>> = Arc::new(
        item.management
            .iter()
            .chain(pom.dependency_management.iter())
            .cloned()
            .collect(),
    );
    let mut surviving = Vec::new();
    for child in &pom.dependencies {
        let Some(child_declared_scope) = child.effective_scope() else {
            continue;
        };
        let Some(child_scope) = DepScope::propagate(scope, child_declared_scope) else {
            continue;
        };
        if child.optional.unwrap_or(false) {
            continue;
        }
        surviving.push(
            Dependency::new(child.id())
                .with_scope(child_scope)
                .with_exclusions(child.exclusions.clone()),
        );
        queue.push_back(WorkItem {
            declared: child.clone(),
            parent_scope: Some(scope),
            depth: item.depth + 1,
            inherited_exclusions: Arc::clone(&child_exclusions),
            management: Arc::clone(&child_management),
        });
    }

    if failed {
        graph.complete = false;
    }
    let resolved_from = artifact
        .as_ref()
        .map(|artifact: &ArtifactPath| artifact.repository.clone())
        .unwrap_or(pom_repository);
    graph.nodes.insert(
        node_id.clone(),
        ResolvedDependency {
            id: node_id.clone(),
            scope,
            dependencies: surviving,
            resolved_from: Some(resolved_from),
            artifact,
            log: if log_lines.is_empty() {
                None
            } else {
                Some(log_lines.join("\n"))
            },
        },
    );
    graph.order.push(node_id);
}

fn record_error(
    graph: &mut ResolvedGraph,
    id: DependencyId,
    depth: usize,
    scope: DepScope,
    reason: String,
) {
    graph.complete = false;
    if graph.nodes.contains_key(&id) {
        return;
    }
    if depth == 0 {
        graph.roots.push(id.clone());
    }
    graph.nodes.insert(
        id.clone(),
        ResolvedDependency {
            id: id.clone(),
            scope,
            dependencies: Vec::new(),
            resolved_from: None,
            artifact: None,
            log: Some(reason),
        },
    );
    graph.order.push(id);
}

/// Dependency-management entries match on group, name, classifier and
/// type; absent classifier and default types compare as defaults.
fn manages_same_artifact(entry: &DeclaredDependency, declared: &DeclaredDependency) -> bool {
    fn kind_class(kind: &Option<String>) -> &str {
        match kind.as_deref() {
            None | Some(TYPE_CHOOSE_BY_PACKAGING) | Some(TYPE_JAR) => TYPE_JAR,
            Some(other) => other,
        }
    }
    entry.group == declared.group
        && entry.name == declared.name
        && entry.classifier.as_deref().unwrap_or("") == declared.classifier.as_deref().unwrap_or("")
        && kind_class(&entry.kind) == kind_class(&declared.kind)
}

/// File extension of the node's artifact; `None` means descriptor-only.
fn artifact_extension(declared: &DeclaredDependency, packaging: &str) -> Option<String> {
    let kind = declared.kind.as_deref().unwrap_or(TYPE_CHOOSE_BY_PACKAGING);
    let resolved = if kind == TYPE_CHOOSE_BY_PACKAGING {
        packaging
    } else {
        kind
    };
    match resolved {
        "pom" => None,
        "bundle" => Some(TYPE_JAR.to_string()),
        other => Some(other.to_string()),
    }
}

/// Fetch a node's artifact, resolving snapshot filenames first.
fn fetch_artifact(
    fetcher: &Fetcher,
    chain: &[Repository],
    id: &DependencyId,
    extension: &str,
) -> (Option<ArtifactPath>, Vec<String>) {
    let concrete = if id.is_snapshot() {
        if !id.snapshot_version.is_empty() {
            // A pinned concrete snapshot version is used verbatim.
            format!(
                "{}-{}",
                id.version.trim_end_matches(SNAPSHOT_SUFFIX),
                id.snapshot_version
            )
        } else {
            snapshot_concrete_version(fetcher, chain, id, extension)
        }
    } else {
        id.version.clone()
    };

    // Unique (timestamped) snapshot files are immutable; the non-unique
    // `-SNAPSHOT` filename changes under the recheck interval, like the
    // metadata itself.
    let freshness = if concrete.ends_with(SNAPSHOT_SUFFIX) {
        Freshness::SnapshotMetadata
    } else {
        Freshness::Any
    };
    let relative = format!(
        "{}/{}",
        id.directory_path(),
        id.file_name(&concrete, extension)
    );
    let (file, attempts) = fetch_through_chain(fetcher, chain, &relative, freshness);
    match file {
        Some(file) => (
            Some(ArtifactPath::new(
                file.path,
                file.repository,
                file.url,
                file.from_cache,
            )),
            attempts,
        ),
        None => (None, attempts),
    }
}

/// Read the artifact directory's metadata to pick the concrete snapshot
/// version; fall back to the non-unique `-SNAPSHOT` name when no usable
/// metadata is published.
fn snapshot_concrete_version(
    fetcher: &Fetcher,
    chain: &[Repository],
    id: &DependencyId,
    extension: &str,
) -> String {
    let relative = format!("{}/maven-metadata.xml", id.directory_path());
    let (file, _) = fetch_through_chain(fetcher, chain, &relative, Freshness::SnapshotMetadata);
    let Some(file) = file else {
        return id.version.clone();
    };
    let Ok(bytes) = file.read() else {
        return id.version.clone();
    };
    match parse_metadata(&String::from_utf8_lossy(&bytes)) {
        Ok(metadata) => metadata
            .concrete_version(&id.version, &id.classifier, extension)
            .unwrap_or_else(|| id.version.clone()),
        Err(error) => {
            debug!(%relative, "unparseable snapshot metadata: {error}");
            id.version.clone()
        }
    }
}
