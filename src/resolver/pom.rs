//! Project descriptor (POM) parsing and effective-model construction.
//!
//! Descriptors are plain Maven-2 XML: coordinates, `<parent>` inheritance,
//! `<properties>`, `<dependencies>` and `<dependencyManagement>`. Unknown
//! elements are ignored. Parent chains are loaded recursively through the
//! repository chain; properties and dependency management merge downward
//! (child wins), and `${...}` placeholders are substituted after
//! inheritance.

use crate::constants;
use crate::core::KilnError;
use crate::resolver::coordinate::{
    reduce_version_range, DepScope, Dependency, DependencyExclusion, DependencyId, TYPE_JAR,
};
use crate::resolver::fetch::{fetch_through_chain, Fetcher, Freshness};
use crate::resolver::repository::Repository;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A dependency as written in a descriptor: fields may be absent and are
/// filled in by dependency management or defaults during resolution.
#[derive(Clone, Debug)]
pub(crate) struct DeclaredDependency {
    pub group: String,
    pub name: String,
    pub version: Option<String>,
    pub classifier: Option<String>,
    pub kind: Option<String>,
    /// Raw scope text; unset means compile, unrecognized prunes the edge
    pub scope: Option<String>,
    pub optional: Option<bool>,
    pub exclusions: Vec<DependencyExclusion>,
    /// Concrete snapshot version pin carried from a root declaration
    pub snapshot_version: String,
}

impl DeclaredDependency {
    /// A user-declared root dependency is already concrete.
    pub fn from_dependency(dependency: &Dependency) -> Self {
        Self {
            group: dependency.id.group.clone(),
            name: dependency.id.name.clone(),
            version: Some(dependency.id.version.clone()).filter(|v| !v.is_empty()),
            classifier: Some(dependency.id.classifier.clone()).filter(|c| !c.is_empty()),
            kind: Some(dependency.id.kind.clone()),
            scope: Some(dependency.scope.as_str().to_string()),
            optional: Some(dependency.optional),
            exclusions: dependency.exclusions.clone(),
            snapshot_version: dependency.id.snapshot_version.clone(),
        }
    }

    /// The coordinate this declaration resolves to, with empty version
    /// when management has not filled it yet.
    pub fn id(&self) -> DependencyId {
        let mut id = DependencyId::new(
            self.group.clone(),
            self.name.clone(),
            self.version.clone().unwrap_or_default(),
        );
        if let Some(classifier) = &self.classifier {
            id = id.with_classifier(classifier.clone());
        }
        if let Some(kind) = &self.kind {
            id = id.with_kind(kind.clone());
        }
        if !self.snapshot_version.is_empty() {
            id = id.with_snapshot_version(self.snapshot_version.clone());
        }
        id
    }

    /// Scope of the edge: declared, or compile when unset. `None` when
    /// the declared scope is unrecognized (such edges are pruned).
    pub fn effective_scope(&self) -> Option<DepScope> {
        match &self.scope {
            None => Some(DepScope::Compile),
            Some(text) => DepScope::parse(text),
        }
    }
}

/// An effective project descriptor after inheritance and interpolation.
#[derive(Clone, Debug)]
pub struct Pom {
    /// Group id
    pub group: String,
    /// Artifact id
    pub name: String,
    /// Version
    pub version: String,
    /// Packaging, `jar` by default; `pom` means descriptor-only
    pub packaging: String,
    /// Merged properties
    pub properties: HashMap<String, String>,
    pub(crate) dependencies: Vec<DeclaredDependency>,
    pub(crate) dependency_management: Vec<DeclaredDependency>,
}

#[derive(Default)]
struct RawPom {
    parent: Option<(String, String, String)>,
    group: Option<String>,
    name: Option<String>,
    version: Option<String>,
    packaging: Option<String>,
    properties: HashMap<String, String>,
    dependencies: Vec<DeclaredDependency>,
    dependency_management: Vec<DeclaredDependency>,
}

/// Loads and caches effective descriptors through a repository chain.
pub(crate) struct PomLoader<'f> {
    fetcher: &'f Fetcher,
    chain: &'f [Repository],
    cache: HashMap<(String, String, String), (Arc<Pom>, String)>,
}

impl<'f> PomLoader<'f> {
    pub fn new(fetcher: &'f Fetcher, chain: &'f [Repository]) -> Self {
        Self {
            fetcher,
            chain,
            cache: HashMap::new(),
        }
    }

    /// Load the effective descriptor for a coordinate. Returns the
    /// descriptor and the name of the repository that provided it.
    pub fn load(&mut self, group: &str, name: &str, version: &str) -> Result<(Arc<Pom>, String)> {
        let cache_key = (group.to_string(), name.to_string(), version.to_string());
        if let Some((pom, repository)) = self.cache.get(&cache_key) {
            return Ok((Arc::clone(pom), repository.clone()));
        }

        let coordinate = format!("{group}:{name}:{version}");
        let mut raws = Vec::new();
        let mut current = (group.to_string(), name.to_string(), version.to_string());
        let mut repository = None;

        // Child-first parent chain.
        loop {
            if raws.len() >= constants::MAX_POM_PARENT_DEPTH {
                return Err(KilnError::PomError {
                    coordinate,
                    reason: format!(
                        "parent chain deeper than {} descriptors",
                        constants::MAX_POM_PARENT_DEPTH
                    ),
                }
                .into());
            }
            let raw = self.fetch_raw(&current.0, &current.1, &current.2)?;
            if repository.is_none() {
                repository = Some(raw.1);
            }
            let parent = raw.0.parent.clone();
            raws.push(raw.0);
            match parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let pom = Arc::new(merge_and_interpolate(raws, &coordinate)?);
        let repository = repository.unwrap_or_default();
        self.cache
            .insert(cache_key, (Arc::clone(&pom), repository.clone()));
        Ok((pom, repository))
    }

    fn fetch_raw(&self, group: &str, name: &str, version: &str) -> Result<(RawPom, String)> {
        let relative = format!(
            "{}/{}/{}/{}-{}.pom",
            group.replace('.', "/"),
            name,
            version,
            name,
            version
        );
        let coordinate = format!("{group}:{name}:{version}");
        let (file, attempts) =
            fetch_through_chain(self.fetcher, self.chain, &relative, Freshness::Any);
        let file = file.ok_or_else(|| KilnError::PomError {
            coordinate: coordinate.clone(),
            reason: if attempts.is_empty() {
                "no repositories configured".to_string()
            } else {
                attempts.join("; ")
            },
        })?;
        debug!(%coordinate, repository = %file.repository, "descriptor loaded");
        let bytes = file.read()?;
        let text = String::from_utf8_lossy(&bytes);
        let raw = parse_raw_pom(&text).map_err(|error| KilnError::PomError {
            coordinate,
            reason: error.to_string(),
        })?;
        Ok((raw, file.repository))
    }
}

fn parse_raw_pom(text: &str) -> Result<RawPom> {
    let document = roxmltree::Document::parse(text)?;
    let project = document.root_element();
    if project.tag_name().name() != "project" {
        return Err(anyhow!(
            "root element is <{}>, expected <project>",
            project.tag_name().name()
        ));
    }

    let mut raw = RawPom::default();
    for child in project.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "groupId" => raw.group = node_text(&child),
            "artifactId" => raw.name = node_text(&child),
            "version" => raw.version = node_text(&child),
            "packaging" => raw.packaging = node_text(&child),
            "parent" => {
                let group = child_text(&child, "groupId");
                let name = child_text(&child, "artifactId");
                let version = child_text(&child, "version");
                match (group, name, version) {
                    (Some(group), Some(name), Some(version)) => {
                        raw.parent = Some((group, name, version));
                    }
                    _ => return Err(anyhow!("<parent> is missing groupId/artifactId/version")),
                }
            }
            "properties" => {
                for property in child.children().filter(|n| n.is_element()) {
                    raw.properties.insert(
                        property.tag_name().name().to_string(),
                        node_text(&property).unwrap_or_default(),
                    );
                }
            }
            "dependencies" => raw.dependencies = parse_dependency_list(&child),
            "dependencyManagement" => {
                if let Some(inner) = child
                    .children()
                    .find(|n| n.is_element() && n.tag_name().name() == "dependencies")
                {
                    raw.dependency_management = parse_dependency_list(&inner);
                }
            }
            // Unknown elements are ignored.
            _ => {}
        }
    }
    Ok(raw)
}

fn parse_dependency_list(node: &roxmltree::Node<'_, '_>) -> Vec<DeclaredDependency> {
    node.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "dependency")
        .filter_map(|dependency| {
            let group = child_text(&dependency, "groupId")?;
            let name = child_text(&dependency, "artifactId")?;
            let mut exclusions = Vec::new();
            if let Some(list) = dependency
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "exclusions")
            {
                for exclusion in list
                    .children()
                    .filter(|n| n.is_element() && n.tag_name().name() == "exclusion")
                {
                    exclusions.push(DependencyExclusion {
                        group: child_text(&exclusion, "groupId").filter(|g| g != "*"),
                        name: child_text(&exclusion, "artifactId").filter(|n| n != "*"),
                        ..Default::default()
                    });
                }
            }
            Some(DeclaredDependency {
                group,
                name,
                version: child_text(&dependency, "version"),
                classifier: child_text(&dependency, "classifier"),
                kind: child_text(&dependency, "type"),
                scope: child_text(&dependency, "scope"),
                optional: child_text(&dependency, "optional").map(|o| o == "true"),
                exclusions,
                snapshot_version: String::new(),
            })
        })
        .collect()
}

fn node_text(node: &roxmltree::Node<'_, '_>) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn child_text(node: &roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| node_text(&n))
}

/// Merge a child-first parent chain and substitute `${...}` placeholders.
fn merge_and_interpolate(raws: Vec<RawPom>, coordinate: &str) -> Result<Pom> {
    let group = raws
        .iter()
        .find_map(|r| r.group.clone())
        .or_else(|| raws.first().and_then(|r| r.parent.as_ref().map(|p| p.0.clone())))
        .ok_or_else(|| KilnError::PomError {
            coordinate: coordinate.to_string(),
            reason: "no groupId in descriptor or parents".to_string(),
        })?;
    let name = raws
        .iter()
        .find_map(|r| r.name.clone())
        .ok_or_else(|| KilnError::PomError {
            coordinate: coordinate.to_string(),
            reason: "no artifactId in descriptor".to_string(),
        })?;
    let version = raws
        .iter()
        .find_map(|r| r.version.clone())
        .or_else(|| raws.first().and_then(|r| r.parent.as_ref().map(|p| p.2.clone())))
        .ok_or_else(|| KilnError::PomError {
            coordinate: coordinate.to_string(),
            reason: "no version in descriptor or parents".to_string(),
        })?;
    let packaging = raws
        .first()
        .and_then(|r| r.packaging.clone())
        .unwrap_or_else(|| TYPE_JAR.to_string());

    // Properties: root ancestor first so the child overrides.
    let mut properties = HashMap::new();
    for raw in raws.iter().rev() {
        properties.extend(raw.properties.clone());
    }

    // Dependencies and management: child declarations win over inherited
    // ones for the same (group, name, classifier).
    let mut dependencies: Vec<DeclaredDependency> = Vec::new();
    let mut dependency_management: Vec<DeclaredDependency> = Vec::new();
    for raw in &raws {
        for dependency in &raw.dependencies {
            if !dependencies
                .iter()
                .any(|d| same_dependency_key(d, dependency))
            {
                dependencies.push(dependency.clone());
            }
        }
        for entry in &raw.dependency_management {
            if !dependency_management
                .iter()
                .any(|d| same_dependency_key(d, entry))
            {
                dependency_management.push(entry.clone());
            }
        }
    }

    let mut substitutions = properties.clone();
    substitutions.insert("project.groupId".to_string(), group.clone());
    substitutions.insert("project.artifactId".to_string(), name.clone());
    substitutions.insert("project.version".to_string(), version.clone());
    substitutions.insert("pom.groupId".to_string(), group.clone());
    substitutions.insert("pom.artifactId".to_string(), name.clone());
    substitutions.insert("pom.version".to_string(), version.clone());
    if let Some((parent_group, _, parent_version)) = raws.first().and_then(|r| r.parent.clone()) {
        substitutions.insert("project.parent.groupId".to_string(), parent_group.clone());
        substitutions.insert("parent.groupId".to_string(), parent_group);
        substitutions.insert("project.parent.version".to_string(), parent_version.clone());
        substitutions.insert("parent.version".to_string(), parent_version);
    }

    // Properties may reference each other; settle them first.
    for _ in 0..constants::MAX_INTERPOLATION_PASSES {
        let mut changed = false;
        let snapshot = substitutions.clone();
        for value in substitutions.values_mut() {
            let substituted = substitute(value, &snapshot);
            if substituted != *value {
                *value = substituted;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let interpolate_dep = |dependency: &DeclaredDependency| DeclaredDependency {
        group: substitute(&dependency.group, &substitutions),
        name: substitute(&dependency.name, &substitutions),
        version: dependency
            .version
            .as_ref()
            .map(|v| reduce_version_range(&substitute(v, &substitutions))),
        classifier: dependency
            .classifier
            .as_ref()
            .map(|c| substitute(c, &substitutions)),
        kind: dependency.kind.as_ref().map(|k| substitute(k, &substitutions)),
        scope: dependency.scope.as_ref().map(|s| substitute(s, &substitutions)),
        optional: dependency.optional,
        exclusions: dependency.exclusions.clone(),
        snapshot_version: dependency.snapshot_version.clone(),
    };

    Ok(Pom {
        group: substitute(&group, &substitutions),
        name: substitute(&name, &substitutions),
        version: substitute(&version, &substitutions),
        packaging: substitute(&packaging, &substitutions),
        dependencies: dependencies.iter().map(interpolate_dep).collect(),
        dependency_management: dependency_management.iter().map(interpolate_dep).collect(),
        properties,
    })
}

fn same_dependency_key(a: &DeclaredDependency, b: &DeclaredDependency) -> bool {
    a.group == b.group && a.name == b.name && a.classifier == b.classifier
}

/// Replace `${key}` occurrences with known substitutions; unknown keys
/// are left in place.
fn substitute(text: &str, substitutions: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match substitutions.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}
