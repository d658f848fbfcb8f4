//! Binding holders and the build definition arena.
//!
//! A [`BindingHolder`] maps keys to binding producers and to ordered
//! modifier lists, and maps configurations to extension holders. Holders
//! come in five kinds: projects, configurations, archetypes, configuration
//! extensions, and anonymous configurations.
//!
//! Holders are write-only while they are being built and immutable
//! afterwards. Mutation is only reachable through a [`HolderBuilder`]
//! handed to a construction closure, so the locked state cannot be
//! violated after construction returns: the building-to-locked transition
//! is enforced by the borrow checker instead of a runtime flag.
//!
//! All holders live in a [`Build`] arena and are referenced by
//! [`HolderId`] indices; the evaluator and scope machinery never hold
//! direct references.

use crate::core::KilnError;
use crate::keys::evaluator::Eval;
use crate::keys::key::{DynValue, Key, KeyValue};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Index of a holder inside a [`Build`] arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct HolderId(pub(crate) u32);

/// A binding producer: evaluates to the key's value under a scope.
pub(crate) type Producer = Arc<dyn Fn(&mut Eval<'_>) -> Result<DynValue> + Send + Sync>;

/// A modifier: transforms an already-produced value under a scope.
pub(crate) type Modifier = Arc<dyn Fn(&mut Eval<'_>, DynValue) -> Result<DynValue> + Send + Sync>;

/// What kind of holder an arena slot is.
#[derive(Clone, Debug)]
pub enum HolderKind {
    /// Top-level holder with an optional filesystem root and ordered
    /// archetype ancestors, most specific first.
    Project {
        /// Project root directory, if the project maps to the filesystem
        root: Option<PathBuf>,
        /// Archetypes layered under the project in every scope
        archetypes: Vec<HolderId>,
    },
    /// Named holder layerable onto a scope via queries.
    Configuration {
        /// Parent configuration, consulted when this one misses
        parent: Option<HolderId>,
    },
    /// Configuration-like holder present in every scope of a project that
    /// lists it; never named in a query prefix.
    Archetype {
        /// Parent archetype
        parent: Option<HolderId>,
    },
    /// Holder attached to a configuration, consulted when its target
    /// appears in the scope being layered.
    ConfigurationExtension {
        /// The configuration this extension targets
        target: HolderId,
    },
    /// Unnamed configuration for programmatic scope layering.
    AnonymousConfiguration,
}

pub(crate) struct BindingHolder {
    pub(crate) name: String,
    pub(crate) kind: HolderKind,
    pub(crate) bindings: HashMap<String, Producer>,
    pub(crate) modifiers: HashMap<String, Vec<Modifier>>,
    /// target configuration -> extension holder provided by this holder
    pub(crate) extensions: HashMap<HolderId, HolderId>,
}

/// A complete build definition: the holder arena plus name registries.
///
/// A `Build` is mutable only while holders are being declared; handing it
/// to an evaluator freezes it for the life of the process.
#[derive(Default)]
pub struct Build {
    holders: Vec<BindingHolder>,
    projects: HashMap<String, HolderId>,
    configurations: HashMap<String, HolderId>,
}

impl Build {
    /// Create an empty build definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a named configuration.
    ///
    /// Bindings in the configuration shadow those in `parent`; the parent
    /// is searched only when the configuration itself misses.
    pub fn configuration(
        &mut self,
        name: impl Into<String>,
        parent: Option<HolderId>,
        configure: impl FnOnce(&mut HolderBuilder<'_>),
    ) -> Result<HolderId, KilnError> {
        let name = name.into();
        if self.configurations.contains_key(&name) {
            return Err(KilnError::DuplicateName {
                kind: "configuration",
                name,
            });
        }
        let id = self.push(name.clone(), HolderKind::Configuration { parent });
        self.configurations.insert(name, id);
        self.run_builder(id, configure);
        Ok(id)
    }

    /// Declare an archetype.
    pub fn archetype(
        &mut self,
        name: impl Into<String>,
        parent: Option<HolderId>,
        configure: impl FnOnce(&mut HolderBuilder<'_>),
    ) -> Result<HolderId, KilnError> {
        let name = name.into();
        if self.configurations.contains_key(&name) {
            return Err(KilnError::DuplicateName {
                kind: "archetype",
                name,
            });
        }
        let id = self.push(name.clone(), HolderKind::Archetype { parent });
        self.run_builder(id, configure);
        Ok(id)
    }

    /// Declare an anonymous configuration for programmatic layering.
    pub fn anonymous_configuration(
        &mut self,
        configure: impl FnOnce(&mut HolderBuilder<'_>),
    ) -> HolderId {
        let name = format!("<anonymous-{}>", self.holders.len());
        let id = self.push(name, HolderKind::AnonymousConfiguration);
        self.run_builder(id, configure);
        id
    }

    /// Declare a project with its archetype ancestors, most specific first.
    pub fn project(
        &mut self,
        name: impl Into<String>,
        root: Option<PathBuf>,
        archetypes: &[HolderId],
        configure: impl FnOnce(&mut HolderBuilder<'_>),
    ) -> Result<HolderId, KilnError> {
        let name = name.into();
        if self.projects.contains_key(&name) {
            return Err(KilnError::DuplicateName {
                kind: "project",
                name,
            });
        }
        let id = self.push(
            name.clone(),
            HolderKind::Project {
                root,
                archetypes: archetypes.to_vec(),
            },
        );
        self.projects.insert(name, id);
        self.run_builder(id, configure);
        Ok(id)
    }

    /// Look up a project by name.
    pub fn project_id(&self, name: &str) -> Option<HolderId> {
        self.projects.get(name).copied()
    }

    /// Look up a configuration or archetype by name.
    pub fn configuration_id(&self, name: &str) -> Option<HolderId> {
        self.configurations.get(name).copied()
    }

    /// Names of all declared projects, sorted.
    pub fn project_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.projects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Display name of a holder.
    pub fn holder_name(&self, id: HolderId) -> &str {
        &self.holder(id).name
    }

    /// Kind of a holder.
    pub fn holder_kind(&self, id: HolderId) -> &HolderKind {
        &self.holder(id).kind
    }

    /// Filesystem root of a project, if it declares one.
    pub fn project_root(&self, project: HolderId) -> Option<&PathBuf> {
        match &self.holder(project).kind {
            HolderKind::Project { root, .. } => root.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn holder(&self, id: HolderId) -> &BindingHolder {
        &self.holders[id.0 as usize]
    }

    /// Parent chain of a configuration or archetype, starting at `id`.
    pub(crate) fn parent_chain(&self, id: HolderId) -> Vec<HolderId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(holder) = current {
            chain.push(holder);
            current = match &self.holder(holder).kind {
                HolderKind::Configuration { parent } | HolderKind::Archetype { parent } => *parent,
                _ => None,
            };
        }
        chain
    }

    fn push(&mut self, name: String, kind: HolderKind) -> HolderId {
        let id = HolderId(self.holders.len() as u32);
        self.holders.push(BindingHolder {
            name,
            kind,
            bindings: HashMap::new(),
            modifiers: HashMap::new(),
            extensions: HashMap::new(),
        });
        id
    }

    fn run_builder(&mut self, holder: HolderId, configure: impl FnOnce(&mut HolderBuilder<'_>)) {
        let mut builder = HolderBuilder {
            build: self,
            holder,
        };
        configure(&mut builder);
    }
}

/// Write handle for a holder under construction.
///
/// Only exists for the duration of the construction closure; once the
/// closure returns the holder is locked.
pub struct HolderBuilder<'b> {
    build: &'b mut Build,
    holder: HolderId,
}

impl HolderBuilder<'_> {
    /// Bind `key` to a producer, replacing any previous binding for the
    /// same key in this holder.
    pub fn set<T: KeyValue>(
        &mut self,
        key: &Key<T>,
        producer: impl Fn(&mut Eval<'_>) -> Result<T> + Send + Sync + 'static,
    ) {
        let erased: Producer =
            Arc::new(move |ev| producer(ev).map(|value| Box::new(value) as DynValue));
        self.holder_mut().bindings.insert(key.name().to_string(), erased);
    }

    /// Bind `key` to a fixed value.
    pub fn set_value<T: KeyValue>(&mut self, key: &Key<T>, value: T) {
        self.set(key, move |_| Ok(value.clone()));
    }

    /// Append a modifier for `key`. Modifiers run after the producing
    /// binding, in declaration order within a holder.
    pub fn modify<T: KeyValue>(
        &mut self,
        key: &Key<T>,
        modifier: impl Fn(&mut Eval<'_>, T) -> Result<T> + Send + Sync + 'static,
    ) {
        let key_name = key.name().to_string();
        let erased: Modifier = Arc::new(move |ev, value| {
            let typed = value.downcast::<T>().map_err(|_| KilnError::ValueTypeMismatch {
                key: key_name.clone(),
            })?;
            modifier(ev, *typed).map(|v| Box::new(v) as DynValue)
        });
        self.holder_mut()
            .modifiers
            .entry(key.name().to_string())
            .or_default()
            .push(erased);
    }

    /// Attach an extension targeting `target`.
    ///
    /// The extension's bindings are consulted above `target` in any scope
    /// that layers `target` while this holder is in scope. Nested
    /// `extend` calls inside the closure create extensions-of-extensions.
    ///
    /// # Panics
    ///
    /// Panics when `target` is a project: extensions target configurations.
    pub fn extend(&mut self, target: HolderId, configure: impl FnOnce(&mut HolderBuilder<'_>)) {
        assert!(
            !matches!(self.build.holder(target).kind, HolderKind::Project { .. }),
            "extensions must target configurations, not projects"
        );
        let owner = self.holder;
        let name = format!(
            "{}.extend({})",
            self.build.holder(owner).name,
            self.build.holder(target).name
        );
        let extension = self
            .build
            .push(name, HolderKind::ConfigurationExtension { target });
        self.build
            .holders[owner.0 as usize]
            .extensions
            .insert(target, extension);
        self.build.run_builder(extension, configure);
    }

    /// Id of the holder being built, for self-referential wiring.
    pub fn id(&self) -> HolderId {
        self.holder
    }

    fn holder_mut(&mut self) -> &mut BindingHolder {
        &mut self.build.holders[self.holder.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_rejected() {
        let mut build = Build::new();
        build.configuration("compiling", None, |_| {}).unwrap();
        let err = build.configuration("compiling", None, |_| {}).unwrap_err();
        assert!(matches!(err, KilnError::DuplicateName { .. }));
    }

    #[test]
    fn test_parent_chain_order() {
        let mut build = Build::new();
        let base = build.configuration("base", None, |_| {}).unwrap();
        let mid = build.configuration("mid", Some(base), |_| {}).unwrap();
        let leaf = build.configuration("leaf", Some(mid), |_| {}).unwrap();
        assert_eq!(build.parent_chain(leaf), vec![leaf, mid, base]);
    }

    #[test]
    fn test_set_replaces_binding() {
        let key: Key<u32> = Key::new("n", "");
        let mut build = Build::new();
        let cfg = build
            .configuration("cfg", None, |c| {
                c.set_value(&key, 1);
                c.set_value(&key, 2);
            })
            .unwrap();
        assert_eq!(build.holder(cfg).bindings.len(), 1);
    }

    #[test]
    fn test_extension_registered_on_owner() {
        let mut build = Build::new();
        let target = build.configuration("target", None, |_| {}).unwrap();
        let owner = build
            .configuration("owner", None, |c| {
                c.extend(target, |_| {});
            })
            .unwrap();
        let ext = *build.holder(owner).extensions.get(&target).unwrap();
        assert!(matches!(
            build.holder(ext).kind,
            HolderKind::ConfigurationExtension { target: t } if t == target
        ));
    }
}
