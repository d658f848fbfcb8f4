//! Scope arena, layering, and memoization.
//!
//! A scope is a reverse linked-list node: an ordered holder list plus an
//! optional parent scope. Scopes live in an arena and are referenced by
//! index; the arena memoizes children by `(parent, configuration)`, so two
//! scopes derived by the same sequence are the same index. Scope identity
//! therefore depends only on the project and the configuration stack.
//!
//! Layering a configuration expands it with the configuration extensions
//! in effect: every extension targeting a holder being layered is inserted
//! above its target, recursively, so extensions-of-extensions land above
//! the extensions they target. The expansion is a worklist over the holder
//! arena guarded by a visited set.

use crate::keys::holder::{Build, HolderId, HolderKind};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};

/// Index of a scope inside the evaluator's arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ScopeId(u32);

pub(crate) struct ScopeData {
    /// Display name, e.g. `app/compiling:`
    name: String,
    /// Holders, most significant first
    holders: Vec<HolderId>,
    parent: Option<ScopeId>,
    project: HolderId,
    /// Memoized children by layered configuration
    children: HashMap<HolderId, ScopeId>,
}

#[derive(Default)]
pub(crate) struct ScopeArena {
    scopes: Vec<ScopeData>,
    roots: HashMap<HolderId, ScopeId>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// The root scope of a project: the project holder followed by its
    /// archetypes (most specific first), each expanded with its parents.
    pub fn project_scope(&mut self, build: &Build, project: HolderId) -> Result<ScopeId> {
        if let Some(&existing) = self.roots.get(&project) {
            return Ok(existing);
        }

        let archetypes = match build.holder_kind(project) {
            HolderKind::Project { archetypes, .. } => archetypes.clone(),
            _ => bail!("holder '{}' is not a project", build.holder_name(project)),
        };

        let mut holders = vec![project];
        let mut seen: HashSet<HolderId> = holders.iter().copied().collect();
        for archetype in archetypes {
            for holder in build.parent_chain(archetype) {
                if seen.insert(holder) {
                    holders.push(holder);
                }
            }
        }

        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            name: format!("{}/", build.holder_name(project)),
            holders,
            parent: None,
            project,
            children: HashMap::new(),
        });
        self.roots.insert(project, id);
        Ok(id)
    }

    /// Layer a configuration over an existing scope, memoized.
    pub fn layer(&mut self, build: &Build, parent: ScopeId, config: HolderId) -> Result<ScopeId> {
        match build.holder_kind(config) {
            HolderKind::Configuration { .. } | HolderKind::AnonymousConfiguration => {}
            _ => bail!(
                "holder '{}' cannot be layered: not a configuration",
                build.holder_name(config)
            ),
        }
        if let Some(&existing) = self.scope(parent).children.get(&config) {
            return Ok(existing);
        }

        // Extension providers outside the new scope: the full holder chain
        // of the scope being layered onto, in significance order.
        let outer = self.chain_holders(parent);
        let config_chain = build.parent_chain(config);

        let mut holders = Vec::new();
        let mut visited = HashSet::new();
        for &cfg in &config_chain {
            push_expanded(build, cfg, &mut holders, &config_chain, &outer, &mut visited);
        }

        let name = format!(
            "{}{}:",
            self.scope(parent).name,
            build.holder_name(config)
        );
        let project = self.scope(parent).project;
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            name,
            holders,
            parent: Some(parent),
            project,
            children: HashMap::new(),
        });
        self.scope_mut(parent).children.insert(config, id);
        Ok(id)
    }

    /// Display name of a scope.
    pub fn name(&self, scope: ScopeId) -> &str {
        &self.scope(scope).name
    }

    /// The project this scope derives from.
    pub fn project(&self, scope: ScopeId) -> HolderId {
        self.scope(scope).project
    }

    /// The walk order for binding lookup: `(scope, holders)` pairs from the
    /// given scope outward through its parents.
    pub fn lookup_chain(&self, scope: ScopeId) -> Vec<(ScopeId, Vec<HolderId>)> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let data = self.scope(id);
            chain.push((id, data.holders.clone()));
            current = data.parent;
        }
        chain
    }

    /// All holders visible from a scope, most significant first.
    fn chain_holders(&self, scope: ScopeId) -> Vec<HolderId> {
        let mut holders = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let data = self.scope(id);
            holders.extend(data.holders.iter().copied());
            current = data.parent;
        }
        holders
    }

    fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.0 as usize]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeData {
        &mut self.scopes[id.0 as usize]
    }
}

/// Append `target` to `out`, preceded by every extension in effect that
/// targets it, recursively.
///
/// Providers are searched in significance order: holders already layered
/// into the new scope, then the configuration chain being layered, then
/// the outer scope chain. When two providers extend the same target, the
/// more significant provider's extension lands earlier in the holder list
/// and is therefore applied later over the value chain.
fn push_expanded(
    build: &Build,
    target: HolderId,
    out: &mut Vec<HolderId>,
    config_chain: &[HolderId],
    outer: &[HolderId],
    visited: &mut HashSet<HolderId>,
) {
    if !visited.insert(target) {
        return;
    }

    let providers: Vec<HolderId> = out
        .iter()
        .chain(config_chain.iter())
        .chain(outer.iter())
        .copied()
        .collect();
    for provider in providers {
        if let Some(&extension) = build.holder(provider).extensions.get(&target) {
            push_expanded(build, extension, out, config_chain, outer, visited);
        }
    }
    out.push(target);
}
