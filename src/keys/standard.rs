//! Standard JVM build keys, archetypes, and the task registry.
//!
//! The engine ships the key surface a JVM build definition starts from:
//! project identity, repositories, dependency resolution, classpath
//! aggregation, run options, assembly, and cache cleaning. Everything is
//! expressed through ordinary bindings on the `jvmBase` archetype, so
//! projects and configurations override any of it the usual way.
//!
//! The [`TaskRegistry`] maps key names from queries to type-erased
//! evaluations with a machine-renderable result, which is all the CLI
//! needs to drive the engine.

use crate::assembly::{
    self, AssemblyOptions, AssemblySource, MapFilter, MergeStrategy, RenameFn, StrategyChooser,
};
use crate::constants;
use crate::core::KilnError;
use crate::keys::cache::{cached_by, Fingerprint, ToFingerprint};
use crate::keys::evaluator::{Eval, Evaluator};
use crate::keys::holder::{Build, HolderId};
use crate::keys::key::{Key, KeyValue};
use crate::keys::scope::ScopeId;
use crate::output::TaskResult;
use crate::resolver::{
    resolve_dependencies, DepScope, Dependency, Fetcher, Repository,
};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Name of the project.
pub static PROJECT_NAME: Lazy<Key<String>> = Lazy::new(|| {
    Key::new("projectName", "Name of the project").with_printer(Clone::clone)
});

/// Filesystem root of the project.
pub static PROJECT_ROOT: Lazy<Key<PathBuf>> = Lazy::new(|| {
    Key::new("projectRoot", "Root directory of the project").with_printer(path_printer)
});

/// Directory holding build outputs, caches and logs.
pub static BUILD_DIRECTORY: Lazy<Key<PathBuf>> = Lazy::new(|| {
    Key::new("buildDirectory", "Directory with build outputs and internal caches")
        .with_printer(path_printer)
});

/// Repositories consulted by dependency resolution.
pub static REPOSITORIES: Lazy<Key<Vec<Repository>>> = Lazy::new(|| {
    Key::new("repositories", "Repositories used to resolve library dependencies")
        .with_printer(|repositories: &Vec<Repository>| {
            repositories
                .iter()
                .map(|r| r.name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        })
});

/// Whether remote fetches are disabled.
pub static OFFLINE: Lazy<Key<bool>> = Lazy::new(|| {
    Key::new("offline", "Rely on local caches only, without remote fetches")
        .with_default(false)
        .with_printer(ToString::to_string)
});

/// Declared library dependencies.
pub static LIBRARY_DEPENDENCIES: Lazy<Key<Vec<Dependency>>> = Lazy::new(|| {
    Key::new("libraryDependencies", "Library dependencies of the project")
        .with_default(Vec::new())
        .with_printer(|dependencies: &Vec<Dependency>| {
            dependencies
                .iter()
                .map(|d| d.id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        })
});

/// Names of projects this project depends on (aggregate scope).
pub static PROJECT_DEPENDENCIES: Lazy<Key<Vec<String>>> = Lazy::new(|| {
    Key::new("projectDependencies", "Projects whose classpaths this project aggregates")
        .with_default(Vec::new())
});

/// Artifacts of the resolved library dependencies.
pub static RESOLVED_LIBRARY_DEPENDENCIES: Lazy<Key<Vec<PathBuf>>> = Lazy::new(|| {
    Key::new(
        "resolvedLibraryDependencies",
        "Artifact files of library dependencies after transitive resolution",
    )
});

/// Classpath contributed by library dependencies and dependency projects.
pub static EXTERNAL_CLASSPATH: Lazy<Key<Vec<PathBuf>>> = Lazy::new(|| {
    Key::new("externalClasspath", "Classpath entries from libraries and dependency projects")
});

/// Classpath produced by this project itself.
pub static INTERNAL_CLASSPATH: Lazy<Key<Vec<PathBuf>>> = Lazy::new(|| {
    Key::new("internalClasspath", "Classpath entries produced by the project itself")
        .with_default(Vec::new())
});

/// JVM options for launched processes.
pub static RUN_OPTIONS: Lazy<Key<Vec<String>>> = Lazy::new(|| {
    Key::new("runOptions", "JVM options for launched processes")
        .with_printer(|options: &Vec<String>| options.join(" "))
});

/// Environment variables forwarded to launched processes.
pub static RUN_ENVIRONMENT: Lazy<Key<HashMap<String, String>>> = Lazy::new(|| {
    Key::new("runEnvironment", "Environment variables forwarded to launched processes")
        .with_default(HashMap::new())
});

/// Classpath entries flattened into the assembly.
pub static ASSEMBLY_SOURCES: Lazy<Key<Vec<AssemblySource>>> = Lazy::new(|| {
    Key::new("assemblySources", "Classpath entries flattened into the assembly archive")
});

/// Per-path merge strategy for assembly conflicts.
pub static ASSEMBLY_MERGE_STRATEGY: Lazy<Key<MergeChooserValue>> = Lazy::new(|| {
    Key::new("assemblyMergeStrategy", "Conflict resolution per archive path")
        .with_default(MergeChooserValue::default())
});

/// Internal-path rename applied during assembly (shading).
pub static ASSEMBLY_RENAME: Lazy<Key<RenameValue>> = Lazy::new(|| {
    Key::new("assemblyRename", "Rename function applied to archive paths")
        .with_default(RenameValue(None))
});

/// Filter dropping or transforming assembly entries.
pub static ASSEMBLY_MAP_FILTER: Lazy<Key<MapFilterValue>> = Lazy::new(|| {
    Key::new("assemblyMapFilter", "Filter applied to resolved assembly entries")
        .with_default(MapFilterValue(None))
});

/// Bytes prepended to the archive for self-executing outputs.
pub static ASSEMBLY_PREPEND_DATA: Lazy<Key<Vec<u8>>> = Lazy::new(|| {
    Key::new("assemblyPrependData", "Bytes prepended to the assembly archive")
        .with_default(Vec::new())
});

/// Output path of the assembly archive.
pub static ASSEMBLY_OUTPUT: Lazy<Key<PathBuf>> = Lazy::new(|| {
    Key::new("assemblyOutput", "Where the assembly archive is written")
        .with_printer(path_printer)
});

/// Build the assembly archive; evaluates to its path.
pub static ASSEMBLY: Lazy<Key<PathBuf>> = Lazy::new(|| {
    Key::new("assembly", "Flatten the classpath into a single archive")
        .with_printer(path_printer)
});

/// Delete deletable build-cache entries; evaluates to the removed count.
pub static CLEAN: Lazy<Key<u32>> = Lazy::new(|| {
    Key::new("clean", "Delete expendable build-cache entries")
        .with_printer(ToString::to_string)
});

fn path_printer(path: &PathBuf) -> String {
    path.display().to_string()
}

/// Clone-able wrapper for the assembly strategy chooser.
#[derive(Clone)]
pub struct MergeChooserValue(pub Arc<StrategyChooser>);

impl Default for MergeChooserValue {
    fn default() -> Self {
        Self(Arc::new(assembly::no_conflict_chooser))
    }
}

impl MergeChooserValue {
    /// Choose one strategy for every conflict.
    pub fn always(strategy: MergeStrategy) -> Self {
        Self(Arc::new(move |_| strategy))
    }
}

/// Clone-able wrapper for the assembly rename hook.
#[derive(Clone, Default)]
pub struct RenameValue(pub Option<Arc<RenameFn>>);

/// Clone-able wrapper for the assembly map-filter.
#[derive(Clone, Default)]
pub struct MapFilterValue(pub Option<Arc<MapFilter>>);

/// Options for constructing a standard build definition.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Root directory of the (default) project
    pub root: PathBuf,
    /// Disable remote fetches
    pub offline: bool,
    /// Local repository cache directory; `~/.m2/repository` when unset
    pub local_repository: Option<PathBuf>,
}

/// A standard build definition plus the holder ids needed to extend it.
pub struct StandardBuild {
    /// The build under construction
    pub build: Build,
    /// The `jvmBase` archetype every JVM project lists
    pub jvm_base: HolderId,
    /// Standard layering point for compilation settings
    pub compiling: HolderId,
    /// Standard layering point for run settings
    pub running: HolderId,
    /// Standard layering point for test settings
    pub testing: HolderId,
}

/// Create the standard build: the `jvmBase` archetype with default
/// bindings and the standard configurations.
pub fn standard_build(options: &BuildOptions) -> Result<StandardBuild> {
    let mut build = Build::new();
    let root = options.root.clone();
    let offline = options.offline;
    let local_repository = options
        .local_repository
        .clone()
        .unwrap_or_else(Repository::default_local_repository_dir);

    let jvm_base = build.archetype("jvmBase", None, |holder| {
        holder.set_value(&PROJECT_ROOT, root.clone());
        holder.set(&BUILD_DIRECTORY, |ev| Ok(ev.get(&PROJECT_ROOT)?.join("build")));
        holder.set_value(&OFFLINE, offline);
        holder.set_value(
            &REPOSITORIES,
            vec![Repository::maven_central(&local_repository)],
        );

        holder.set(
            &RESOLVED_LIBRARY_DEPENDENCIES,
            cached_by(resolution_fingerprint, resolve_library_dependencies),
        );
        holder.set(&EXTERNAL_CLASSPATH, aggregate_external_classpath);
        holder.set(&RUN_OPTIONS, run_options);

        holder.set(&ASSEMBLY_SOURCES, |ev| {
            let mut sources: Vec<AssemblySource> = ev
                .get(&INTERNAL_CLASSPATH)?
                .into_iter()
                .map(|path| AssemblySource::classpath_entry(path, true))
                .collect();
            sources.extend(
                ev.get(&EXTERNAL_CLASSPATH)?
                    .into_iter()
                    .map(|path| AssemblySource::classpath_entry(path, false)),
            );
            Ok(sources)
        });
        holder.set(&ASSEMBLY_OUTPUT, |ev| {
            let name = ev.get(&PROJECT_NAME)?;
            Ok(ev
                .get(&BUILD_DIRECTORY)?
                .join("artifacts")
                .join(format!("{name}-assembly.jar")))
        });
        holder.set(&ASSEMBLY, run_assembly);
        holder.set(&CLEAN, clean_build_cache);
    })?;

    let compiling = build.configuration("compiling", None, |_| {})?;
    let running = build.configuration("running", None, |_| {})?;
    let testing = build.configuration("testing", None, |_| {})?;

    Ok(StandardBuild {
        build,
        jvm_base,
        compiling,
        running,
        testing,
    })
}

/// Add a project over the standard archetype.
pub fn add_project(
    build: &mut Build,
    jvm_base: HolderId,
    name: &str,
    root: &Path,
) -> Result<HolderId, KilnError> {
    let project_name = name.to_string();
    let project_root = root.to_path_buf();
    build.project(name, Some(project_root.clone()), &[jvm_base], |holder| {
        holder.set_value(&PROJECT_NAME, project_name);
        holder.set_value(&PROJECT_ROOT, project_root);
    })
}

/// The standard build with a single project named after its root
/// directory. This is what the CLI operates on.
pub fn default_build(options: &BuildOptions) -> Result<Build> {
    let mut standard = standard_build(options)?;
    let name = options
        .root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| crate::query::is_identifier(n))
        .unwrap_or_else(|| "root".to_string());
    add_project(&mut standard.build, standard.jvm_base, &name, &options.root)?;
    Ok(standard.build)
}

fn resolution_fingerprint(ev: &mut Eval<'_>) -> Result<Fingerprint> {
    let dependencies = ev.get(&LIBRARY_DEPENDENCIES)?;
    let repositories = ev.get(&REPOSITORIES)?;
    let offline = ev.get(&OFFLINE)?;
    let mut elements: Vec<String> = dependencies
        .iter()
        .map(|d| format!("{}:{}", d.id, d.scope))
        .collect();
    elements.extend(repositories.iter().map(|r| r.url.clone()));
    Ok((elements, offline).to_fingerprint())
}

fn resolve_library_dependencies(ev: &mut Eval<'_>) -> Result<Vec<PathBuf>> {
    ev.check_cancelled()?;
    let dependencies = ev.get(&LIBRARY_DEPENDENCIES)?;
    if dependencies.is_empty() {
        return Ok(Vec::new());
    }
    let repositories = ev.get(&REPOSITORIES)?;
    let offline = ev.get(&OFFLINE)?;
    let fetcher = Fetcher::new(offline)?;
    let graph = resolve_dependencies(&dependencies, &repositories, None, &fetcher);
    let artifacts = graph.artifacts_where(|node| node.scope != DepScope::Test)?;
    Ok(artifacts.into_iter().map(|artifact| artifact.path).collect())
}

thread_local! {
    /// Projects currently aggregating their classpaths; a repeat is a
    /// dependency cycle.
    static AGGREGATION_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

struct AggregationGuard;

impl Drop for AggregationGuard {
    fn drop(&mut self) {
        AGGREGATION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn aggregate_external_classpath(ev: &mut Eval<'_>) -> Result<Vec<PathBuf>> {
    let name = ev.get(&PROJECT_NAME)?;
    let cycle = AGGREGATION_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.contains(&name) {
            let mut chain: Vec<String> = stack.clone();
            chain.push(name.clone());
            Some(chain.join(" -> "))
        } else {
            stack.push(name.clone());
            None
        }
    });
    if let Some(chain) = cycle {
        return Err(KilnError::CyclicProjectDependency { chain }.into());
    }
    let _guard = AggregationGuard;

    let mut classpath = ev.get(&RESOLVED_LIBRARY_DEPENDENCIES)?;
    for dependency in ev.get(&PROJECT_DEPENDENCIES)? {
        let scope = ev.project_scope(&dependency)?;
        classpath.extend(ev.get_in(scope, &INTERNAL_CLASSPATH)?);
        classpath.extend(ev.get_in(scope, &EXTERNAL_CLASSPATH)?);
    }

    let mut seen = std::collections::HashSet::new();
    classpath.retain(|path| seen.insert(path.clone()));
    Ok(classpath)
}

fn run_options(ev: &mut Eval<'_>) -> Result<Vec<String>> {
    let _ = ev;
    let mut options = vec!["-Dfile.encoding=UTF-8".to_string()];
    if let Ok(port) = std::env::var(constants::RUN_DEBUG_PORT_ENV) {
        match port.trim().parse::<u32>() {
            Ok(port) => options.push(format!(
                "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address={port}"
            )),
            Err(_) => warn!(
                "{} is set but not an integer: {port}",
                constants::RUN_DEBUG_PORT_ENV
            ),
        }
    }
    Ok(options)
}

fn run_assembly(ev: &mut Eval<'_>) -> Result<PathBuf> {
    ev.check_cancelled()?;
    let sources = ev.get(&ASSEMBLY_SOURCES)?;
    let chooser = ev.get(&ASSEMBLY_MERGE_STRATEGY)?;
    let rename = ev.get(&ASSEMBLY_RENAME)?;
    let map_filter = ev.get(&ASSEMBLY_MAP_FILTER)?;
    let prepend = ev.get(&ASSEMBLY_PREPEND_DATA)?;
    let output = ev.get(&ASSEMBLY_OUTPUT)?;

    let options = AssemblyOptions {
        rename: rename.0,
        strategy_chooser: chooser.0,
        map_filter: map_filter.0,
        prepend_data: (!prepend.is_empty()).then_some(prepend),
        compress: true,
    };
    assembly::assemble(&sources, &options, &output)
}

fn clean_build_cache(ev: &mut Eval<'_>) -> Result<u32> {
    let cache_dir = ev.get(&BUILD_DIRECTORY)?.join(constants::BUILD_CACHE_DIR);
    let mut removed = 0u32;
    if !cache_dir.is_dir() {
        return Ok(0);
    }
    for entry in fs::read_dir(&cache_dir)
        .with_context(|| format!("Failed to list {}", cache_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(constants::CACHE_DELETABLE_PREFIX) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// A key evaluation erased to a name and a machine-renderable result.
trait ErasedTask: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn run(
        &self,
        evaluator: &Evaluator,
        scope: ScopeId,
        inputs: Vec<(Option<String>, String)>,
    ) -> Result<TaskResult>;
}

struct Task<T: KeyValue, F> {
    key: Key<T>,
    render: F,
}

impl<T, F> ErasedTask for Task<T, F>
where
    T: KeyValue,
    F: Fn(&T) -> TaskResult + Send + Sync,
{
    fn name(&self) -> &str {
        self.key.name()
    }

    fn description(&self) -> &str {
        self.key.description()
    }

    fn run(
        &self,
        evaluator: &Evaluator,
        scope: ScopeId,
        inputs: Vec<(Option<String>, String)>,
    ) -> Result<TaskResult> {
        let value = evaluator.evaluate_with_inputs(scope, &self.key, inputs)?;
        Ok((self.render)(&value))
    }
}

/// Registry mapping key names from queries to evaluatable tasks.
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn ErasedTask>>,
}

impl TaskRegistry {
    /// Registry of the standard keys.
    pub fn standard() -> Self {
        let mut registry = Self {
            tasks: HashMap::new(),
        };
        registry.register(PROJECT_NAME.clone(), |name| TaskResult::Scalar(name.clone()));
        registry.register(PROJECT_ROOT.clone(), path_result);
        registry.register(BUILD_DIRECTORY.clone(), path_result);
        registry.register(OFFLINE.clone(), |offline: &bool| {
            TaskResult::Scalar(offline.to_string())
        });
        registry.register(REPOSITORIES.clone(), |repositories: &Vec<Repository>| {
            TaskResult::List(repositories.iter().map(|r| r.url.clone()).collect())
        });
        registry.register(
            LIBRARY_DEPENDENCIES.clone(),
            |dependencies: &Vec<Dependency>| {
                TaskResult::List(dependencies.iter().map(|d| d.id.to_string()).collect())
            },
        );
        registry.register(PROJECT_DEPENDENCIES.clone(), |names: &Vec<String>| {
            TaskResult::List(names.clone())
        });
        registry.register(RESOLVED_LIBRARY_DEPENDENCIES.clone(), paths_result);
        registry.register(EXTERNAL_CLASSPATH.clone(), paths_result);
        registry.register(INTERNAL_CLASSPATH.clone(), paths_result);
        registry.register(RUN_OPTIONS.clone(), |options: &Vec<String>| {
            TaskResult::List(options.clone())
        });
        registry.register(
            RUN_ENVIRONMENT.clone(),
            |environment: &HashMap<String, String>| {
                let mut pairs: Vec<String> = environment
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect();
                pairs.sort();
                TaskResult::List(pairs)
            },
        );
        registry.register(ASSEMBLY_OUTPUT.clone(), path_result);
        registry.register(ASSEMBLY.clone(), path_result);
        registry.register(CLEAN.clone(), |removed: &u32| {
            TaskResult::Scalar(removed.to_string())
        });
        registry
    }

    /// Register a key with its result renderer, replacing any previous
    /// task under the same name.
    pub fn register<T: KeyValue>(
        &mut self,
        key: Key<T>,
        render: impl Fn(&T) -> TaskResult + Send + Sync + 'static,
    ) {
        let name = key.name().to_string();
        self.tasks.insert(name, Arc::new(Task { key, render }));
    }

    /// Evaluate a registered task.
    pub fn run(
        &self,
        name: &str,
        evaluator: &Evaluator,
        scope: ScopeId,
        inputs: Vec<(Option<String>, String)>,
    ) -> Result<TaskResult> {
        let task = self.tasks.get(name).ok_or_else(|| KilnError::UnknownKey {
            name: name.to_string(),
        })?;
        task.run(evaluator, scope, inputs)
    }

    /// Registered task names with descriptions, sorted by name.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .tasks
            .values()
            .map(|task| (task.name().to_string(), task.description().to_string()))
            .collect();
        out.sort();
        out
    }
}

fn path_result(path: &PathBuf) -> TaskResult {
    TaskResult::Scalar(absolute(path))
}

fn paths_result(paths: &Vec<PathBuf>) -> TaskResult {
    TaskResult::List(paths.iter().map(|p| absolute(p)).collect())
}

/// Machine output renders paths absolute.
fn absolute(path: &Path) -> String {
    if path.is_absolute() {
        path.display().to_string()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string()
    }
}
