//! kiln - a JVM build tool engine.
//!
//! kiln is built around three pieces of engineering:
//!
//! - a **scoped, lazily evaluated key-graph**: build definitions declare
//!   projects, configurations, archetypes and typed keys; values come
//!   from bindings looked up through a layered stack of binding holders,
//!   shaped by modifiers and configuration extensions, and memoized per
//!   dependency fingerprint;
//! - a **Maven-2 compatible dependency resolver**: transitive graphs
//!   with classical nearest-wins mediation, POM parent inheritance and
//!   property interpolation, scope propagation, snapshot semantics,
//!   checksum-validated fetches through a repository chain with a local
//!   cache;
//! - an **assembly pipeline** flattening classpaths into one
//!   deterministic archive with rename and conflict strategies.
//!
//! Users invoke keys through query strings (`project/config:key input`)
//! from the command line; the evaluator constructs the scope, looks up
//! the binding (possibly triggering nested reads into the resolver and
//! assembler), returns the value, and emits trace events to an optional
//! listener.
//!
//! # Core Modules
//!
//! - [`keys`] - typed keys, binding holders, scopes, the evaluator,
//!   evaluation caches, and the standard JVM build keys
//! - [`resolver`] - coordinates, repositories, POM reading, artifact
//!   fetching and transitive resolution
//! - [`assembly`] - fat-archive construction
//! - [`query`] - query-string parsing
//! - [`inputs`] - ordered user-input sourcing for key evaluation
//! - [`output`] - machine-readable result formatting
//! - [`cli`] - the command-line surface
//! - [`core`] - error types and user-facing error presentation
//! - [`utils`] - atomic writes and filesystem helpers
//!
//! # Example
//!
//! ```no_run
//! use kiln::keys::standard::{self, BuildOptions, TaskRegistry};
//! use kiln::keys::Evaluator;
//!
//! # fn main() -> anyhow::Result<()> {
//! let build = standard::default_build(&BuildOptions {
//!     root: std::env::current_dir()?,
//!     offline: false,
//!     local_repository: None,
//! })?;
//! let evaluator = Evaluator::new(build);
//! let scope = evaluator.project_scope_by_name(
//!     evaluator.build().project_names()[0],
//! )?;
//! let classpath = evaluator.evaluate(scope, &standard::EXTERNAL_CLASSPATH)?;
//! println!("{} entries", classpath.len());
//! # Ok(())
//! # }
//! ```

pub mod assembly;
pub mod cli;
pub mod constants;
pub mod core;
pub mod inputs;
pub mod keys;
pub mod output;
pub mod query;
pub mod resolver;
pub mod utils;
