//! The key evaluator.
//!
//! [`Evaluator::evaluate`] resolves a key against a scope: it walks from
//! the scope outward through its parents, visiting each scope's holders in
//! order (most significant first), collecting modifier lists as it goes,
//! and stops at the first holder that binds the key. The binding runs
//! under the *original* scope; collected modifiers are then applied
//! less-significant first, declaration order within a holder, so a
//! modifier declared in a more specific scope observes the value already
//! shaped by less specific ones and can override it. Modifiers beyond the
//! binding's holder are never collected.
//!
//! When no holder binds the key, the key's default value is used (with
//! all collected modifiers applied); without a default the evaluation
//! fails with [`KilnError::KeyNotAssigned`].
//!
//! # Concurrency
//!
//! Exactly one evaluator activation executes at a time per process. Entry
//! performs a thread-identity check and fails with
//! [`KilnError::EvaluatorBusy`] when a different thread attempts to
//! evaluate while an activation is in progress; re-entrance from the same
//! thread is counted so nested [`Eval::get`] calls unwind correctly.
//! Cancellation is cooperative: long-running bindings poll
//! [`Eval::check_cancelled`].

use crate::core::KilnError;
use crate::inputs::InputState;
use crate::keys::cache::ExpirySignal;
use crate::keys::holder::{Build, HolderId, Modifier, Producer};
use crate::keys::key::{DynValue, Key, KeyValue};
use crate::keys::listener::{EvalListener, ValueOrigin};
use crate::keys::scope::{ScopeArena, ScopeId};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// Callback asking the user for an input value: `(input key, prompt)` to
/// entered text, `None` when the user cancels.
pub type Prompter = Box<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

struct Activation {
    thread: Option<ThreadId>,
    depth: usize,
}

/// Evaluates keys against scopes of a locked [`Build`].
pub struct Evaluator {
    build: Build,
    scopes: Mutex<ScopeArena>,
    listener: Mutex<Option<Box<dyn EvalListener>>>,
    activation: Mutex<Activation>,
    cancel: Arc<AtomicBool>,
    prompter: Option<Prompter>,
    interactive: bool,
}

impl Evaluator {
    /// Take ownership of a build definition, freezing it.
    pub fn new(build: Build) -> Self {
        Self {
            build,
            scopes: Mutex::new(ScopeArena::new()),
            listener: Mutex::new(None),
            activation: Mutex::new(Activation {
                thread: None,
                depth: 0,
            }),
            cancel: Arc::new(AtomicBool::new(false)),
            prompter: None,
            interactive: false,
        }
    }

    /// Enable interactive prompting for missing inputs.
    #[must_use]
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Install the prompt callback used in interactive mode.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Prompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// The frozen build definition.
    pub fn build(&self) -> &Build {
        &self.build
    }

    /// Install or clear the evaluation listener. At most one listener is
    /// held at a time; installing replaces the previous one.
    pub fn set_listener(&self, listener: Option<Box<dyn EvalListener>>) {
        *self.listener.lock().expect("listener lock poisoned") = listener;
    }

    /// The cooperative cancellation flag shared with bindings.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Root scope of a project.
    pub fn project_scope(&self, project: HolderId) -> Result<ScopeId> {
        self.scopes
            .lock()
            .expect("scope arena poisoned")
            .project_scope(&self.build, project)
    }

    /// Root scope of a project looked up by name.
    pub fn project_scope_by_name(&self, name: &str) -> Result<ScopeId> {
        let project = self
            .build
            .project_id(name)
            .ok_or_else(|| KilnError::ProjectNotFound {
                name: name.to_string(),
            })?;
        self.project_scope(project)
    }

    /// Layer a configuration over a scope. Memoized: layering the same
    /// configuration over the same scope returns the same scope id.
    pub fn layer(&self, scope: ScopeId, configuration: HolderId) -> Result<ScopeId> {
        self.scopes
            .lock()
            .expect("scope arena poisoned")
            .layer(&self.build, scope, configuration)
    }

    /// Display name of a scope, e.g. `app/compiling:`.
    pub fn scope_name(&self, scope: ScopeId) -> String {
        self.scopes
            .lock()
            .expect("scope arena poisoned")
            .name(scope)
            .to_string()
    }

    /// Evaluate `key` in `scope`.
    ///
    /// # Errors
    ///
    /// [`KilnError::KeyNotAssigned`] when no binding and no default value
    /// exist; [`KilnError::EvaluatorBusy`] when called from a second
    /// thread during an active evaluation; errors from bindings and
    /// modifiers propagate unchanged.
    pub fn evaluate<T: KeyValue>(&self, scope: ScopeId, key: &Key<T>) -> Result<T> {
        self.evaluate_root(scope, key, Vec::new(), None)
    }

    /// Evaluate with ordered `(input key, text)` pairs available to
    /// [`Eval::read_input`]. Anonymous pairs (`None`) are free inputs.
    pub fn evaluate_with_inputs<T: KeyValue>(
        &self,
        scope: ScopeId,
        key: &Key<T>,
        inputs: Vec<(Option<String>, String)>,
    ) -> Result<T> {
        self.evaluate_root(scope, key, inputs, None)
    }

    /// Evaluate `key`, returning `fallback` instead of failing when the
    /// key has neither binding nor default.
    pub fn evaluate_or_else<T: KeyValue>(
        &self,
        scope: ScopeId,
        key: &Key<T>,
        fallback: T,
    ) -> Result<T> {
        self.evaluate_root(scope, key, Vec::new(), Some(fallback))
    }

    /// [`Self::evaluate_or_else`] with inputs.
    pub fn evaluate_or_else_with_inputs<T: KeyValue>(
        &self,
        scope: ScopeId,
        key: &Key<T>,
        fallback: T,
        inputs: Vec<(Option<String>, String)>,
    ) -> Result<T> {
        self.evaluate_root(scope, key, inputs, Some(fallback))
    }

    fn evaluate_root<T: KeyValue>(
        &self,
        scope: ScopeId,
        key: &Key<T>,
        inputs: Vec<(Option<String>, String)>,
        fallback: Option<T>,
    ) -> Result<T> {
        let _activation = self.enter()?;
        let input_state = InputState::new(inputs, self.interactive);
        self.evaluate_frame(scope, &input_state, key, fallback)
    }

    /// One evaluation frame: the lookup walk, binding invocation, and
    /// modifier chain. Shared by top-level and nested evaluations.
    fn evaluate_frame<T: KeyValue>(
        &self,
        scope: ScopeId,
        inputs: &InputState,
        key: &Key<T>,
        fallback: Option<T>,
    ) -> Result<T> {
        // Snapshot the walk order so no arena lock is held while user
        // bindings run.
        let chain: Vec<(String, Vec<HolderId>)> = {
            let arena = self.scopes.lock().expect("scope arena poisoned");
            arena
                .lookup_chain(scope)
                .into_iter()
                .map(|(id, holders)| (arena.name(id).to_string(), holders))
                .collect()
        };
        let scope_name = chain
            .first()
            .map(|(name, _)| name.clone())
            .unwrap_or_default();

        self.notify(|l| l.started(&scope_name, key.name()));

        let mut collected: Vec<Vec<Modifier>> = Vec::new();
        let mut origin: Option<(String, String, Producer)> = None;

        'walk: for (visited_scope, holders) in &chain {
            for &holder_id in holders {
                let holder = self.build.holder(holder_id);
                if let Some(modifiers) = holder.modifiers.get(key.name()) {
                    self.notify(|l| l.has_modifiers(visited_scope, &holder.name, modifiers.len()));
                    collected.push(modifiers.clone());
                }
                if let Some(producer) = holder.bindings.get(key.name()) {
                    origin = Some((
                        visited_scope.clone(),
                        holder.name.clone(),
                        Arc::clone(producer),
                    ));
                    break 'walk;
                }
            }
        }

        let mut eval = Eval {
            evaluator: self,
            scope,
            key: key.name().to_string(),
            inputs,
            expiry: Vec::new(),
        };

        let mut value: DynValue = match &origin {
            Some((_, _, producer)) => match producer(&mut eval) {
                Ok(value) => value,
                Err(error) => {
                    self.notify(|l| l.failed_error(&error, true));
                    return Err(error);
                }
            },
            None => match key.default_value() {
                Some(default) => Box::new(default),
                None => {
                    let rendered = fallback.as_ref().map(|f| key.render(f));
                    self.notify(|l| l.failed_no_binding(fallback.is_some(), rendered.as_deref()));
                    return fallback.ok_or_else(|| {
                        KilnError::KeyNotAssigned {
                            key: key.name().to_string(),
                            scope: scope_name.clone(),
                        }
                        .into()
                    });
                }
            },
        };

        // Outermost-last: modifiers collected later in the walk (less
        // significant) run first, so more significant holders get the
        // final word. Declaration order holds within a holder.
        for modifiers in collected.iter().rev() {
            for modifier in modifiers {
                value = match modifier(&mut eval, value) {
                    Ok(value) => value,
                    Err(error) => {
                        self.notify(|l| l.failed_error(&error, false));
                        return Err(error);
                    }
                };
            }
        }

        let typed: Box<T> = match value.downcast::<T>() {
            Ok(typed) => typed,
            Err(_) => {
                let error: anyhow::Error = KilnError::ValueTypeMismatch {
                    key: key.name().to_string(),
                }
                .into();
                self.notify(|l| l.failed_error(&error, true));
                return Err(error);
            }
        };

        let rendered = key.render(&typed);
        self.notify(|l| {
            let value_origin = origin.as_ref().map(|(scope, holder, _)| ValueOrigin {
                scope: scope.as_str(),
                holder: holder.as_str(),
            });
            l.succeeded(key.name(), value_origin, &rendered);
        });
        Ok(*typed)
    }

    fn enter(&self) -> Result<ActivationGuard<'_>> {
        let mut state = self.activation.lock().expect("activation lock poisoned");
        let current = thread::current().id();
        if state.depth > 0 && state.thread != Some(current) {
            return Err(KilnError::EvaluatorBusy.into());
        }
        state.thread = Some(current);
        state.depth += 1;
        Ok(ActivationGuard { evaluator: self })
    }

    fn notify(&self, event: impl FnOnce(&mut dyn EvalListener)) {
        if let Some(listener) = self
            .listener
            .lock()
            .expect("listener lock poisoned")
            .as_mut()
        {
            event(listener.as_mut());
        }
    }
}

struct ActivationGuard<'e> {
    evaluator: &'e Evaluator,
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .evaluator
            .activation
            .lock()
            .expect("activation lock poisoned");
        state.depth -= 1;
        if state.depth == 0 {
            state.thread = None;
        }
    }
}

/// Evaluation context handed to bindings and modifiers.
///
/// The only ambient state a binding sees: the current scope handle, nested
/// key reads, user-input reads, cache expiry signals, and the cooperative
/// cancellation flag.
pub struct Eval<'e> {
    evaluator: &'e Evaluator,
    scope: ScopeId,
    key: String,
    inputs: &'e InputState,
    expiry: Vec<ExpirySignal>,
}

impl Eval<'_> {
    /// The scope this evaluation runs under.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Display name of the current scope.
    pub fn scope_name(&self) -> String {
        self.evaluator.scope_name(self.scope)
    }

    /// The project of the current scope.
    pub fn project(&self) -> HolderId {
        self.evaluator
            .scopes
            .lock()
            .expect("scope arena poisoned")
            .project(self.scope)
    }

    /// The frozen build definition.
    pub fn build(&self) -> &Build {
        self.evaluator.build()
    }

    /// Read another key in the current scope (nested evaluation).
    pub fn get<T: KeyValue>(&mut self, key: &Key<T>) -> Result<T> {
        self.get_in(self.scope, key)
    }

    /// Read another key in an explicit scope.
    pub fn get_in<T: KeyValue>(&mut self, scope: ScopeId, key: &Key<T>) -> Result<T> {
        let _activation = self.evaluator.enter()?;
        self.evaluator.evaluate_frame(scope, self.inputs, key, None)
    }

    /// Read another key, falling back when it is unbound.
    pub fn get_or_else<T: KeyValue>(&mut self, key: &Key<T>, fallback: T) -> Result<T> {
        let _activation = self.evaluator.enter()?;
        self.evaluator
            .evaluate_frame(self.scope, self.inputs, key, Some(fallback))
    }

    /// Layer a configuration over the current scope.
    pub fn layer(&self, configuration: HolderId) -> Result<ScopeId> {
        self.evaluator.layer(self.scope, configuration)
    }

    /// Root scope of another project, for cross-project reads.
    pub fn project_scope(&self, name: &str) -> Result<ScopeId> {
        self.evaluator.project_scope_by_name(name)
    }

    /// Read a user input.
    ///
    /// Consults, in order: named stored inputs matching `input_key` (first
    /// unconsumed), free stored inputs in declaration order, then the
    /// interactive prompter when enabled. Candidates rejected by
    /// `validator` are skipped; the prompt re-asks until validated or
    /// canceled. Consumed inputs are never reused within the same
    /// top-level evaluation.
    pub fn read_input<V>(
        &mut self,
        input_key: &str,
        prompt: &str,
        validator: impl Fn(&str) -> Option<V>,
    ) -> Option<V> {
        if let Some(value) = self.inputs.read_stored(input_key, &validator) {
            return Some(value);
        }
        if self.inputs.interactive() {
            if let Some(prompter) = &self.evaluator.prompter {
                loop {
                    let text = prompter(input_key, prompt)?;
                    if let Some(value) = validator(&text) {
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    /// Whether cancellation has been requested.
    pub fn cancelled(&self) -> bool {
        self.evaluator.cancel.load(Ordering::Relaxed)
    }

    /// Fail fast when cancellation has been requested. Long-running
    /// bindings poll this between units of work.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancelled() {
            return Err(KilnError::EvaluationCanceled {
                key: self.key.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Mark the value being computed as non-cacheable.
    pub fn expires_now(&mut self) {
        self.expiry.push(ExpirySignal::Now);
    }

    /// Expire the value being computed when `path`'s mtime changes.
    pub fn expires_with(&mut self, path: std::path::PathBuf) {
        self.expiry.push(ExpirySignal::WithPath(path));
    }

    /// Expire the value being computed when `predicate` turns true.
    pub fn expires_when(&mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) {
        self.expiry.push(ExpirySignal::When(Arc::new(predicate)));
    }

    /// Forward a feature tag to the installed listener.
    pub(crate) fn feature(&self, tag: &str) {
        self.evaluator.notify(|l| l.feature(tag));
    }

    /// Drain expiry signals recorded since the last call. Used by cached
    /// binding wrappers after their compute function returns.
    pub(crate) fn take_expiry_signals(&mut self) -> Vec<ExpirySignal> {
        std::mem::take(&mut self.expiry)
    }
}
