//! Key-evaluation listener protocol.
//!
//! An evaluator holds at most one installed listener. Events are strictly
//! nested: every [`EvalListener::started`] is paired with exactly one
//! terminating event (`succeeded`, `failed_no_binding`, or `failed_error`)
//! at the same depth, with `has_modifiers` and `feature` events in
//! between. Listener callbacks execute synchronously on the evaluator
//! thread.

use colored::Colorize;

/// Feature tag emitted when a cached binding answers from its store.
pub const FEATURE_CACHE_HIT: &str = "cache-hit";

/// Feature tag emitted when a cached binding recomputes.
pub const FEATURE_CACHE_MISS: &str = "cache-miss";

/// Where an evaluated value came from.
#[derive(Clone, Copy, Debug)]
pub struct ValueOrigin<'a> {
    /// Display name of the scope whose holder bound the key
    pub scope: &'a str,
    /// Name of the holder that bound the key
    pub holder: &'a str,
}

/// Observer for key evaluation.
///
/// All methods have empty default bodies so listeners implement only what
/// they trace.
pub trait EvalListener: Send {
    /// A key evaluation began in `scope`.
    fn started(&mut self, scope: &str, key: &str) {
        let _ = (scope, key);
    }

    /// The walk found `count` modifiers for the key on `holder`.
    fn has_modifiers(&mut self, scope: &str, holder: &str, count: usize) {
        let _ = (scope, holder, count);
    }

    /// A tagged feature of this evaluation, e.g. cache hits.
    fn feature(&mut self, tag: &str) {
        let _ = tag;
    }

    /// The evaluation produced a value. `origin` is absent when the value
    /// came from the key's default.
    fn succeeded(&mut self, key: &str, origin: Option<ValueOrigin<'_>>, rendered: &str) {
        let _ = (key, origin, rendered);
    }

    /// No binding and no default existed. When the caller supplied a
    /// fallback it is rendered here and returned instead of an error.
    fn failed_no_binding(&mut self, has_fallback: bool, fallback: Option<&str>) {
        let _ = (has_fallback, fallback);
    }

    /// A binding (`from_binding`) or modifier (`!from_binding`) failed;
    /// the error propagates unchanged after this event.
    fn failed_error(&mut self, error: &anyhow::Error, from_binding: bool) {
        let _ = (error, from_binding);
    }
}

/// Listener that prints an indented evaluation trace to stderr.
///
/// Installed by the CLI under `--verbose`.
#[derive(Default)]
pub struct TraceListener {
    depth: usize,
}

impl TraceListener {
    /// Create a trace listener at depth zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }
}

impl EvalListener for TraceListener {
    fn started(&mut self, scope: &str, key: &str) {
        eprintln!("{}{} {}{}", self.indent(), "eval".dimmed(), scope.cyan(), key.bold());
        self.depth += 1;
    }

    fn has_modifiers(&mut self, _scope: &str, holder: &str, count: usize) {
        eprintln!("{}{} {count} from {holder}", self.indent(), "modifiers".dimmed());
    }

    fn feature(&mut self, tag: &str) {
        eprintln!("{}{} {tag}", self.indent(), "feature".dimmed());
    }

    fn succeeded(&mut self, _key: &str, origin: Option<ValueOrigin<'_>>, rendered: &str) {
        self.depth = self.depth.saturating_sub(1);
        match origin {
            Some(origin) => eprintln!(
                "{}{} {rendered} {} {}{}",
                self.indent(),
                "ok".green(),
                "from".dimmed(),
                origin.scope,
                origin.holder
            ),
            None => eprintln!("{}{} {rendered} {}", self.indent(), "ok".green(), "(default)".dimmed()),
        }
    }

    fn failed_no_binding(&mut self, has_fallback: bool, fallback: Option<&str>) {
        self.depth = self.depth.saturating_sub(1);
        if has_fallback {
            eprintln!(
                "{}{} unbound, using fallback {}",
                self.indent(),
                "miss".yellow(),
                fallback.unwrap_or("<unrendered>")
            );
        } else {
            eprintln!("{}{} unbound", self.indent(), "fail".red());
        }
    }

    fn failed_error(&mut self, error: &anyhow::Error, from_binding: bool) {
        self.depth = self.depth.saturating_sub(1);
        let source = if from_binding { "binding" } else { "modifier" };
        eprintln!("{}{} {source} failed: {error}", self.indent(), "fail".red());
    }
}
