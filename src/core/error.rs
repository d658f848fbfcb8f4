//! Error handling for kiln.
//!
//! The error system is designed around two core principles:
//! 1. **Strongly-typed errors** for precise error handling in code
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! Two main types implement this:
//! - [`KilnError`] - enumerated error types for all failure cases in kiln
//! - [`ErrorContext`] - wrapper that adds user-friendly messages and suggestions
//!
//! Errors fall into a few classes with different presentation rules:
//! - *Key not assigned* and *resolution incomplete* are user-level failures:
//!   they render as a short message (plus, for resolution, a per-coordinate
//!   failure tree) with no stack trace.
//! - *Binding failures* are user-code failures: the underlying error chain is
//!   preserved and printed in full.
//! - Everything else (checksum mismatch, assembly conflict, cyclic project
//!   dependencies, query syntax) renders as a short message with a suggestion.
//!
//! Use [`user_friendly_error`] to convert any [`anyhow::Error`] into a
//! displayable [`ErrorContext`].

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for kiln operations.
///
/// Each variant represents a specific failure mode and carries the context
/// needed to render an actionable message. Variants that wrap user-provided
/// code (bindings, modifiers) preserve the underlying error chain; variants
/// describing expected user-level failures do not.
#[derive(Error, Debug)]
pub enum KilnError {
    /// A key was evaluated in a scope where no holder binds it and the key
    /// declares no default value.
    ///
    /// This is a user-level failure: it renders without a stack trace.
    #[error("key '{key}' is not assigned in scope {scope}")]
    KeyNotAssigned {
        /// Name of the key that had no binding
        key: String,
        /// Display name of the scope the lookup started from
        scope: String,
    },

    /// A second thread attempted to evaluate while an activation was in
    /// progress on another thread.
    ///
    /// Evaluation is single-threaded and cooperative; only same-thread
    /// re-entrance is permitted.
    #[error("evaluator is busy: evaluation is active on another thread")]
    EvaluatorBusy,

    /// A key evaluation was canceled through the cooperative cancel flag.
    #[error("evaluation of '{key}' was canceled")]
    EvaluationCanceled {
        /// Name of the key whose binding observed the cancellation
        key: String,
    },

    /// One or more dependency nodes failed to resolve.
    ///
    /// Per-node reasons are aggregated into `tree`, a pre-rendered listing of
    /// failing coordinates and the repositories attempted for each. The
    /// resolver collects the complete failure set before raising this, so the
    /// user sees every missing artifact at once.
    #[error("dependency resolution incomplete:\n{tree}")]
    ResolutionIncomplete {
        /// Pretty-printed failure tree, one branch per failing coordinate
        tree: String,
    },

    /// A fetched artifact did not match its published checksum.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// URL of the artifact whose bytes failed verification
        url: String,
        /// Checksum published by the repository (hex)
        expected: String,
        /// Checksum computed over the fetched bytes (hex)
        actual: String,
    },

    /// Two or more classpath entries produced the same archive path and the
    /// configured merge strategy refused to pick one.
    ///
    /// The assembly aborts and no partial output file is left behind.
    #[error("assembly conflict at '{path}': {candidates} candidates and no merge strategy accepts the conflict")]
    AssemblyConflict {
        /// Path inside the output archive where the conflict occurred
        path: String,
        /// Number of conflicting candidates
        candidates: usize,
    },

    /// Projects depend on each other in a cycle.
    ///
    /// Detected at classpath aggregation entry; fatal, no recovery.
    #[error("cyclic project dependency: {chain}")]
    CyclicProjectDependency {
        /// The dependency chain showing the cycle, e.g. `a -> b -> a`
        chain: String,
    },

    /// A query string did not match the query grammar.
    #[error("invalid query at offset {offset}: {reason}")]
    QueryParseError {
        /// Byte offset into the query string where parsing failed
        offset: usize,
        /// What the parser expected or rejected
        reason: String,
    },

    /// A project descriptor (POM) could not be parsed or its parent chain
    /// could not be assembled.
    #[error("failed to read project descriptor for {coordinate}: {reason}")]
    PomError {
        /// Coordinate whose descriptor failed
        coordinate: String,
        /// Parse or inheritance failure detail
        reason: String,
    },

    /// A dependency coordinate string did not match
    /// `group:name:version[:classifier][@type]`.
    #[error("invalid dependency coordinate '{input}': {reason}")]
    InvalidCoordinate {
        /// The input string that failed to parse
        input: String,
        /// Which part was malformed
        reason: String,
    },

    /// A remote repository operation failed at the transport level.
    #[error("network error fetching {url}: {reason}")]
    NetworkError {
        /// URL of the failed request
        url: String,
        /// Transport-level failure detail
        reason: String,
    },

    /// A named project does not exist in the build.
    #[error("project '{name}' is not defined")]
    ProjectNotFound {
        /// The project name from the query
        name: String,
    },

    /// A named configuration does not exist in the build.
    #[error("configuration '{name}' is not defined")]
    ConfigurationNotFound {
        /// The configuration name from the query
        name: String,
    },

    /// A task key named in a query is not registered.
    #[error("key '{name}' is not a known task")]
    UnknownKey {
        /// The key name from the query
        name: String,
    },

    /// A holder or project was declared twice under the same name.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName {
        /// What was duplicated ("project", "configuration", "archetype")
        kind: &'static str,
        /// The colliding name
        name: String,
    },

    /// A key's binding produced a value of an unexpected type.
    ///
    /// Two keys sharing a name with different value types is a build-script
    /// authoring error.
    #[error("value bound to key '{key}' has the wrong type")]
    ValueTypeMismatch {
        /// Name of the key whose value failed to downcast
        key: String,
    },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error wrapper
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with a message
    #[error("{message}")]
    Other {
        /// The error message
        message: String,
    },
}

/// User-facing wrapper around a [`KilnError`] with an optional suggestion
/// and details, rendered with terminal colors.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying kiln error
    pub error: KilnError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    pub fn new(error: KilnError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add an actionable suggestion, displayed in green.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add explanatory details, displayed in yellow.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors.
    ///
    /// Error message in red, details in yellow, suggestion in green. This is
    /// the primary way kiln presents errors to CLI users.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`].
///
/// Recognizes [`KilnError`] variants and common IO failures and attaches
/// tailored suggestions; everything else renders with its message chain.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if error.downcast_ref::<KilnError>().is_some() {
        // Take ownership of the typed error so the context renders it directly.
        let kiln_error = match error.downcast::<KilnError>() {
            Ok(e) => e,
            Err(e) => {
                return ErrorContext::new(KilnError::Other {
                    message: e.to_string(),
                })
            }
        };
        return create_error_context(kiln_error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(KilnError::Other {
                    message: error.to_string(),
                })
                .with_suggestion("Check file ownership of the build and cache directories")
                .with_details("kiln does not have permission to read or write a required file");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(KilnError::Other {
                    message: error.to_string(),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    // Generic error: keep the whole chain, most recent cause first.
    let mut message = error.to_string();
    for cause in error.chain().skip(1) {
        message.push_str(&format!("\n  caused by: {cause}"));
    }
    ErrorContext::new(KilnError::Other { message })
}

/// Map each [`KilnError`] variant to a context with tailored suggestions.
fn create_error_context(error: KilnError) -> ErrorContext {
    let (suggestion, details): (Option<&str>, Option<&str>) = match &error {
        KilnError::KeyNotAssigned { .. } => (
            Some("Bind the key in the project or one of its configurations, or give it a default"),
            None,
        ),
        KilnError::EvaluatorBusy => (
            Some("Run evaluations from a single thread; nested evaluation from the same thread is fine"),
            Some("The evaluator permits exactly one activation per process"),
        ),
        KilnError::ResolutionIncomplete { .. } => (
            Some("Check the repository list and your network connection; use --offline only when the cache is warm"),
            None,
        ),
        KilnError::ChecksumMismatch { .. } => (
            Some("Retry the fetch; if the mismatch persists the repository content is corrupt"),
            Some("Checksum verification is controlled by the repository's checksum policy"),
        ),
        KilnError::AssemblyConflict { .. } => (
            Some("Configure a merge strategy for this path (first, last, concatenate, or discard)"),
            Some("The default strategy chooser fails on any unexpected conflict"),
        ),
        KilnError::CyclicProjectDependency { .. } => (
            Some("Break the cycle by extracting the shared code into a third project"),
            None,
        ),
        KilnError::QueryParseError { .. } => (
            Some("Queries look like 'project/config1:config2:key input key=value'"),
            None,
        ),
        KilnError::UnknownKey { .. } => (Some("Run 'kiln' with no arguments to list known task keys"), None),
        KilnError::NetworkError { .. } => (
            Some("Check your network connection, or re-run with --offline to rely on the local cache"),
            None,
        ),
        _ => (None, None),
    };

    let mut ctx = ErrorContext::new(error);
    if let Some(s) = suggestion {
        ctx = ctx.with_suggestion(s);
    }
    if let Some(d) = details {
        ctx = ctx.with_details(d);
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_not_assigned_message() {
        let err = KilnError::KeyNotAssigned {
            key: "compile".to_string(),
            scope: "app/".to_string(),
        };
        assert_eq!(err.to_string(), "key 'compile' is not assigned in scope app/");
    }

    #[test]
    fn test_error_context_builders() {
        let ctx = ErrorContext::new(KilnError::EvaluatorBusy)
            .with_suggestion("single thread")
            .with_details("one activation");
        let rendered = ctx.to_string();
        assert!(rendered.contains("evaluator is busy"));
        assert!(rendered.contains("Suggestion: single thread"));
        assert!(rendered.contains("Details: one activation"));
    }

    #[test]
    fn test_user_friendly_error_recognizes_kiln_errors() {
        let err = anyhow::Error::from(KilnError::UnknownKey {
            name: "frobnicate".to_string(),
        });
        let ctx = user_friendly_error(err);
        assert!(matches!(ctx.error, KilnError::UnknownKey { .. }));
        assert!(ctx.suggestion.is_some());
    }

    #[test]
    fn test_user_friendly_error_generic_keeps_chain() {
        let err = anyhow::anyhow!("inner").context("outer");
        let ctx = user_friendly_error(err);
        match ctx.error {
            KilnError::Other { message } => {
                assert!(message.contains("outer"));
                assert!(message.contains("caused by: inner"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
