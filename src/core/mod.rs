//! Core types shared across the kiln engine.
//!
//! Currently this is the error model: the [`KilnError`] enum, the
//! [`ErrorContext`] presentation wrapper, and the [`user_friendly_error`]
//! adapter used by the CLI entry point.

pub mod error;

pub use error::{user_friendly_error, ErrorContext, KilnError};
