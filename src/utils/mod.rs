//! Cross-cutting filesystem utilities.

pub mod fs;

pub use fs::{atomic_write, ensure_dir, modified_ms, safe_write};
