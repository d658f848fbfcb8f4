//! Machine-readable task result formatting.
//!
//! Every top-level key result reduces to a stable scalar-or-array shape.
//! In `shell` format each result is one line (arrays tab-separated); in
//! `json` format each result is one JSON object per line. Paths are
//! rendered absolute by the task renderers before reaching this module.

use serde_json::json;

/// The reduced value of one evaluated task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskResult {
    /// No meaningful value (side-effecting tasks)
    Unit,
    /// A single scalar
    Scalar(String),
    /// An ordered list of scalars
    List(Vec<String>),
}

impl TaskResult {
    /// One-line shell rendering: scalar verbatim, list tab-separated,
    /// unit empty.
    pub fn to_shell_line(&self) -> String {
        match self {
            TaskResult::Unit => String::new(),
            TaskResult::Scalar(value) => value.clone(),
            TaskResult::List(values) => values.join("\t"),
        }
    }

    /// JSON object rendering: `{"task": ..., "value": ...}`.
    pub fn to_json_line(&self, task: &str) -> String {
        let value = match self {
            TaskResult::Unit => serde_json::Value::Null,
            TaskResult::Scalar(value) => json!(value),
            TaskResult::List(values) => json!(values),
        };
        json!({ "task": task, "value": value }).to_string()
    }

    /// Human rendering: lists one element per line.
    pub fn to_pretty(&self) -> String {
        match self {
            TaskResult::Unit => "done".to_string(),
            TaskResult::Scalar(value) => value.clone(),
            TaskResult::List(values) => values.join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_lines() {
        assert_eq!(TaskResult::Unit.to_shell_line(), "");
        assert_eq!(TaskResult::Scalar("x".into()).to_shell_line(), "x");
        assert_eq!(
            TaskResult::List(vec!["a".into(), "b".into()]).to_shell_line(),
            "a\tb"
        );
    }

    #[test]
    fn test_json_lines_are_objects() {
        let line = TaskResult::List(vec!["a".into()]).to_json_line("app/classpath");
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["task"], "app/classpath");
        assert_eq!(parsed["value"][0], "a");
    }
}
