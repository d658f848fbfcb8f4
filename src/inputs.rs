//! Ordered sourcing of user-supplied parameters for key evaluation.
//!
//! Each top-level evaluation carries an [`InputState`]: the ordered
//! `(input key, text)` pairs parsed from the query, plus whether
//! interactive prompting is enabled. Bindings read inputs through
//! [`Eval::read_input`], which consults named inputs first, then free
//! (positional) inputs, then the prompt.
//!
//! Consumption is per-top-level-evaluation: once a stored input validates
//! it is marked consumed and never offered again within the same
//! evaluation.
//!
//! [`Eval::read_input`]: crate::keys::Eval::read_input

use std::cell::Cell;

struct StoredInput {
    key: Option<String>,
    text: String,
    consumed: Cell<bool>,
}

/// The stored inputs of one top-level evaluation.
pub struct InputState {
    entries: Vec<StoredInput>,
    interactive: bool,
}

impl InputState {
    /// Build from ordered `(key, text)` pairs; `None` keys are free inputs.
    pub fn new(inputs: Vec<(Option<String>, String)>, interactive: bool) -> Self {
        Self {
            entries: inputs
                .into_iter()
                .map(|(key, text)| StoredInput {
                    key,
                    text,
                    consumed: Cell::new(false),
                })
                .collect(),
            interactive,
        }
    }

    /// Whether the interactive prompt may be consulted after stored
    /// inputs are exhausted.
    pub fn interactive(&self) -> bool {
        self.interactive
    }

    /// Find the first unconsumed stored input accepted by `validator`:
    /// named matches for `input_key` first, then free inputs in order.
    /// The accepted input is marked consumed.
    pub(crate) fn read_stored<V>(
        &self,
        input_key: &str,
        validator: &impl Fn(&str) -> Option<V>,
    ) -> Option<V> {
        for entry in self
            .entries
            .iter()
            .filter(|e| e.key.as_deref() == Some(input_key) && !e.consumed.get())
        {
            if let Some(value) = validator(&entry.text) {
                entry.consumed.set(true);
                return Some(value);
            }
        }
        for entry in self
            .entries
            .iter()
            .filter(|e| e.key.is_none() && !e.consumed.get())
        {
            if let Some(value) = validator(&entry.text) {
                entry.consumed.set(true);
                return Some(value);
            }
        }
        None
    }
}
