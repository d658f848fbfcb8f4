//! Typed key handles.
//!
//! A [`Key<T>`] is an opaque, named handle carrying a value-type tag. Keys
//! own no state: all values come from bindings looked up in a scope at
//! evaluation time. Two keys are the same key exactly when their names are
//! equal, so names must be unique across a build definition.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marker for types that can be carried by a [`Key`].
///
/// Blanket-implemented; listed explicitly so the bounds read at the API
/// surface instead of leaking through every signature.
pub trait KeyValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> KeyValue for T {}

/// Erased value produced by a binding.
pub(crate) type DynValue = Box<dyn Any + Send>;

/// Describes one user input a key's binding knows how to consume.
///
/// Purely informational: the list documents what `key input=value` pairs
/// a task accepts.
#[derive(Clone, Debug)]
pub struct InputKeyDescription {
    /// Input key name, e.g. `main` or `version`
    pub key: String,
    /// One-line description of what the input is for
    pub description: String,
}

pub(crate) struct KeyData {
    name: String,
    description: String,
    /// Shared across evaluations; cloned out on each default hit.
    default: Option<Arc<dyn Any + Send + Sync>>,
    printer: Option<Arc<dyn Fn(&dyn Any) -> String + Send + Sync>>,
    input_keys: Vec<InputKeyDescription>,
    type_name: &'static str,
}

/// A named, typed key.
///
/// Attributes: name (the identity), human description, optional shared
/// default value, optional pretty-printer, and descriptors for the inputs
/// its bindings may read. Cloning a key clones the handle, not the data.
///
/// # Examples
///
/// ```
/// use kiln::keys::Key;
///
/// let jvm_target: Key<String> = Key::new("jvmTarget", "Bytecode target version")
///     .with_default("11".to_string());
/// assert!(jvm_target.has_default());
/// ```
pub struct Key<T> {
    data: Arc<KeyData>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            _value: PhantomData,
        }
    }
}

impl<T: KeyValue> Key<T> {
    /// Create a key with no default value.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            data: Arc::new(KeyData {
                name: name.into(),
                description: description.into(),
                default: None,
                printer: None,
                input_keys: Vec::new(),
                type_name: std::any::type_name::<T>(),
            }),
            _value: PhantomData,
        }
    }

    /// Attach a default value, used when no holder in scope binds the key.
    ///
    /// The default is immutable and shared across evaluations.
    #[must_use]
    pub fn with_default(mut self, value: T) -> Self {
        let name = self.data.name.clone();
        let data = Arc::get_mut(&mut self.data)
            .unwrap_or_else(|| panic!("key '{}' configured after sharing", name));
        data.default = Some(Arc::new(value));
        self
    }

    /// Attach a pretty-printer used when rendering evaluated values in
    /// trace output and task results.
    #[must_use]
    pub fn with_printer(mut self, printer: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        let name = self.data.name.clone();
        let data = Arc::get_mut(&mut self.data)
            .unwrap_or_else(|| panic!("key '{}' configured after sharing", name));
        data.printer = Some(Arc::new(move |any| match any.downcast_ref::<T>() {
            Some(value) => printer(value),
            None => "<wrong type>".to_string(),
        }));
        self
    }

    /// Declare an input this key's bindings may read.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>, description: impl Into<String>) -> Self {
        let name = self.data.name.clone();
        let data = Arc::get_mut(&mut self.data)
            .unwrap_or_else(|| panic!("key '{}' configured after sharing", name));
        data.input_keys.push(InputKeyDescription {
            key: key.into(),
            description: description.into(),
        });
        self
    }

    /// The key's unique name.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.data.description
    }

    /// Whether a default value exists.
    pub fn has_default(&self) -> bool {
        self.data.default.is_some()
    }

    /// Inputs the key's bindings recognize.
    pub fn input_keys(&self) -> &[InputKeyDescription] {
        &self.data.input_keys
    }

    /// Clone the default value out of the shared slot, if any.
    pub(crate) fn default_value(&self) -> Option<T> {
        let default = self.data.default.as_ref()?;
        default.downcast_ref::<T>().cloned()
    }

    /// Render a value with the key's printer, falling back to the value's
    /// type name when no printer is attached.
    pub(crate) fn render(&self, value: &T) -> String {
        match &self.data.printer {
            Some(printer) => printer(value as &dyn Any),
            None => format!("<{}>", self.data.type_name),
        }
    }
}

impl<T> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data.name)
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.data.name)
            .field("type", &self.data.type_name)
            .finish()
    }
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data.name == other.data.name
    }
}

impl<T> Eq for Key<T> {}

impl<T> PartialOrd for Key<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Key<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.data.name.cmp(&other.data.name)
    }
}

impl<T> std::hash::Hash for Key<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.data.name.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_compare_by_name() {
        let a: Key<u32> = Key::new("answer", "first");
        let b: Key<u32> = Key::new("answer", "second");
        assert_eq!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_default_value_is_shared() {
        let key: Key<Vec<String>> = Key::new("tags", "").with_default(vec!["a".to_string()]);
        assert_eq!(key.default_value(), Some(vec!["a".to_string()]));
        assert_eq!(key.default_value(), Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_render_uses_printer() {
        let key: Key<u32> = Key::new("port", "").with_printer(|v| format!("port {v}"));
        assert_eq!(key.render(&8080), "port 8080");

        let plain: Key<u32> = Key::new("plain", "");
        assert_eq!(plain.render(&1), "<u32>");
    }
}
