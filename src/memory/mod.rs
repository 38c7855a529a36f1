//! Shared, process-local working memory for a single run.
//!
//! [`SharedMemory`] is the keyed scratchpad nodes read from and write to.
//! Writes are validated against a per-key schema when one is registered, and
//! long string values are scanned for embedded code indicators to guard
//! against an LLM hallucinating executable content into a memory key meant
//! for prose (see [`guard::scan_for_code_indicators`]).

pub mod guard;

use crate::error::{GraphError, GraphResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// JSON-schema-ish per-key type constraint. Only the `type` discriminant is
/// enforced; this is intentionally not a full JSON Schema implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSchema {
    /// Value must be a JSON string.
    String,
    /// Value must be a JSON number.
    Number,
    /// Value must be a JSON boolean.
    Bool,
    /// Value must be a JSON array.
    Array,
    /// Value must be a JSON object.
    Object,
    /// Any JSON value is accepted.
    Any,
}

impl ValueSchema {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueSchema::String => value.is_string(),
            ValueSchema::Number => value.is_number(),
            ValueSchema::Bool => value.is_boolean(),
            ValueSchema::Array => value.is_array(),
            ValueSchema::Object => value.is_object(),
            ValueSchema::Any => true,
        }
    }
}

struct Inner {
    data: HashMap<String, Value>,
    schemas: HashMap<String, ValueSchema>,
}

/// The process-local mapping from string key to arbitrary JSON value
/// representing a run's working state.
///
/// Cloning a `SharedMemory` clones the `Arc`, not the store — all clones
/// observe the same underlying data. This is the single-writer-per-run
/// handle the executor holds; nodes instead receive a [`ScopedMemory`] view.
#[derive(Clone)]
pub struct SharedMemory {
    inner: Arc<RwLock<Inner>>,
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMemory {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                data: HashMap::new(),
                schemas: HashMap::new(),
            })),
        }
    }

    /// Register a schema for a key; future writes to that key are checked
    /// against it.
    pub fn register_schema<S: Into<String>>(&self, key: S, schema: ValueSchema) {
        self.inner.write().schemas.insert(key.into(), schema);
    }

    /// Write a value, validating it unless `validate` is false.
    ///
    /// Validation order: schema check, then (for strings over 5000 bytes)
    /// the code-indicator scan. `validate = false` is reserved for trusted
    /// internal writes (e.g. restoring a session snapshot) and skips both.
    pub fn write(&self, key: &str, value: Value, validate: bool) -> GraphResult<()> {
        if validate {
            let schema = self.inner.read().schemas.get(key).copied();
            if let Some(schema) = schema {
                if !schema.matches(&value) {
                    return Err(GraphError::memory_schema(format!(
                        "key '{key}' expected {schema:?}, got {value}",
                    )));
                }
            }
            if let Some(s) = value.as_str() {
                if s.len() > 5_000 {
                    if let Some(indicator) = guard::scan_for_code_indicators(s) {
                        return Err(GraphError::memory_hallucinated_code(format!(
                            "key '{key}' value contains a code indicator ({indicator})",
                        )));
                    }
                }
            }
        }
        self.inner.write().data.insert(key.to_string(), value);
        Ok(())
    }

    /// Read a single key.
    pub fn read(&self, key: &str) -> Option<Value> {
        self.inner.read().data.get(key).cloned()
    }

    /// Return a deep copy of the full map. Mutating the returned map (or any
    /// later mutation of the store) must never affect the other.
    pub fn read_all(&self) -> HashMap<String, Value> {
        self.inner.read().data.clone()
    }

    /// Remove a key, returning its prior value if present.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().data.remove(key)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Restore a full snapshot, bypassing validation (used when resuming a
    /// persisted session).
    pub fn restore(&self, snapshot: HashMap<String, Value>) {
        self.inner.write().data = snapshot;
    }

    /// Produce a scoped view restricted to the given readable/writable key
    /// sets.
    pub fn with_permissions<I, S>(&self, read_keys: I, write_keys: I) -> ScopedMemory
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScopedMemory {
            backing: self.clone(),
            readable: read_keys.into_iter().map(Into::into).collect(),
            writable: write_keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// A filtered handle over [`SharedMemory`] restricting a node's reads and
/// writes to its declared key sets.
#[derive(Clone)]
pub struct ScopedMemory {
    backing: SharedMemory,
    readable: HashSet<String>,
    writable: HashSet<String>,
}

impl ScopedMemory {
    /// Read a key; returns `None` both when absent and when outside the
    /// readable set (reads outside scope are silently absent, not an error).
    pub fn read(&self, key: &str) -> Option<Value> {
        if self.readable.contains(key) {
            self.backing.read(key)
        } else {
            None
        }
    }

    /// Write a key; raises `PermissionDenied` when outside the writable set.
    pub fn write(&self, key: &str, value: Value) -> GraphResult<()> {
        if !self.writable.contains(key) {
            return Err(GraphError::PermissionDenied(format!(
                "key '{key}' is not writable from this scope",
            )));
        }
        self.backing.write(key, value, true)
    }

    /// Deep copy of the full map, restricted to the readable key set.
    pub fn read_all(&self) -> HashMap<String, Value> {
        self.backing
            .read_all()
            .into_iter()
            .filter(|(k, _)| self.readable.contains(k))
            .collect()
    }

    /// The readable key set.
    pub fn readable_keys(&self) -> &HashSet<String> {
        &self.readable
    }

    /// The writable key set.
    pub fn writable_keys(&self) -> &HashSet<String> {
        &self.writable
    }
}
