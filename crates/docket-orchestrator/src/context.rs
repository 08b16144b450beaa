use docket_core::{ContextError, ContextKey, Snapshot, TaskId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Who wrote a context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "task", rename_all = "snake_case")]
pub enum Producer {
    /// Supplied by the caller when the run started.
    Input,
    /// Output of the named task.
    Task(TaskId),
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Input => write!(f, "run input"),
            Producer::Task(id) => write!(f, "task `{id}`"),
        }
    }
}

/// A value in the context store with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Stored value.
    pub value: Value,
    /// Who wrote it.
    pub producer: Producer,
    /// Monotonic write counter, starting at 1.
    pub version: u64,
}

/// Write-once key/value store for one run.
///
/// Owned and mutated by the orchestrator only; agents get [`Snapshot`]s.
#[derive(Debug, Default)]
pub struct ContextStore {
    entries: BTreeMap<ContextKey, ContextEntry>,
    version: u64,
}

impl ContextStore {
    /// Creates an empty store at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task output. Fails if `key` was already written, whatever the value.
    pub fn write(
        &mut self,
        key: ContextKey,
        value: Value,
        producer: &TaskId,
    ) -> Result<u64, ContextError> {
        self.insert(key, value, Producer::Task(producer.clone()))
    }

    /// Record an external run input.
    pub fn seed(&mut self, key: ContextKey, value: Value) -> Result<u64, ContextError> {
        self.insert(key, value, Producer::Input)
    }

    fn insert(
        &mut self,
        key: ContextKey,
        value: Value,
        producer: Producer,
    ) -> Result<u64, ContextError> {
        if let Some(existing) = self.entries.get(&key) {
            return Err(ContextError::DuplicateKey {
                key,
                producer: existing.producer.to_string(),
            });
        }
        self.version += 1;
        self.entries.insert(
            key,
            ContextEntry {
                value,
                producer,
                version: self.version,
            },
        );
        Ok(self.version)
    }

    /// Immutable copy of the requested keys. Every key must be present.
    pub fn read_view<'a, I>(&self, keys: I) -> Result<Snapshot, ContextError>
    where
        I: IntoIterator<Item = &'a ContextKey>,
    {
        let mut view = BTreeMap::new();
        for key in keys {
            let entry = self
                .entries
                .get(key)
                .ok_or_else(|| ContextError::MissingKey(key.clone()))?;
            view.insert(key.clone(), entry.value.clone());
        }
        Ok(Snapshot::new(view))
    }

    /// Entry for `key`, with its producer and version.
    pub fn get(&self, key: &ContextKey) -> Option<&ContextEntry> {
        self.entries.get(key)
    }

    /// Value stored under `key`.
    pub fn value(&self, key: &ContextKey) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Whether `key` has been written.
    pub fn contains(&self, key: &ContextKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of writes so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of keys written.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first write.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ContextKey, &ContextEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(s: &str) -> ContextKey {
        ContextKey::from(s)
    }

    #[test]
    fn test_write_and_read() {
        let mut store = ContextStore::new();
        let v = store
            .write(key("research_notes"), Value::from("notes"), &TaskId::from("research"))
            .unwrap();
        assert_eq!(v, 1);
        let entry = store.get(&key("research_notes")).unwrap();
        assert_eq!(entry.producer, Producer::Task(TaskId::from("research")));
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn test_write_once_regardless_of_value() {
        let mut store = ContextStore::new();
        let producer = TaskId::from("draft");
        store
            .write(key("draft_document"), Value::from("same"), &producer)
            .unwrap();
        let err = store
            .write(key("draft_document"), Value::from("same"), &producer)
            .unwrap_err();
        assert_eq!(
            err,
            ContextError::DuplicateKey {
                key: key("draft_document"),
                producer: "task `draft`".to_string(),
            }
        );
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_seeded_input_is_write_once() {
        let mut store = ContextStore::new();
        store.seed(key("question"), Value::from("How many?")).unwrap();
        let err = store
            .write(key("question"), Value::from("other"), &TaskId::from("t"))
            .unwrap_err();
        assert!(matches!(err, ContextError::DuplicateKey { producer, .. } if producer == "run input"));
    }

    #[test]
    fn test_read_view_restricted() {
        let mut store = ContextStore::new();
        store.seed(key("a"), Value::from(1)).unwrap();
        store.seed(key("b"), Value::from(2)).unwrap();
        let view = store.read_view(&[key("b")]).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view.get(&key("b")), Some(&Value::from(2)));
        assert!(view.get(&key("a")).is_none());
    }

    #[test]
    fn test_read_view_missing_key() {
        let store = ContextStore::new();
        let err = store.read_view(&[key("absent")]).unwrap_err();
        assert_eq!(err, ContextError::MissingKey(key("absent")));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut store = ContextStore::new();
        store.seed(key("a"), Value::from("before")).unwrap();
        let view = store.read_view(&[key("a")]).unwrap();
        store.seed(key("b"), Value::from("later")).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(store.len(), 2);
    }
}
