use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from any string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a task within one run.
    TaskId
);
string_id!(
    /// Identifier of a registered agent.
    AgentId
);
string_id!(
    /// Name of a value in the shared context store.
    ContextKey
);

/// Values flowing between tasks.
pub type Value = serde_json::Value;

/// What an agent returns: one value per declared output key.
pub type TaskOutput = BTreeMap<ContextKey, Value>;

/// An atomic unit of work assigned to one agent.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the graph.
    pub id: TaskId,
    /// The agent that executes this task.
    pub agent_id: AgentId,
    /// Instruction handed to the agent.
    #[serde(default)]
    pub description: String,
    /// Keys read from the context store, in prompt order.
    #[serde(default)]
    pub input_keys: Vec<ContextKey>,
    /// Keys this task must produce, in declaration order.
    #[serde(default)]
    pub output_keys: Vec<ContextKey>,
    /// Tasks that must succeed before this one is dispatched.
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
}

impl Task {
    /// Creates a task with no inputs, outputs or dependencies.
    pub fn new(id: impl Into<TaskId>, agent_id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            description: String::new(),
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Sets the instruction text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares the keys read from context.
    pub fn reads<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ContextKey>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declares the keys written to context.
    pub fn writes<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ContextKey>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declares the tasks this one waits for.
    pub fn after<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Read-only view of the context store, restricted to a task's declared inputs.
///
/// Cloning is cheap; there is no way to mutate the entries once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Arc<BTreeMap<ContextKey, Value>>,
}

impl Snapshot {
    /// Builds a snapshot from already-copied entries.
    pub fn new(entries: BTreeMap<ContextKey, Value>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Looks up a value.
    pub fn get(&self, key: &ContextKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Looks up a value that is expected to be a string.
    pub fn get_str(&self, key: &ContextKey) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ContextKey, &Value)> {
        self.entries.iter()
    }

    /// Number of visible keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the snapshot exposes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
