//! Per-run store for values produced by one task and consumed by dependents

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::errors::ContextError;
use crate::graph::TaskGraph;
use crate::plan::TaskId;

/// A stored value together with the task that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub producer: TaskId,
    pub value: Value,
}

/// Single-writer-per-key value store scoped to one run.
///
/// Only the scheduler writes, and only after the producing task finished
/// successfully, so every stored value belongs to a DONE task.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    entries: DashMap<String, ContextEntry>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one value. A key can only be written once per run.
    pub fn insert(&self, key: impl Into<String>, producer: TaskId, value: Value) -> Result<(), ContextError> {
        match self.entries.entry(key.into()) {
            Entry::Occupied(existing) => Err(ContextError::DuplicateWrite {
                key: existing.key().clone(),
                first_writer: existing.get().producer,
                second_writer: producer,
            }),
            Entry::Vacant(slot) => {
                slot.insert(ContextEntry { producer, value });
                Ok(())
            }
        }
    }

    /// Store every output of one task, stopping at the first conflicting key
    pub fn insert_all(&self, producer: TaskId, outputs: BTreeMap<String, Value>) -> Result<(), ContextError> {
        for (key, value) in outputs {
            self.insert(key, producer, value)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<ContextEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the whole store, ordered by key
    pub fn snapshot(&self) -> BTreeMap<String, ContextEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Read access to the context on behalf of one task.
///
/// A read only succeeds when the value's producer is upstream of the reader.
/// Anything else could only work by accident of interleaving.
#[derive(Clone)]
pub struct ContextView {
    context: Arc<ExecutionContext>,
    graph: Arc<TaskGraph>,
    task_id: TaskId,
}

impl ContextView {
    pub fn new(context: Arc<ExecutionContext>, graph: Arc<TaskGraph>, task_id: TaskId) -> Self {
        Self {
            context,
            graph,
            task_id,
        }
    }

    /// The task this view reads for
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn namespace(&self) -> &str {
        self.graph.namespace()
    }

    pub fn get(&self, key: &str) -> Result<Value, ContextError> {
        let entry = self
            .context
            .get(key)
            .ok_or_else(|| ContextError::MissingValue {
                key: key.to_string(),
                task_id: self.task_id,
            })?;

        if !self.graph.is_upstream(entry.producer, self.task_id) {
            return Err(ContextError::UnrelatedProducer {
                key: key.to_string(),
                producer: entry.producer,
                task_id: self.task_id,
            });
        }
        Ok(entry.value)
    }

    /// Read and decode a value
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        let value = self.get(key)?;
        serde_json::from_value(value).map_err(|source| ContextError::Decode {
            key: key.to_string(),
            source,
        })
    }
}
