use thiserror::Error;

use crate::clients::ClientError;
use crate::plan::{TaskId, TaskKind};

/// Structural problems found while indexing a submitted plan.
///
/// Any of these rejects the whole plan before a single task runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate task id: {task_id}")]
    DuplicateTaskId { task_id: TaskId },

    /// An edge names a task that is not part of the plan.
    #[error("Task {task_id} references unknown task {missing}")]
    DanglingEdge { task_id: TaskId, missing: TaskId },

    /// Only one side of an edge is declared (`from` lists `to` as successor
    /// but `to` does not list `from` as predecessor, or the reverse).
    #[error("Edge {from} -> {to} is not declared on both tasks")]
    InconsistentEdge { from: TaskId, to: TaskId },

    #[error("Task {task_id} lists {other} more than once")]
    DuplicateEdge { task_id: TaskId, other: TaskId },

    #[error("Dependency cycle detected through task {task_id}")]
    Cycle { task_id: TaskId },
}

/// Data-flow errors raised by the execution context.
///
/// These indicate a plan whose outputs and inputs do not line up with its
/// dependency edges, so they are never retried.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Task {task_id} read context key '{key}' but no completed task produced it")]
    MissingValue { key: String, task_id: TaskId },

    #[error("Task {task_id} read context key '{key}' produced by task {producer}, which is not upstream of it")]
    UnrelatedProducer {
        key: String,
        producer: TaskId,
        task_id: TaskId,
    },

    #[error("Context key '{key}' already written by task {first_writer}; task {second_writer} tried to write it again")]
    DuplicateWrite {
        key: String,
        first_writer: TaskId,
        second_writer: TaskId,
    },

    #[error("Context key '{key}' could not be decoded: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reported by a task handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A collaborator rejected the request or could not be reached.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Producer/consumer mismatch in the plan. Fatal to the whole run.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The handler was dispatched with a payload it does not understand.
    #[error("Handler for {expected} cannot execute a {actual} payload")]
    InvalidPayload { expected: String, actual: TaskKind },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Create a plain failure with a diagnostic message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Whether this failure must abort the whole run rather than just the
    /// failing task's subtree.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Client(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Client(_) => "client",
            Self::Context(_) => "context",
            Self::InvalidPayload { .. } => "payload",
            Self::Failed(_) => "failed",
            Self::Other(_) => "other",
        }
    }
}

/// Errors returned to the caller of the executor instead of a plan result.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid plan: {0}")]
    Graph(#[from] GraphError),

    #[error("No handler registered for task kind {kind} (task {task_id})")]
    HandlerNotRegistered { kind: TaskKind, task_id: TaskId },

    #[error("Handler already registered for task kind {kind}")]
    DuplicateHandler { kind: TaskKind },

    #[error("Configuration invalid: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to read configuration from {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for executor-level operations
pub type Result<T> = std::result::Result<T, ExecutorError>;
