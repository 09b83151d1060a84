//! Task handlers and the registry that maps task kinds to them
//!
//! Handlers perform the side effect of one task and report either the values
//! they produced or a [`HandlerError`]. They never touch task state; the
//! scheduler owns that.

pub mod client_controller;
pub mod cluster;
pub mod database;
pub mod knowledge;
pub mod middleware;
pub mod phase;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::clients::Collaborators;
use crate::context::ContextView;
use crate::core::config::PhaseWait;
use crate::core::errors::{ExecutorError, HandlerError, Result};
use crate::plan::{AddressSource, Collaborator, TaskKind, TaskPayload};

pub use client_controller::ClientControllerHandler;
pub use cluster::ClusterHandler;
pub use database::DatabaseHandler;
pub use knowledge::KnowledgeHandler;
pub use middleware::MiddlewareHandler;
pub use phase::PhaseWaiter;
pub use retry::{RetryPolicy, RetryStrategy};

/// Values produced by one successful task, keyed by context key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutputs {
    values: BTreeMap<String, Value>,
}

impl TaskOutputs {
    /// No outputs
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(key: impl Into<String>, value: Value) -> Self {
        Self::empty().with(key, value)
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.values
    }
}

/// Executes the side effect of one task kind.
///
/// Implementations must be safe to call concurrently for different tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, payload: &TaskPayload, ctx: &ContextView) -> std::result::Result<TaskOutputs, HandlerError>;
}

/// Resolve an address either from the payload or from an upstream task's output
pub(crate) fn resolve_address(
    source: &AddressSource,
    ctx: &ContextView,
) -> std::result::Result<String, HandlerError> {
    match source {
        AddressSource::Literal(address) => Ok(address.clone()),
        AddressSource::Context(key) => Ok(ctx.get_as::<String>(key)?),
    }
}

pub(crate) fn unexpected(expected: &str, payload: &TaskPayload) -> HandlerError {
    HandlerError::InvalidPayload {
        expected: expected.to_string(),
        actual: payload.kind(),
    }
}

/// Maps every task kind to the handler that executes it
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one kind. Each kind can be registered once.
    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Result<()> {
        if self.handlers.contains_key(&kind) {
            return Err(ExecutorError::DuplicateHandler { kind });
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Builder-style variant of [`HandlerRegistry::register`]
    pub fn with(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Result<Self> {
        self.register(kind, handler)?;
        Ok(self)
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Wire every task kind to the built-in handler of its collaborator group
    pub fn from_collaborators(
        collaborators: Collaborators,
        retry: RetryPolicy,
        phase_wait: PhaseWait,
    ) -> Self {
        let cluster: Arc<dyn TaskHandler> =
            Arc::new(ClusterHandler::new(collaborators.cluster, retry.clone()));
        let phases = PhaseWaiter::new(collaborators.middleware.clone(), phase_wait.clone());
        let middleware: Arc<dyn TaskHandler> = Arc::new(MiddlewareHandler::new(
            collaborators.middleware,
            retry.clone(),
            phase_wait,
        ));
        let client_controller: Arc<dyn TaskHandler> = Arc::new(ClientControllerHandler::new(
            collaborators.client_controller,
            phases,
            retry.clone(),
        ));
        let database: Arc<dyn TaskHandler> =
            Arc::new(DatabaseHandler::new(collaborators.database, retry.clone()));
        let knowledge: Arc<dyn TaskHandler> =
            Arc::new(KnowledgeHandler::new(collaborators.knowledge, retry));

        let mut handlers = HashMap::with_capacity(TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            let handler = match kind.collaborator() {
                Collaborator::Cluster => cluster.clone(),
                Collaborator::MiddlewareAgent => middleware.clone(),
                Collaborator::ClientController => client_controller.clone(),
                Collaborator::DatabaseAdmin => database.clone(),
                Collaborator::KnowledgeStore => knowledge.clone(),
            };
            handlers.insert(kind, handler);
        }
        Self { handlers }
    }
}
