// Plan model, graph validation and the shared data-flow context
pub mod plan;
pub mod graph;
pub mod context;

// Collaborator seams and the handlers that call them
pub mod clients;
pub mod handlers;

// Scheduling, result aggregation and the public facade
pub mod coord;
pub mod executor;

// Configuration, errors and logging
pub mod core;

// Re-exports for convenience
pub use core::config::{ExecutorConfig, PhaseWait};
pub use core::errors::{ContextError, ExecutorError, GraphError, HandlerError, Result};

pub use clients::{
    ClientControllerClient, ClientError, ClientErrorKind, ClusterClient, Collaborators,
    DatabaseAdminClient, DryRunCollaborators, KnowledgeStoreClient, MiddlewareAgentClient,
};
pub use context::{ContextEntry, ContextView, ExecutionContext};
pub use coord::{
    cancel_pair, CancelHandle, CancelSignal, PlanEvent, PlanResult, PlanStatus, Scheduler,
    TaskOutcome, TaskState,
};
pub use executor::PlanExecutor;
pub use graph::TaskGraph;
pub use handlers::{HandlerRegistry, RetryPolicy, RetryStrategy, TaskHandler, TaskOutputs};
pub use plan::{
    AddressSource, ExecutionPlan, InstancePhase, InstanceRef, PlanBuilder, Task, TaskId,
    TaskKind, TaskPayload,
};
