//! Execution plans: the task model submitted to the executor

pub mod model;
pub mod payload;

pub use model::{ExecutionPlan, PlanBuilder, Task, TaskId};
pub use payload::{
    AddressSource, Collaborator, InstancePhase, InstanceRef, TaskKind, TaskPayload,
    DEFAULT_SECRET_NAME,
};
