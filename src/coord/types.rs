//! Core types shared by the scheduler, the aggregator and observers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::{TaskId, TaskKind};

/// Runtime state of one task within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
}

impl TaskState {
    /// Whether the task reached one of its final states
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Skipped)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "PENDING",
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::Done => "DONE",
            TaskState::Failed => "FAILED",
            TaskState::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    /// Every task is DONE
    Success,
    /// At least one task failed, or the run was aborted
    Failure,
    /// Dispatching stopped on request or because the deadline passed
    Cancelled,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanStatus::Success => "SUCCESS",
            PlanStatus::Failure => "FAILURE",
            PlanStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Progress notifications for observers of a run
#[derive(Debug, Clone, PartialEq)]
pub enum PlanEvent {
    RunStarted {
        run_id: String,
        namespace: String,
        tasks: usize,
    },
    TaskDispatched {
        task_id: TaskId,
        kind: TaskKind,
    },
    TaskFinished {
        task_id: TaskId,
        state: TaskState,
        diagnostic: Option<String>,
    },
    /// Emitted for every task skipped without being dispatched
    TaskSkipped {
        task_id: TaskId,
        reason: String,
    },
    RunFinished {
        run_id: String,
        status: PlanStatus,
    },
}

/// Message sent by a worker when its handler call is over
#[derive(Debug)]
pub(crate) enum TaskCompletion {
    Succeeded {
        task_id: TaskId,
        outputs: std::collections::BTreeMap<String, serde_json::Value>,
    },
    Failed {
        task_id: TaskId,
        diagnostic: String,
        /// Error category for logs
        category: &'static str,
        fatal: bool,
    },
}

impl TaskCompletion {
    pub(crate) fn task_id(&self) -> TaskId {
        match self {
            TaskCompletion::Succeeded { task_id, .. } | TaskCompletion::Failed { task_id, .. } => *task_id,
        }
    }
}
