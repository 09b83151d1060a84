//! Coordinator-based plan execution
//!
//! The scheduler owns task state for a run, the aggregator turns the final
//! states into a [`PlanResult`], and [`CancelHandle`] lets callers stop a run
//! early.

pub mod aggregator;
pub mod cancel;
pub mod scheduler;
pub mod types;

pub use aggregator::{Abort, PlanResult, ResultAggregator, TaskOutcome};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use scheduler::{Scheduler, CANCELLED_REASON, DEADLINE_REASON};
pub use types::{PlanEvent, PlanStatus, TaskState};
