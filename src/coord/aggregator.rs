//! Collects per-task outcomes of a run into the final [`PlanResult`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::coord::types::{PlanStatus, TaskState};
use crate::plan::{TaskId, TaskKind};

/// Final state of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    /// Why the task FAILED or was SKIPPED
    pub diagnostic: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskOutcome {
    fn new(task_id: TaskId, kind: TaskKind) -> Self {
        Self {
            task_id,
            kind,
            state: TaskState::Pending,
            diagnostic: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Handler run time, for dispatched tasks
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Immutable snapshot of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub run_id: String,
    pub namespace: String,
    pub status: PlanStatus,
    /// Every task of the plan, ascending by id
    pub tasks: Vec<TaskOutcome>,
    pub failed: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    /// Set when the run stopped early (cancellation, deadline, fatal
    /// data-flow error)
    pub abort_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PlanResult {
    pub fn is_success(&self) -> bool {
        self.status == PlanStatus::Success
    }

    pub fn outcome(&self, task_id: TaskId) -> Option<&TaskOutcome> {
        self.tasks
            .binary_search_by_key(&task_id, |outcome| outcome.task_id)
            .ok()
            .map(|idx| &self.tasks[idx])
    }

    pub fn state_of(&self, task_id: TaskId) -> Option<TaskState> {
        self.outcome(task_id).map(|outcome| outcome.state)
    }

    /// Task id -> final state
    pub fn states(&self) -> BTreeMap<TaskId, TaskState> {
        self.tasks
            .iter()
            .map(|outcome| (outcome.task_id, outcome.state))
            .collect()
    }

    pub fn done(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|outcome| outcome.state == TaskState::Done)
            .map(|outcome| outcome.task_id)
            .collect()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} ({} tasks: {} done, {} failed, {} skipped)",
            self.status,
            self.tasks.len(),
            self.done().len(),
            self.failed.len(),
            self.skipped.len()
        )
    }
}

/// How a run ended early, if it did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abort {
    Cancelled(String),
    Fatal(String),
}

/// Accumulates task outcomes while a run is in progress
#[derive(Debug)]
pub struct ResultAggregator {
    run_id: String,
    namespace: String,
    started_at: DateTime<Utc>,
    outcomes: BTreeMap<TaskId, TaskOutcome>,
}

impl ResultAggregator {
    pub fn new(
        run_id: impl Into<String>,
        namespace: impl Into<String>,
        tasks: impl IntoIterator<Item = (TaskId, TaskKind)>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            namespace: namespace.into(),
            started_at: Utc::now(),
            outcomes: tasks
                .into_iter()
                .map(|(id, kind)| (id, TaskOutcome::new(id, kind)))
                .collect(),
        }
    }

    pub fn task_started(&mut self, task_id: TaskId) {
        if let Some(outcome) = self.outcomes.get_mut(&task_id) {
            outcome.state = TaskState::Running;
            outcome.started_at = Some(Utc::now());
        }
    }

    pub fn task_done(&mut self, task_id: TaskId) {
        self.finish_task(task_id, TaskState::Done, None);
    }

    pub fn task_failed(&mut self, task_id: TaskId, diagnostic: impl Into<String>) {
        self.finish_task(task_id, TaskState::Failed, Some(diagnostic.into()));
    }

    /// Record a task that was never dispatched
    pub fn task_skipped(&mut self, task_id: TaskId, reason: impl Into<String>) {
        if let Some(outcome) = self.outcomes.get_mut(&task_id) {
            outcome.state = TaskState::Skipped;
            outcome.diagnostic = Some(reason.into());
        }
    }

    pub fn state_of(&self, task_id: TaskId) -> Option<TaskState> {
        self.outcomes.get(&task_id).map(|outcome| outcome.state)
    }

    fn finish_task(&mut self, task_id: TaskId, state: TaskState, diagnostic: Option<String>) {
        if let Some(outcome) = self.outcomes.get_mut(&task_id) {
            outcome.state = state;
            outcome.diagnostic = diagnostic;
            outcome.finished_at = Some(Utc::now());
        }
    }

    /// Produce the final result. SUCCESS requires every task DONE and no abort.
    pub fn finish(self, abort: Option<Abort>) -> PlanResult {
        let tasks: Vec<TaskOutcome> = self.outcomes.into_values().collect();
        let ids_in = |state: TaskState| -> Vec<TaskId> {
            tasks
                .iter()
                .filter(|outcome| outcome.state == state)
                .map(|outcome| outcome.task_id)
                .collect()
        };
        let failed = ids_in(TaskState::Failed);
        let skipped = ids_in(TaskState::Skipped);
        let all_done = tasks.iter().all(|outcome| outcome.state == TaskState::Done);

        let (status, abort_reason) = match abort {
            Some(Abort::Cancelled(reason)) => (PlanStatus::Cancelled, Some(reason)),
            Some(Abort::Fatal(reason)) => (PlanStatus::Failure, Some(reason)),
            None if all_done => (PlanStatus::Success, None),
            None => (PlanStatus::Failure, None),
        };

        PlanResult {
            run_id: self.run_id,
            namespace: self.namespace,
            status,
            tasks,
            failed,
            skipped,
            abort_reason,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn aggregator() -> ResultAggregator {
        ResultAggregator::new(
            "run-1",
            "shop",
            vec![
                (3, TaskKind::CreateService),
                (1, TaskKind::CreateNamespace),
                (2, TaskKind::CreateDeployment),
            ],
        )
    }

    #[test]
    fn test_success_when_all_done() {
        let mut agg = aggregator();
        for id in [1, 2, 3] {
            agg.task_started(id);
            agg.task_done(id);
        }
        let result = agg.finish(None);

        assert_eq!(result.status, PlanStatus::Success);
        assert_eq!(
            result.tasks.iter().map(|t| t.task_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(result.outcome(2).unwrap().duration_ms().is_some());
        assert_eq!(result.summary(), "SUCCESS (3 tasks: 3 done, 0 failed, 0 skipped)");
    }

    #[test]
    fn test_failure_lists_failed_and_skipped() {
        let mut agg = aggregator();
        agg.task_started(1);
        agg.task_done(1);
        agg.task_started(2);
        agg.task_failed(2, "quota exceeded");
        agg.task_skipped(3, "upstream task 2 failed");
        let result = agg.finish(None);

        assert_eq!(result.status, PlanStatus::Failure);
        assert_eq!(result.failed, vec![2]);
        assert_eq!(result.skipped, vec![3]);
        assert_eq!(
            result.outcome(3).unwrap().diagnostic.as_deref(),
            Some("upstream task 2 failed")
        );
        assert!(result.outcome(3).unwrap().started_at.is_none());
        assert!(result.abort_reason.is_none());
    }

    #[test]
    fn test_abort_sets_status_and_reason() {
        let mut agg = aggregator();
        agg.task_done(1);
        agg.task_skipped(2, "run cancelled");
        agg.task_skipped(3, "run cancelled");
        let result = agg.finish(Some(Abort::Cancelled("cancelled by caller".to_string())));
        assert_eq!(result.status, PlanStatus::Cancelled);
        assert_eq!(result.abort_reason.as_deref(), Some("cancelled by caller"));

        let empty = ResultAggregator::new("run-2", "shop", Vec::new()).finish(None);
        assert!(empty.is_success());
    }
}
