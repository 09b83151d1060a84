//! Scheduling behavior with a scripted handler
//!
//! Every task is a `create_namespace` task; a scripted handler decides per
//! task id how long it takes, what it reads and writes and whether it fails.
//! Start and end of every call are logged so ordering can be checked.

use async_trait::async_trait;
use plan_executor::{
    cancel_pair, ContextView, ExecutionPlan, ExecutorConfig, HandlerError, HandlerRegistry,
    PlanBuilder, PlanEvent, PlanExecutor, PlanStatus, Scheduler, TaskGraph, TaskHandler, TaskId,
    TaskKind, TaskOutputs, TaskPayload, TaskState,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default, Clone)]
struct Script {
    delay_ms: u64,
    /// Hold the runtime thread instead of yielding
    block_ms: u64,
    fail: bool,
    reads: Option<String>,
    writes: Option<String>,
    gate: Option<Arc<Notify>>,
    started: Option<Arc<Notify>>,
}

#[derive(Default)]
struct ScriptedHandler {
    scripts: HashMap<TaskId, Script>,
    /// (task id, started?) in the order calls began and ended
    log: Mutex<Vec<(TaskId, bool)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedHandler {
    fn with(mut self, task_id: TaskId, script: Script) -> Self {
        self.scripts.insert(task_id, script);
        self
    }

    fn log(&self) -> Vec<(TaskId, bool)> {
        self.log.lock().unwrap().clone()
    }

    fn start_order(&self) -> Vec<TaskId> {
        self.log()
            .into_iter()
            .filter(|(_, started)| *started)
            .map(|(id, _)| id)
            .collect()
    }

    fn position(&self, task_id: TaskId, started: bool) -> usize {
        self.log()
            .iter()
            .position(|entry| *entry == (task_id, started))
            .unwrap()
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn execute(&self, _payload: &TaskPayload, ctx: &ContextView) -> Result<TaskOutputs, HandlerError> {
        let task_id = ctx.task_id();
        let script = self.scripts.get(&task_id).cloned().unwrap_or_default();

        self.log.lock().unwrap().push((task_id, true));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if let Some(started) = &script.started {
            started.notify_one();
        }
        if let Some(gate) = &script.gate {
            gate.notified().await;
        }
        if script.block_ms > 0 {
            std::thread::sleep(Duration::from_millis(script.block_ms));
        }
        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push((task_id, false));

        if let Some(key) = &script.reads {
            ctx.get(key)?;
        }
        if script.fail {
            return Err(HandlerError::failed(format!("task {} scripted failure", task_id)));
        }
        Ok(match &script.writes {
            Some(key) => TaskOutputs::single(key.clone(), Value::from(task_id)),
            None => TaskOutputs::empty(),
        })
    }
}

fn namespace(id: TaskId) -> TaskPayload {
    TaskPayload::CreateNamespace {
        namespace: format!("ns-{}", id),
    }
}

/// Plan from (id, predecessors) pairs
fn plan(tasks: &[(TaskId, &[TaskId])]) -> ExecutionPlan {
    tasks
        .iter()
        .fold(PlanBuilder::new("shop"), |builder, (id, after)| {
            builder.task(*id, namespace(*id), after)
        })
        .build()
}

fn executor(handler: Arc<ScriptedHandler>, limit: usize) -> PlanExecutor {
    let registry = HandlerRegistry::new()
        .with(TaskKind::CreateNamespace, handler)
        .unwrap();
    PlanExecutor::new(registry, ExecutorConfig::default().with_concurrency_limit(limit)).unwrap()
}

fn slow(delay_ms: u64) -> Script {
    Script {
        delay_ms,
        ..Script::default()
    }
}

/// Diamond with a tail: 1 -> {2, 3} -> 4 -> 5, plus an independent 6
const DIAMOND: &[(TaskId, &[TaskId])] = &[
    (1, &[]),
    (2, &[1]),
    (3, &[1]),
    (4, &[2, 3]),
    (5, &[4]),
    (6, &[]),
];

/// No task starts before every predecessor has finished
#[tokio::test]
async fn test_tasks_start_after_predecessors_finish() {
    let handler = Arc::new(
        ScriptedHandler::default()
            .with(2, slow(30))
            .with(3, slow(5))
            .with(6, slow(10)),
    );
    let result = executor(handler.clone(), 4)
        .execute(&plan(DIAMOND))
        .await
        .unwrap();
    assert!(result.is_success());

    for (id, predecessors) in DIAMOND {
        for pred in predecessors.iter() {
            assert!(
                handler.position(*pred, false) < handler.position(*id, true),
                "task {} started before {} finished: {:?}",
                id,
                pred,
                handler.log()
            );
        }
    }
}

/// Final states do not depend on how many tasks run at once
#[tokio::test]
async fn test_states_independent_of_concurrency_limit() {
    let mut outcomes = Vec::new();
    for limit in [1, 2, 8] {
        let handler = Arc::new(
            ScriptedHandler::default()
                .with(3, Script {
                    fail: true,
                    ..slow(5)
                })
                .with(2, slow(10)),
        );
        let result = executor(handler.clone(), limit)
            .execute(&plan(DIAMOND))
            .await
            .unwrap();
        assert!(handler.max_running.load(Ordering::SeqCst) <= limit);
        outcomes.push((result.status, result.states()));
    }

    let (status, states) = outcomes[0].clone();
    assert_eq!(status, PlanStatus::Failure);
    assert_eq!(states[&1], TaskState::Done);
    assert_eq!(states[&2], TaskState::Done);
    assert_eq!(states[&3], TaskState::Failed);
    assert_eq!(states[&4], TaskState::Skipped);
    assert_eq!(states[&5], TaskState::Skipped);
    assert_eq!(states[&6], TaskState::Done);
    for other in &outcomes[1..] {
        assert_eq!(other, &outcomes[0]);
    }
}

/// The limit is both reached and never exceeded
#[tokio::test]
async fn test_concurrency_limit_respected() {
    let independent: Vec<(TaskId, &[TaskId])> = (1..=8).map(|id| (id, &[] as &[TaskId])).collect();
    let handler = (1..=8).fold(ScriptedHandler::default(), |h, id| h.with(id, slow(20)));
    let handler = Arc::new(handler);

    let result = executor(handler.clone(), 3)
        .execute(&plan(&independent))
        .await
        .unwrap();
    assert!(result.is_success());
    let max = handler.max_running.load(Ordering::SeqCst);
    assert_eq!(max, 3, "{} calls ran at once", max);
}

/// Independent roots start together instead of one after the other
#[tokio::test]
async fn test_independent_roots_run_in_parallel() {
    // namespace -> deployment -> service, plus an unrelated secret
    let handler = Arc::new(ScriptedHandler::default().with(1, slow(20)).with(4, slow(20)));
    let result = executor(handler.clone(), 4)
        .execute(&plan(&[(1, &[]), (2, &[1]), (3, &[2]), (4, &[])]))
        .await
        .unwrap();
    assert!(result.is_success());

    let first_end = handler.position(1, false).min(handler.position(4, false));
    assert!(
        handler.position(1, true) < first_end && handler.position(4, true) < first_end,
        "roots did not overlap: {:?}",
        handler.log()
    );
}

/// With one slot, ready tasks are taken lowest id first
#[tokio::test]
async fn test_ready_ties_broken_by_lowest_id() {
    let handler = Arc::new(ScriptedHandler::default());
    let result = executor(handler.clone(), 1)
        .execute(&plan(&[(9, &[]), (3, &[]), (5, &[]), (4, &[3])]))
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(handler.start_order(), vec![3, 4, 5, 9]);
}

/// Cancelling lets running calls finish and skips everything not started
#[tokio::test]
async fn test_cancel_mid_run() {
    let gate = Arc::new(Notify::new());
    let started = Arc::new(Notify::new());
    let handler = Arc::new(ScriptedHandler::default().with(
        1,
        Script {
            gate: Some(gate.clone()),
            started: Some(started.clone()),
            ..Script::default()
        },
    ));
    let mut executor = executor(handler.clone(), 1);
    let mut events = executor.subscribe();
    let (cancel, signal) = cancel_pair();
    let plan = plan(&[(1, &[]), (2, &[1]), (3, &[])]);

    let run = executor.execute_with_cancel(&plan, signal);
    let driver = async {
        started.notified().await;
        cancel.cancel();
        // Release task 1 only once the scheduler has reacted to the cancel
        while let Some(event) = events.recv().await {
            if matches!(event, PlanEvent::TaskSkipped { .. }) {
                break;
            }
        }
        gate.notify_one();
    };
    let (result, ()) = tokio::join!(run, driver);
    let result = result.unwrap();

    assert_eq!(result.status, PlanStatus::Cancelled);
    assert_eq!(result.abort_reason.as_deref(), Some("cancelled by caller"));
    assert_eq!(result.state_of(1), Some(TaskState::Done));
    assert_eq!(result.state_of(2), Some(TaskState::Skipped));
    assert_eq!(result.state_of(3), Some(TaskState::Skipped));
    assert_eq!(handler.start_order(), vec![1]);
}

/// A deadline stops dispatching like a cancel does
#[tokio::test]
async fn test_plan_deadline_cancels_run() {
    let handler = Arc::new(ScriptedHandler::default().with(1, slow(300)));
    let registry = HandlerRegistry::new()
        .with(TaskKind::CreateNamespace, handler.clone())
        .unwrap();
    let graph = Arc::new(TaskGraph::build(&plan(&[(1, &[]), (2, &[1])])).unwrap());

    let result = Scheduler::new(Arc::new(registry), 2)
        .with_deadline(Duration::from_millis(50))
        .run(graph)
        .await;

    assert_eq!(result.status, PlanStatus::Cancelled);
    assert_eq!(result.abort_reason.as_deref(), Some("plan deadline exceeded"));
    assert_eq!(result.state_of(1), Some(TaskState::Done));
    assert_eq!(result.state_of(2), Some(TaskState::Skipped));
}

/// A cancel while the last tasks are running still ends the run CANCELLED
#[tokio::test]
async fn test_cancel_after_last_dispatch() {
    let gates = [Arc::new(Notify::new()), Arc::new(Notify::new())];
    let started = Arc::new(Notify::new());
    let handler = Arc::new(
        ScriptedHandler::default()
            .with(
                1,
                Script {
                    gate: Some(gates[0].clone()),
                    started: Some(started.clone()),
                    ..Script::default()
                },
            )
            .with(
                2,
                Script {
                    gate: Some(gates[1].clone()),
                    ..Script::default()
                },
            ),
    );
    let executor = executor(handler.clone(), 2);
    let (cancel, signal) = cancel_pair();
    let plan = plan(&[(1, &[]), (2, &[])]);

    let run = executor.execute_with_cancel(&plan, signal);
    let driver = async {
        started.notified().await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        for gate in &gates {
            gate.notify_one();
        }
    };
    let (result, ()) = tokio::join!(run, driver);
    let result = result.unwrap();

    assert_eq!(result.status, PlanStatus::Cancelled);
    assert_eq!(result.abort_reason.as_deref(), Some("cancelled by caller"));
    assert_eq!(result.state_of(1), Some(TaskState::Done));
    assert_eq!(result.state_of(2), Some(TaskState::Done));
    assert!(result.skipped.is_empty());
}

/// A signal cancelled before the run starts prevents every dispatch
#[tokio::test]
async fn test_cancelled_before_start_dispatches_nothing() {
    let handler = Arc::new(ScriptedHandler::default());
    let executor = executor(handler.clone(), 1);
    let (cancel, signal) = cancel_pair();
    cancel.cancel();

    let result = executor
        .execute_with_cancel(&plan(&[(1, &[]), (2, &[1])]), signal)
        .await
        .unwrap();

    assert_eq!(result.status, PlanStatus::Cancelled);
    assert_eq!(result.abort_reason.as_deref(), Some("cancelled by caller"));
    assert_eq!(result.skipped, vec![1, 2]);
    assert!(handler.log().is_empty());
}

/// A deadline that passed while a completion was waiting stops the
/// successors that completion made ready
#[tokio::test]
async fn test_deadline_checked_before_each_dispatch() {
    // Blocking the single test runtime thread makes the completion and the
    // expired deadline visible to the loop at the same time
    let handler = Arc::new(ScriptedHandler::default().with(
        1,
        Script {
            block_ms: 60,
            ..Script::default()
        },
    ));
    let registry = HandlerRegistry::new()
        .with(TaskKind::CreateNamespace, handler.clone())
        .unwrap();
    let graph = Arc::new(TaskGraph::build(&plan(&[(1, &[]), (2, &[1]), (3, &[2])])).unwrap());

    let result = Scheduler::new(Arc::new(registry), 1)
        .with_deadline(Duration::from_millis(20))
        .run(graph)
        .await;

    assert_eq!(result.status, PlanStatus::Cancelled);
    assert_eq!(result.abort_reason.as_deref(), Some("plan deadline exceeded"));
    assert_eq!(result.state_of(1), Some(TaskState::Done));
    assert_eq!(result.skipped, vec![2, 3]);
    assert_eq!(handler.start_order(), vec![1]);
}

/// Two tasks writing the same key abort the run
#[tokio::test]
async fn test_duplicate_output_key_aborts() {
    let writes = |key: &str| Script {
        writes: Some(key.to_string()),
        ..Script::default()
    };
    let handler = Arc::new(
        ScriptedHandler::default()
            .with(1, writes("address"))
            .with(2, writes("address")),
    );
    let result = executor(handler, 1)
        .execute(&plan(&[(1, &[]), (2, &[]), (3, &[2]), (4, &[])]))
        .await
        .unwrap();

    assert_eq!(result.status, PlanStatus::Failure);
    assert_eq!(result.state_of(1), Some(TaskState::Done));
    assert_eq!(result.state_of(2), Some(TaskState::Failed));
    assert_eq!(result.state_of(3), Some(TaskState::Skipped));
    assert_eq!(result.state_of(4), Some(TaskState::Skipped));
    let reason = result.abort_reason.clone().unwrap();
    assert!(reason.contains("already written"), "{}", reason);
    assert!(result
        .outcome(4)
        .unwrap()
        .diagnostic
        .as_deref()
        .unwrap()
        .starts_with("run aborted:"));
}

/// Values written upstream are visible downstream
#[tokio::test]
async fn test_downstream_reads_upstream_output() {
    let handler = Arc::new(
        ScriptedHandler::default()
            .with(1, Script {
                writes: Some("db.address".to_string()),
                ..Script::default()
            })
            .with(2, Script {
                reads: Some("db.address".to_string()),
                ..Script::default()
            }),
    );
    let result = executor(handler, 2)
        .execute(&plan(&[(1, &[]), (2, &[1])]))
        .await
        .unwrap();
    assert!(result.is_success(), "{}", result.summary());
}

/// Reading a value from a task that is not upstream is a fatal plan error
#[tokio::test]
async fn test_read_from_unrelated_producer_aborts() {
    let handler = Arc::new(
        ScriptedHandler::default()
            .with(1, Script {
                writes: Some("db.address".to_string()),
                ..Script::default()
            })
            .with(2, Script {
                reads: Some("db.address".to_string()),
                ..Script::default()
            }),
    );
    // No edge between 1 and 2; with one slot task 1 still runs first
    let result = executor(handler, 1)
        .execute(&plan(&[(1, &[]), (2, &[])]))
        .await
        .unwrap();
    assert_eq!(result.status, PlanStatus::Failure);
    assert_eq!(result.state_of(2), Some(TaskState::Failed));
    assert!(result.abort_reason.is_some());
}

/// An empty plan succeeds without calling anything
#[tokio::test]
async fn test_empty_plan() {
    let handler = Arc::new(ScriptedHandler::default());
    let result = executor(handler.clone(), 2)
        .execute(&plan(&[]))
        .await
        .unwrap();
    assert_eq!(result.status, PlanStatus::Success);
    assert!(result.tasks.is_empty());
    assert!(handler.log().is_empty());
}
