//! Scheduler - drives one plan run from submission to a final result
//!
//! A single coordination loop owns every task state, the ready queue and the
//! remaining-predecessor counters. Handler calls run on spawned tokio tasks,
//! each holding a semaphore permit, and report back over an mpsc channel, so
//! the loop never blocks on a handler.

use futures::FutureExt;
use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::context::{ContextView, ExecutionContext};
use crate::coord::aggregator::{Abort, PlanResult, ResultAggregator};
use crate::coord::cancel::CancelSignal;
use crate::coord::types::{PlanEvent, TaskCompletion, TaskState};
use crate::graph::TaskGraph;
use crate::handlers::HandlerRegistry;
use crate::plan::TaskId;

/// Reason recorded when a caller cancels a run
pub const CANCELLED_REASON: &str = "cancelled by caller";
/// Reason recorded when the plan deadline passes
pub const DEADLINE_REASON: &str = "plan deadline exceeded";

pub struct Scheduler {
    registry: Arc<HandlerRegistry>,
    concurrency_limit: usize,
    deadline: Option<Duration>,
    events: Option<mpsc::UnboundedSender<PlanEvent>>,
}

impl Scheduler {
    /// `concurrency_limit` below 1 is treated as 1
    pub fn new(registry: Arc<HandlerRegistry>, concurrency_limit: usize) -> Self {
        Self {
            registry,
            concurrency_limit: concurrency_limit.max(1),
            deadline: None,
            events: None,
        }
    }

    /// Stop dispatching once a run has taken longer than `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Send progress events of every run to `events`
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PlanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub async fn run(&self, graph: Arc<TaskGraph>) -> PlanResult {
        self.run_with_cancel(graph, CancelSignal::never()).await
    }

    pub async fn run_with_cancel(&self, graph: Arc<TaskGraph>, cancel: CancelSignal) -> PlanResult {
        let run_id = Uuid::new_v4().to_string();
        self.drive(&run_id, graph, cancel).await
    }

    #[instrument(name = "plan_run", skip(self, graph, cancel), fields(namespace = %graph.namespace()))]
    async fn drive(&self, run_id: &str, graph: Arc<TaskGraph>, mut cancel: CancelSignal) -> PlanResult {
        info!(tasks = graph.len(), limit = self.concurrency_limit, "Plan run started");
        self.emit(PlanEvent::RunStarted {
            run_id: run_id.to_string(),
            namespace: graph.namespace().to_string(),
            tasks: graph.len(),
        });

        let mut run = RunState::new(run_id, graph.clone());
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        // Every task reports exactly once, so sends never wait
        let (tx, mut rx) = mpsc::channel::<TaskCompletion>(graph.len().max(1));
        let deadline_at = self.deadline.map(|deadline| Instant::now() + deadline);
        let mut watch_cancel = true;
        let mut watch_deadline = deadline_at.is_some();

        loop {
            // A stop request seen here must win over dispatching
            if run.abort.is_none() {
                if watch_cancel && cancel.is_cancelled() {
                    watch_cancel = false;
                    self.stop(&mut run, Abort::Cancelled(CANCELLED_REASON.to_string()));
                } else if watch_deadline && deadline_at.is_some_and(|at| Instant::now() >= at) {
                    watch_deadline = false;
                    self.stop(&mut run, Abort::Cancelled(DEADLINE_REASON.to_string()));
                }
            }

            if run.abort.is_none() {
                while let Some(task_id) = run.peek_ready() {
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };
                    run.pop_ready();
                    self.dispatch(&mut run, task_id, permit, &tx);
                }
            }

            if run.in_flight == 0 && (run.ready.is_empty() || run.abort.is_some()) {
                break;
            }

            tokio::select! {
                biased;

                Some(completion) = rx.recv() => {
                    self.complete(&mut run, completion);
                }

                _ = cancel.cancelled(), if watch_cancel => {
                    watch_cancel = false;
                    self.stop(&mut run, Abort::Cancelled(CANCELLED_REASON.to_string()));
                }

                _ = wait_until(deadline_at), if watch_deadline => {
                    watch_deadline = false;
                    self.stop(&mut run, Abort::Cancelled(DEADLINE_REASON.to_string()));
                }
            }
        }

        let result = run.aggregator.finish(run.abort);
        info!(
            status = %result.status,
            failed = ?result.failed,
            skipped = ?result.skipped,
            abort_reason = ?result.abort_reason,
            "Plan run finished: {}",
            result.summary()
        );
        self.emit(PlanEvent::RunFinished {
            run_id: run_id.to_string(),
            status: result.status,
        });
        result
    }

    fn dispatch(
        &self,
        run: &mut RunState,
        task_id: TaskId,
        permit: OwnedSemaphorePermit,
        tx: &mpsc::Sender<TaskCompletion>,
    ) {
        let graph = run.graph.clone();
        let Some(task) = graph.task(task_id) else {
            return;
        };
        let kind = task.kind();

        let Some(handler) = self.registry.get(kind) else {
            // The executor checks coverage before a run; this only happens
            // when the scheduler is driven directly.
            drop(permit);
            let diagnostic = format!("no handler registered for task kind {}", kind);
            error!(task_id, %kind, "{}", diagnostic);
            self.fail(run, task_id, diagnostic);
            return;
        };

        run.set_state(task_id, TaskState::Running);
        run.aggregator.task_started(task_id);
        run.in_flight += 1;
        info!(task_id, %kind, target = %task.payload.target(), "Task dispatched");
        self.emit(PlanEvent::TaskDispatched { task_id, kind });

        let payload = task.payload.clone();
        let view = ContextView::new(run.context.clone(), graph.clone(), task_id);
        let tx = tx.clone();

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.execute(&payload, &view))
                .catch_unwind()
                .await;

            let completion = match outcome {
                Ok(Ok(outputs)) => TaskCompletion::Succeeded {
                    task_id,
                    outputs: outputs.into_inner(),
                },
                Ok(Err(err)) => TaskCompletion::Failed {
                    task_id,
                    diagnostic: err.to_string(),
                    category: err.category(),
                    fatal: err.is_fatal(),
                },
                Err(panic) => TaskCompletion::Failed {
                    task_id,
                    diagnostic: format!("handler panicked: {}", panic_message(panic.as_ref())),
                    category: "panic",
                    fatal: false,
                },
            };

            // Release the slot before reporting so the loop can refill it
            drop(permit);
            let _ = tx.send(completion).await;
        });
    }

    fn complete(&self, run: &mut RunState, completion: TaskCompletion) {
        run.in_flight -= 1;
        let task_id = completion.task_id();

        match completion {
            TaskCompletion::Succeeded { outputs, .. } => {
                if let Err(err) = run.context.insert_all(task_id, outputs) {
                    let diagnostic = err.to_string();
                    error!(task_id, error = %diagnostic, "Task output conflicts with existing context value");
                    self.fail(run, task_id, diagnostic.clone());
                    self.stop(run, Abort::Fatal(diagnostic));
                    return;
                }

                run.set_state(task_id, TaskState::Done);
                run.aggregator.task_done(task_id);
                info!(task_id, "Task done");
                self.emit(PlanEvent::TaskFinished {
                    task_id,
                    state: TaskState::Done,
                    diagnostic: None,
                });

                for succ in run.graph.successors_of(task_id).to_vec() {
                    if run.state_of(succ) != TaskState::Pending {
                        continue;
                    }
                    if let Some(remaining) = run.remaining.get_mut(&succ) {
                        *remaining -= 1;
                        if *remaining == 0 {
                            debug!(task_id = succ, "Task ready");
                            run.set_state(succ, TaskState::Ready);
                            run.ready.push(Reverse(succ));
                        }
                    }
                }
            }
            TaskCompletion::Failed {
                diagnostic,
                category,
                fatal,
                ..
            } => {
                warn!(task_id, error = %diagnostic, category, fatal, "Task failed");
                self.fail(run, task_id, diagnostic.clone());
                if fatal {
                    self.stop(run, Abort::Fatal(diagnostic));
                }
            }
        }
    }

    /// Mark a task FAILED and skip everything downstream of it
    fn fail(&self, run: &mut RunState, task_id: TaskId, diagnostic: String) {
        run.set_state(task_id, TaskState::Failed);
        run.aggregator.task_failed(task_id, diagnostic.clone());
        self.emit(PlanEvent::TaskFinished {
            task_id,
            state: TaskState::Failed,
            diagnostic: Some(diagnostic),
        });

        let reason = format!("upstream task {} failed", task_id);
        for downstream in run.graph.downstream_of(task_id) {
            if run.state_of(downstream) == TaskState::Pending {
                self.skip(run, downstream, &reason);
            }
        }
    }

    /// Stop dispatching. Tasks already running finish; the rest are skipped.
    fn stop(&self, run: &mut RunState, abort: Abort) {
        if run.abort.is_some() {
            return;
        }

        let undispatched: Vec<TaskId> = run
            .states
            .iter()
            .filter(|(_, state)| matches!(state, TaskState::Pending | TaskState::Ready))
            .map(|(id, _)| *id)
            .collect();

        let reason = match &abort {
            Abort::Cancelled(reason) => reason.clone(),
            Abort::Fatal(reason) => format!("run aborted: {}", reason),
        };

        warn!(
            reason = %reason,
            undispatched = undispatched.len(),
            in_flight = run.in_flight,
            "Stopping plan run"
        );
        for task_id in undispatched {
            self.skip(run, task_id, &reason);
        }
        run.ready.clear();
        run.abort = Some(abort);
    }

    fn skip(&self, run: &mut RunState, task_id: TaskId, reason: &str) {
        debug!(task_id, reason, "Task skipped");
        run.set_state(task_id, TaskState::Skipped);
        run.aggregator.task_skipped(task_id, reason);
        self.emit(PlanEvent::TaskSkipped {
            task_id,
            reason: reason.to_string(),
        });
    }

    fn emit(&self, event: PlanEvent) {
        if let Some(events) = &self.events {
            // Observers going away must not affect the run
            let _ = events.send(event);
        }
    }
}

/// Everything the coordination loop mutates during one run
struct RunState {
    graph: Arc<TaskGraph>,
    context: Arc<ExecutionContext>,
    states: BTreeMap<TaskId, TaskState>,
    remaining: HashMap<TaskId, usize>,
    ready: BinaryHeap<Reverse<TaskId>>,
    in_flight: usize,
    abort: Option<Abort>,
    aggregator: ResultAggregator,
}

impl RunState {
    fn new(run_id: &str, graph: Arc<TaskGraph>) -> Self {
        let mut states = BTreeMap::new();
        let mut remaining = HashMap::with_capacity(graph.len());
        let mut kinds = Vec::with_capacity(graph.len());
        for id in graph.ids() {
            states.insert(id, TaskState::Pending);
            remaining.insert(id, graph.remaining_predecessors(id));
            if let Some(task) = graph.task(id) {
                kinds.push((id, task.kind()));
            }
        }

        let mut ready = BinaryHeap::new();
        for root in graph.roots() {
            states.insert(root, TaskState::Ready);
            ready.push(Reverse(root));
        }

        Self {
            aggregator: ResultAggregator::new(run_id, graph.namespace(), kinds),
            graph,
            context: Arc::new(ExecutionContext::new()),
            states,
            remaining,
            ready,
            in_flight: 0,
            abort: None,
        }
    }

    fn peek_ready(&self) -> Option<TaskId> {
        self.ready.peek().map(|Reverse(id)| *id)
    }

    fn pop_ready(&mut self) -> Option<TaskId> {
        self.ready.pop().map(|Reverse(id)| id)
    }

    fn state_of(&self, task_id: TaskId) -> TaskState {
        self.states
            .get(&task_id)
            .copied()
            .unwrap_or(TaskState::Skipped)
    }

    fn set_state(&mut self, task_id: TaskId, state: TaskState) {
        self.states.insert(task_id, state);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
