//! PlanExecutor - the entry point for running execution plans
//!
//! Validates configuration, builds the task graph, checks that every task kind
//! in the plan has a handler and then hands the graph to the scheduler.
//! Anything rejected here is rejected before a single task runs.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::clients::Collaborators;
use crate::coord::{cancel_pair, CancelHandle, CancelSignal, PlanEvent, PlanResult, Scheduler};
use crate::core::config::ExecutorConfig;
use crate::core::errors::{ExecutorError, Result};
use crate::graph::TaskGraph;
use crate::handlers::HandlerRegistry;
use crate::plan::ExecutionPlan;

pub struct PlanExecutor {
    registry: Arc<HandlerRegistry>,
    config: ExecutorConfig,
    events: Option<mpsc::UnboundedSender<PlanEvent>>,
}

impl PlanExecutor {
    pub fn new(registry: HandlerRegistry, config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(registry),
            config,
            events: None,
        })
    }

    /// Executor with the built-in handlers wired to `collaborators`
    pub fn with_collaborators(collaborators: Collaborators, config: ExecutorConfig) -> Result<Self> {
        let registry = HandlerRegistry::from_collaborators(
            collaborators,
            config.retry.clone(),
            config.phase_wait.clone(),
        );
        Self::new(registry, config)
    }

    /// Subscribe to progress events of every run started by this executor
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PlanEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Create a handle/signal pair for [`PlanExecutor::execute_with_cancel`]
    pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
        cancel_pair()
    }

    /// Check a plan without running it
    pub fn prepare(&self, plan: &ExecutionPlan) -> Result<TaskGraph> {
        let graph = TaskGraph::build(plan)?;
        for (kind, task_id) in plan.kinds() {
            if !self.registry.contains(kind) {
                return Err(ExecutorError::HandlerNotRegistered { kind, task_id });
            }
        }
        Ok(graph)
    }

    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<PlanResult> {
        self.execute_with_cancel(plan, CancelSignal::never()).await
    }

    pub async fn execute_with_cancel(&self, plan: &ExecutionPlan, cancel: CancelSignal) -> Result<PlanResult> {
        let graph = match self.prepare(plan) {
            Ok(graph) => Arc::new(graph),
            Err(err) => {
                error!(namespace = %plan.namespace, error = %err, "Plan rejected");
                return Err(err);
            }
        };

        info!(
            namespace = %plan.namespace,
            tasks = graph.len(),
            "Executing plan"
        );
        Ok(self.scheduler().run_with_cancel(graph, cancel).await)
    }

    fn scheduler(&self) -> Scheduler {
        let mut scheduler = Scheduler::new(self.registry.clone(), self.config.concurrency_limit);
        if let Some(deadline) = self.config.plan_deadline() {
            scheduler = scheduler.with_deadline(deadline);
        }
        if let Some(events) = &self.events {
            scheduler = scheduler.with_events(events.clone());
        }
        scheduler
    }
}
