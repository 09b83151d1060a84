use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::errors::Result;
use crate::plan::payload::{TaskKind, TaskPayload};

/// Task identity, unique within one plan
pub type TaskId = u64;

/// One node of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    /// Tasks that must be DONE before this one may start
    #[serde(default)]
    pub predecessors: Vec<TaskId>,
    /// Tasks waiting on this one
    #[serde(default)]
    pub successors: Vec<TaskId>,
}

impl Task {
    pub fn new(id: TaskId, payload: TaskPayload) -> Self {
        Self {
            id,
            payload,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn is_root(&self) -> bool {
        self.predecessors.is_empty()
    }
}

/// The unit submitted to the executor: tasks plus the namespace they act in.
///
/// Plans are immutable once submitted; the executor only ever reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub namespace: String,
    pub tasks: Vec<Task>,
}

impl ExecutionPlan {
    pub fn new(namespace: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            namespace: namespace.into(),
            tasks,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Distinct task kinds used by the plan, each with the first task using it
    pub fn kinds(&self) -> Vec<(TaskKind, TaskId)> {
        let mut seen: Vec<(TaskKind, TaskId)> = Vec::new();
        for task in &self.tasks {
            if !seen.iter().any(|(kind, _)| *kind == task.kind()) {
                seen.push((task.kind(), task.id));
            }
        }
        seen
    }
}

/// Builds plans from predecessor lists and fills in matching successor lists.
///
/// Predecessors that name unknown ids are kept as-is so graph validation can
/// report them.
pub struct PlanBuilder {
    namespace: String,
    tasks: Vec<Task>,
}

impl PlanBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            tasks: Vec::new(),
        }
    }

    /// Add a task that runs after every id in `after`
    pub fn task(mut self, id: TaskId, payload: TaskPayload, after: &[TaskId]) -> Self {
        let mut task = Task::new(id, payload);
        task.predecessors = after.to_vec();
        self.tasks.push(task);
        self
    }

    pub fn build(mut self) -> ExecutionPlan {
        let position: HashMap<TaskId, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(pos, task)| (task.id, pos))
            .collect();

        let edges: Vec<(TaskId, TaskId)> = self
            .tasks
            .iter()
            .flat_map(|task| task.predecessors.iter().map(move |pred| (*pred, task.id)))
            .collect();

        for (from, to) in edges {
            if let Some(&pos) = position.get(&from) {
                let successors = &mut self.tasks[pos].successors;
                if !successors.contains(&to) {
                    successors.push(to);
                }
            }
        }

        ExecutionPlan::new(self.namespace, self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn namespace(ns: &str) -> TaskPayload {
        TaskPayload::CreateNamespace {
            namespace: ns.to_string(),
        }
    }

    #[test]
    fn test_builder_derives_successors() {
        let plan = PlanBuilder::new("ns")
            .task(1, namespace("a"), &[])
            .task(2, namespace("b"), &[1])
            .task(3, namespace("c"), &[1, 2])
            .build();

        assert_eq!(plan.tasks[0].successors, vec![2, 3]);
        assert_eq!(plan.tasks[1].successors, vec![3]);
        assert!(plan.tasks[2].successors.is_empty());
        assert_eq!(plan.kinds(), vec![(TaskKind::CreateNamespace, 1)]);
    }

    #[test]
    fn test_plan_from_yaml() {
        let yaml = r#"
namespace: shop
tasks:
  - id: 1
    payload:
      kind: create_namespace
      namespace: shop
    successors: [2]
  - id: 2
    payload:
      kind: create_secret
      namespace: shop
    predecessors: [1]
"#;
        let plan = ExecutionPlan::from_yaml_str(yaml).unwrap();
        assert_eq!(plan.namespace, "shop");
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.tasks[1].kind(), TaskKind::CreateSecret);
        assert!(plan.tasks[0].is_root());
    }

    #[test]
    fn test_plan_from_json_rejects_unknown_kind() {
        let json = r#"{"namespace":"ns","tasks":[{"id":1,"payload":{"kind":"reboot_cluster"}}]}"#;
        assert!(ExecutionPlan::from_json_str(json).is_err());
    }
}
