//! Validated, immutable index over a submitted plan
//!
//! Tasks live in an arena addressed by id. Edges are kept both as adjacency
//! lists (for the scheduler's hot path) and as a petgraph `DiGraph` used for
//! cycle detection and transitive traversals.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::debug;

use crate::core::errors::GraphError;
use crate::plan::{ExecutionPlan, Task, TaskId};

#[derive(Debug)]
pub struct TaskGraph {
    namespace: String,
    tasks: BTreeMap<TaskId, Task>,
    dag: DiGraph<TaskId, ()>,
    indices: HashMap<TaskId, NodeIndex>,
    order: Vec<TaskId>,
    upstream: HashMap<TaskId, BTreeSet<TaskId>>,
}

impl TaskGraph {
    /// Validate the plan's structure and index it.
    ///
    /// Checks run in a fixed order (ids, self-loops, edge targets, edge
    /// symmetry, cycles) so the same malformed plan always reports the same
    /// error.
    pub fn build(plan: &ExecutionPlan) -> Result<Self, GraphError> {
        let mut tasks: BTreeMap<TaskId, Task> = BTreeMap::new();
        for task in &plan.tasks {
            if tasks.insert(task.id, task.clone()).is_some() {
                return Err(GraphError::DuplicateTaskId { task_id: task.id });
            }
        }

        for task in plan.tasks.iter() {
            if task.predecessors.contains(&task.id) || task.successors.contains(&task.id) {
                return Err(GraphError::Cycle { task_id: task.id });
            }
            check_edge_list(&tasks, task.id, &task.predecessors)?;
            check_edge_list(&tasks, task.id, &task.successors)?;
        }

        for task in plan.tasks.iter() {
            for pred in &task.predecessors {
                if !tasks[pred].successors.contains(&task.id) {
                    return Err(GraphError::InconsistentEdge {
                        from: *pred,
                        to: task.id,
                    });
                }
            }
            for succ in &task.successors {
                if !tasks[succ].predecessors.contains(&task.id) {
                    return Err(GraphError::InconsistentEdge {
                        from: task.id,
                        to: *succ,
                    });
                }
            }
        }

        let mut dag = DiGraph::<TaskId, ()>::with_capacity(tasks.len(), 0);
        let mut indices = HashMap::with_capacity(tasks.len());
        for id in tasks.keys() {
            indices.insert(*id, dag.add_node(*id));
        }
        for task in tasks.values() {
            for succ in &task.successors {
                dag.add_edge(indices[&task.id], indices[succ], ());
            }
        }

        if let Err(cycle) = toposort(&dag, None) {
            return Err(GraphError::Cycle {
                task_id: dag[cycle.node_id()],
            });
        }

        let order = stable_order(&tasks);
        let mut upstream: HashMap<TaskId, BTreeSet<TaskId>> = HashMap::with_capacity(tasks.len());
        for id in &order {
            let mut ancestors = BTreeSet::new();
            for pred in &tasks[id].predecessors {
                ancestors.insert(*pred);
                if let Some(further) = upstream.get(pred) {
                    ancestors.extend(further.iter().copied());
                }
            }
            upstream.insert(*id, ancestors);
        }

        debug!(
            namespace = %plan.namespace,
            tasks = tasks.len(),
            edges = dag.edge_count(),
            "Task graph built"
        );

        Ok(Self {
            namespace: plan.namespace.clone(),
            tasks,
            dag,
            indices,
            order,
            upstream,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All task ids, ascending
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.keys().copied()
    }

    /// Tasks with no predecessors, ascending by id
    pub fn roots(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|task| task.is_root())
            .map(|task| task.id)
            .collect()
    }

    pub fn successors_of(&self, id: TaskId) -> &[TaskId] {
        self.tasks
            .get(&id)
            .map(|task| task.successors.as_slice())
            .unwrap_or(&[])
    }

    pub fn predecessors_of(&self, id: TaskId) -> &[TaskId] {
        self.tasks
            .get(&id)
            .map(|task| task.predecessors.as_slice())
            .unwrap_or(&[])
    }

    /// Initial value of the scheduler's unfinished-predecessor counter
    pub fn remaining_predecessors(&self, id: TaskId) -> usize {
        self.predecessors_of(id).len()
    }

    /// Topological order, lowest id first among tasks that are ready together
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Every transitive predecessor of `id`
    pub fn upstream_of(&self, id: TaskId) -> BTreeSet<TaskId> {
        self.upstream.get(&id).cloned().unwrap_or_default()
    }

    pub fn is_upstream(&self, ancestor: TaskId, of: TaskId) -> bool {
        self.upstream
            .get(&of)
            .map(|set| set.contains(&ancestor))
            .unwrap_or(false)
    }

    /// Every transitive successor of `id`, ascending
    pub fn downstream_of(&self, id: TaskId) -> Vec<TaskId> {
        let Some(&start) = self.indices.get(&id) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut dfs = Dfs::new(&self.dag, start);
        while let Some(node) = dfs.next(&self.dag) {
            if node != start {
                seen.insert(self.dag[node]);
            }
        }
        seen.into_iter().collect()
    }
}

fn check_edge_list(
    tasks: &BTreeMap<TaskId, Task>,
    task_id: TaskId,
    edges: &[TaskId],
) -> Result<(), GraphError> {
    let mut seen = HashSet::with_capacity(edges.len());
    for other in edges {
        if !seen.insert(*other) {
            return Err(GraphError::DuplicateEdge {
                task_id,
                other: *other,
            });
        }
        if !tasks.contains_key(other) {
            return Err(GraphError::DanglingEdge {
                task_id,
                missing: *other,
            });
        }
    }
    Ok(())
}

/// Kahn's algorithm with a min-heap so ties resolve by ascending id.
/// Only called on graphs already known to be acyclic.
fn stable_order(tasks: &BTreeMap<TaskId, Task>) -> Vec<TaskId> {
    let mut remaining: HashMap<TaskId, usize> = tasks
        .values()
        .map(|task| (task.id, task.predecessors.len()))
        .collect();
    let mut heap: BinaryHeap<Reverse<TaskId>> = tasks
        .values()
        .filter(|task| task.is_root())
        .map(|task| Reverse(task.id))
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(Reverse(id)) = heap.pop() {
        order.push(id);
        for succ in &tasks[&id].successors {
            if let Some(count) = remaining.get_mut(succ) {
                *count -= 1;
                if *count == 0 {
                    heap.push(Reverse(*succ));
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanBuilder, TaskPayload};
    use pretty_assertions::assert_eq;

    fn ns(name: &str) -> TaskPayload {
        TaskPayload::CreateNamespace {
            namespace: name.to_string(),
        }
    }

    fn diamond() -> ExecutionPlan {
        PlanBuilder::new("shop")
            .task(1, ns("a"), &[])
            .task(2, ns("b"), &[1])
            .task(3, ns("c"), &[1])
            .task(4, ns("d"), &[2, 3])
            .task(5, ns("e"), &[])
            .build()
    }

    #[test]
    fn test_build_indexes_plan() {
        let graph = TaskGraph::build(&diamond()).unwrap();

        assert_eq!(graph.namespace(), "shop");
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.roots(), vec![1, 5]);
        assert_eq!(graph.successors_of(1), &[2, 3]);
        assert_eq!(graph.predecessors_of(4), &[2, 3]);
        assert_eq!(graph.remaining_predecessors(4), 2);
        assert_eq!(graph.topological_order(), &[1, 2, 3, 4, 5]);
        assert_eq!(graph.downstream_of(1), vec![2, 3, 4]);
        assert!(graph.downstream_of(5).is_empty());
    }

    #[test]
    fn test_upstream_sets() {
        let graph = TaskGraph::build(&diamond()).unwrap();
        assert!(graph.upstream_of(1).is_empty());
        assert_eq!(graph.upstream_of(2), BTreeSet::from([1]));
        assert_eq!(graph.upstream_of(4), BTreeSet::from([1, 2, 3]));
        assert!(graph.upstream_of(5).is_empty());
        assert!(graph.is_upstream(1, 4));
        assert!(!graph.is_upstream(5, 4));
        assert!(!graph.is_upstream(3, 2));
    }

    #[test]
    fn test_empty_plan() {
        let graph = TaskGraph::build(&ExecutionPlan::new("ns", vec![])).unwrap();
        assert!(graph.is_empty());
        assert!(graph.roots().is_empty());
    }

    #[test]
    fn test_duplicate_id() {
        let plan = PlanBuilder::new("ns")
            .task(1, ns("a"), &[])
            .task(1, ns("b"), &[])
            .build();
        assert_eq!(
            TaskGraph::build(&plan).unwrap_err(),
            GraphError::DuplicateTaskId { task_id: 1 }
        );
    }

    #[test]
    fn test_dangling_edge() {
        let plan = PlanBuilder::new("ns").task(1, ns("a"), &[7]).build();
        assert_eq!(
            TaskGraph::build(&plan).unwrap_err(),
            GraphError::DanglingEdge {
                task_id: 1,
                missing: 7
            }
        );
    }

    #[test]
    fn test_inconsistent_edge() {
        let mut plan = PlanBuilder::new("ns")
            .task(1, ns("a"), &[])
            .task(2, ns("b"), &[])
            .build();
        plan.tasks[0].successors.push(2);
        assert_eq!(
            TaskGraph::build(&plan).unwrap_err(),
            GraphError::InconsistentEdge { from: 1, to: 2 }
        );
    }

    #[test]
    fn test_duplicate_edge() {
        let plan = PlanBuilder::new("ns")
            .task(1, ns("a"), &[])
            .task(2, ns("b"), &[1, 1])
            .build();
        assert_eq!(
            TaskGraph::build(&plan).unwrap_err(),
            GraphError::DuplicateEdge {
                task_id: 2,
                other: 1
            }
        );
    }

    #[test]
    fn test_cycles_rejected() {
        let plan = PlanBuilder::new("ns")
            .task(1, ns("a"), &[3])
            .task(2, ns("b"), &[1])
            .task(3, ns("c"), &[2])
            .build();
        assert!(matches!(
            TaskGraph::build(&plan).unwrap_err(),
            GraphError::Cycle { .. }
        ));

        let self_loop = PlanBuilder::new("ns").task(4, ns("a"), &[4]).build();
        assert_eq!(
            TaskGraph::build(&self_loop).unwrap_err(),
            GraphError::Cycle { task_id: 4 }
        );
    }
}
