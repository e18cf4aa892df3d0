//! Pure scheduling functions over a task graph snapshot.
//!
//! Nothing here mutates state. The driver validates a graph, asks for the
//! ready set, and partitions it into parallel groups; the router never
//! calls into this module except to refuse mutations on invalid graphs.
//!
//! `ready_tasks`, `parallel_groups`, `critical_path` and
//! `topological_order` assume the graph passed [`validate`]. On a cyclic
//! graph `critical_path` and `topological_order` return
//! [`Error::CycleDetected`] rather than looping.

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::core::{is_gated, Checkpoint, GraphIndex, Task, TaskGraph, TaskId, TaskStatus};
use crate::error::{Error, Result};

/// An integrity violation found by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphError {
    /// A task stored under `key` carries a different `id`.
    IdMismatch { key: TaskId, id: TaskId },
    /// A task persisted with the scheduler-derived `ready` status.
    StoredReady { task: TaskId },
    /// Tasks forming a dependency cycle, first task repeated at the end.
    Cycle { path: Vec<TaskId> },
    /// `dependsOn` names a task that is not in the graph.
    DanglingDependency { task: TaskId, missing: TaskId },
    /// `consumes` names a producing task that is not in the graph.
    DanglingProducer { task: TaskId, producer: TaskId },
    /// `consumes` names an artifact the producer does not list.
    MissingArtifact {
        task: TaskId,
        producer: TaskId,
        artifact: String,
    },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::IdMismatch { key, id } => {
                write!(f, "task stored under {} has id {}", key, id)
            }
            GraphError::StoredReady { task } => {
                write!(f, "task {} is stored with derived status ready", task)
            }
            GraphError::Cycle { path } => {
                let ids: Vec<&str> = path.iter().map(|id| id.as_str()).collect();
                write!(f, "dependency cycle: {}", ids.join(" -> "))
            }
            GraphError::DanglingDependency { task, missing } => {
                write!(f, "task {} depends on unknown task {}", task, missing)
            }
            GraphError::DanglingProducer { task, producer } => {
                write!(f, "task {} consumes from unknown task {}", task, producer)
            }
            GraphError::MissingArtifact {
                task,
                producer,
                artifact,
            } => write!(
                f,
                "task {} consumes {:?} which task {} does not produce",
                task, artifact, producer
            ),
        }
    }
}

/// Result of [`validate`]. `valid` is true iff `errors` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphValidation {
    pub valid: bool,
    pub errors: Vec<GraphError>,
}

impl GraphValidation {
    pub fn has_cycle(&self) -> bool {
        self.errors.iter().any(|e| matches!(e, GraphError::Cycle { .. }))
    }

    /// Convert into an error suitable for refusing to schedule.
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::InvalidGraph(self.errors))
        }
    }
}

/// Longest duration-weighted chain from a root task to a sink task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalPath {
    pub path: Vec<TaskId>,
    pub total_minutes: u64,
}

/// Per-status task counts for a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphProgress {
    pub total: usize,
    pub pending: usize,
    /// Pending tasks whose dependencies are all completed (gate ignored).
    pub runnable: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl GraphProgress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    /// Nothing is running and nothing more can start.
    pub fn is_settled(&self) -> bool {
        self.in_progress == 0 && self.runnable == 0
    }
}

fn dependencies_completed(graph: &TaskGraph, task: &Task) -> bool {
    task.depends_on.iter().all(|dep| {
        graph
            .get_task(dep)
            .map(|t| t.status == TaskStatus::Completed)
            .unwrap_or(false)
    })
}

fn is_runnable(graph: &TaskGraph, task: &Task) -> bool {
    task.status == TaskStatus::Pending && dependencies_completed(graph, task)
}

/// Pending tasks whose dependencies are all completed.
///
/// Returns nothing while any checkpoint for the graph's product is
/// unresolved. The list is ordered by priority then id for stable output,
/// but callers must not rely on the order.
pub fn ready_tasks<'a>(graph: &'a TaskGraph, checkpoints: &[Checkpoint]) -> Vec<&'a Task> {
    if is_gated(&graph.product, checkpoints) {
        return Vec::new();
    }

    let mut ready: Vec<&Task> = graph
        .tasks()
        .filter(|t| is_runnable(graph, t))
        .collect();
    ready.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    trace!(product = %graph.product, ready = ready.len(), "computed ready set");
    ready
}

/// Partition ready tasks into groups that may start together.
///
/// Tasks are co-schedulable only when their `dependsOn` sets are identical.
/// Within a partition only `parallelOk` tasks are kept: two or more form one
/// group, a lone one becomes a singleton group. Tasks that are not
/// `parallelOk` never appear; see [`sequential_tasks`].
pub fn parallel_groups<'a>(ready: &[&'a Task]) -> Vec<Vec<&'a Task>> {
    let mut partitions: BTreeMap<&BTreeSet<TaskId>, Vec<&'a Task>> = BTreeMap::new();
    for task in ready.iter().copied().filter(|t| t.parallel_ok) {
        partitions.entry(&task.depends_on).or_default().push(task);
    }

    let mut groups = Vec::new();
    for (deps, members) in partitions {
        trace!(dependencies = deps.len(), members = members.len(), "parallel partition");
        if members.len() >= 2 {
            groups.push(members);
        } else {
            groups.extend(members.into_iter().map(|t| vec![t]));
        }
    }
    groups
}

/// Ready tasks that must be dispatched one at a time.
pub fn sequential_tasks<'a>(ready: &[&'a Task]) -> Vec<&'a Task> {
    ready.iter().copied().filter(|t| !t.parallel_ok).collect()
}

/// Check graph integrity, collecting every violation.
pub fn validate(graph: &TaskGraph) -> GraphValidation {
    let mut errors = Vec::new();

    let mut entries: Vec<(&TaskId, &Task)> = graph.entries().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (key, task) in entries {
        if &task.id != key {
            errors.push(GraphError::IdMismatch {
                key: key.clone(),
                id: task.id.clone(),
            });
        }
        if task.status == TaskStatus::Ready {
            errors.push(GraphError::StoredReady { task: key.clone() });
        }
    }

    for id in graph.sorted_ids() {
        let Some(task) = graph.get_task(id) else {
            continue;
        };
        for dep in &task.depends_on {
            if !graph.contains_task(dep) {
                errors.push(GraphError::DanglingDependency {
                    task: id.clone(),
                    missing: dep.clone(),
                });
            }
        }
        for consumed in &task.consumes {
            match graph.get_task(&consumed.required_from_task) {
                None => errors.push(GraphError::DanglingProducer {
                    task: id.clone(),
                    producer: consumed.required_from_task.clone(),
                }),
                Some(producer) if !producer.produces_artifact(&consumed.artifact) => {
                    errors.push(GraphError::MissingArtifact {
                        task: id.clone(),
                        producer: producer.id.clone(),
                        artifact: consumed.artifact.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    let index = graph.index();
    errors.extend(find_cycles(&index).into_iter().map(|path| GraphError::Cycle { path }));

    GraphValidation {
        valid: errors.is_empty(),
        errors,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search with an explicit stack. Every edge that reaches a
/// node still on the stack closes a cycle, reported as the stack segment
/// from that node to the top.
fn find_cycles(index: &GraphIndex<'_>) -> Vec<Vec<TaskId>> {
    let mut marks = vec![Mark::Unvisited; index.node_count()];
    let mut cycles = Vec::new();

    for root in index.nodes() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }
        marks[root.index()] = Mark::OnStack;
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
            vec![(root, index.dependents(root), 0)];

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            let node = frame.0;
            let next = frame.1.get(frame.2).copied();
            frame.2 += 1;

            let Some(child) = next else {
                marks[node.index()] = Mark::Done;
                stack.pop();
                continue;
            };

            match marks[child.index()] {
                Mark::Unvisited => {
                    marks[child.index()] = Mark::OnStack;
                    stack.push((child, index.dependents(child), 0));
                }
                Mark::OnStack => {
                    let start = stack
                        .iter()
                        .position(|(n, _, _)| *n == child)
                        .unwrap_or(0);
                    let mut path: Vec<TaskId> = stack[start..]
                        .iter()
                        .map(|(n, _, _)| index.task(*n).id.clone())
                        .collect();
                    path.push(index.task(child).id.clone());
                    cycles.push(path);
                }
                Mark::Done => {}
            }
        }
    }

    cycles
}

/// Tasks ordered so every task follows all of its dependencies.
pub fn topological_order(graph: &TaskGraph) -> Result<Vec<&Task>> {
    let index = graph.index();
    let sorted = sorted_nodes(&index)?;
    Ok(sorted.into_iter().map(|n| index.task(n)).collect())
}

fn sorted_nodes(index: &GraphIndex<'_>) -> Result<Vec<NodeIndex>> {
    toposort(index.graph(), None)
        .map_err(|cycle| Error::CycleDetected(vec![index.task(cycle.node_id()).id.clone()]))
}

/// Longest duration-weighted chain through the graph.
///
/// Computed as a longest-path pass over a topological order: each task's
/// best chain extends the best chain of its heaviest dependency. Ties keep
/// the first candidate in task-id order, both among dependencies and among
/// sinks.
pub fn critical_path(graph: &TaskGraph) -> Result<CriticalPath> {
    let index = graph.index();
    let order = sorted_nodes(&index)?;

    let n = index.node_count();
    let mut best = vec![0u64; n];
    let mut via: Vec<Option<NodeIndex>> = vec![None; n];

    for node in order {
        let mut longest = 0u64;
        let mut pred = None;
        for dep in index.dependencies(node) {
            if pred.is_none() || best[dep.index()] > longest {
                longest = best[dep.index()];
                pred = Some(dep);
            }
        }
        best[node.index()] = longest + index.task(node).estimated_duration_minutes;
        via[node.index()] = pred;
    }

    let mut end: Option<NodeIndex> = None;
    for node in index.nodes() {
        if !index.dependents(node).is_empty() {
            continue;
        }
        if end.map_or(true, |e| best[node.index()] > best[e.index()]) {
            end = Some(node);
        }
    }

    let Some(end) = end else {
        return Ok(CriticalPath::default());
    };

    let mut path = Vec::new();
    let mut cursor = Some(end);
    while let Some(node) = cursor {
        path.push(index.task(node).id.clone());
        cursor = via[node.index()];
    }
    path.reverse();

    Ok(CriticalPath {
        path,
        total_minutes: best[end.index()],
    })
}

/// Count tasks by status.
pub fn progress(graph: &TaskGraph) -> GraphProgress {
    let mut p = GraphProgress {
        total: graph.len(),
        ..Default::default()
    };
    for task in graph.tasks() {
        match task.status {
            TaskStatus::Pending | TaskStatus::Ready => {
                p.pending += 1;
                if is_runnable(graph, task) {
                    p.runnable += 1;
                }
            }
            TaskStatus::InProgress => p.in_progress += 1,
            TaskStatus::Completed => p.completed += 1,
            TaskStatus::Failed => p.failed += 1,
            TaskStatus::Blocked => p.blocked += 1,
        }
    }
    p
}
