//! Product task graph.
//!
//! A [`TaskGraph`] owns every task planned for one product together with
//! graph-level metadata. It is the unit of persistence and of write
//! serialization: the router is its only writer, so lifecycle mutations are
//! crate-private and reached through [`crate::orchestration::Router`].
//!
//! Graph algorithms run over a [`GraphIndex`], a petgraph arena built from a
//! snapshot of the task map with task ids mapped to node indices.

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::task::{Task, TaskId, Transition};
use crate::error::{Error, Result};
use crate::message::{Artifact, ErrorDetails, Metrics};

/// The task dependency graph for a single product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGraph {
    /// Product identifier; also the persistence and lock key.
    pub product: String,
    /// Incremented on every persisted mutation.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    tasks: HashMap<TaskId, Task>,
}

impl TaskGraph {
    /// Create an empty graph for a product.
    pub fn new(product: &str) -> Self {
        let now = Utc::now();
        Self {
            product: product.to_string(),
            version: 0,
            created_at: now,
            updated_at: now,
            tasks: HashMap::new(),
        }
    }

    /// Build a graph from authored tasks. Later duplicates replace earlier ones.
    pub fn from_tasks(product: &str, tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut graph = Self::new(product);
        for task in tasks {
            graph.insert_task(task);
        }
        graph
    }

    /// Deserialize a persisted graph.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add a task while authoring the graph.
    pub fn insert_task(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.insert_task(task);
        self
    }

    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Iterate tasks in unspecified order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Map entries as stored, keyed by the id the graph was authored under.
    pub fn entries(&self) -> impl Iterator<Item = (&TaskId, &Task)> {
        self.tasks.iter()
    }

    /// Task ids sorted lexicographically, for deterministic traversal.
    pub fn sorted_ids(&self) -> Vec<&TaskId> {
        let mut ids: Vec<&TaskId> = self.tasks.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks that list `id` in their `dependsOn` set.
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.depends_on.contains(id))
            .collect()
    }

    /// Build the index arena used by graph algorithms.
    pub fn index(&self) -> GraphIndex<'_> {
        GraphIndex::build(self)
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        let product = self.product.clone();
        self.tasks.get_mut(id).ok_or_else(|| Error::TaskNotFound {
            product,
            task_id: id.clone(),
        })
    }

    fn touch(&mut self, transition: Transition) -> Transition {
        if transition == Transition::Applied {
            self.version += 1;
            self.updated_at = Utc::now();
        }
        transition
    }

    pub(crate) fn begin_task(&mut self, id: &TaskId) -> Result<Transition> {
        let transition = self.task_mut(id)?.begin();
        Ok(self.touch(transition))
    }

    pub(crate) fn unbegin_task(&mut self, id: &TaskId) -> Result<Transition> {
        let transition = self.task_mut(id)?.unbegin();
        Ok(self.touch(transition))
    }

    pub(crate) fn complete_task(
        &mut self,
        id: &TaskId,
        artifacts: Vec<Artifact>,
        metrics: Option<Metrics>,
    ) -> Result<Transition> {
        let transition = self.task_mut(id)?.complete(artifacts, metrics);
        Ok(self.touch(transition))
    }

    pub(crate) fn fail_task(
        &mut self,
        id: &TaskId,
        error: Option<ErrorDetails>,
        metrics: Option<Metrics>,
    ) -> Result<Transition> {
        let transition = self.task_mut(id)?.fail(error, metrics);
        Ok(self.touch(transition))
    }

    pub(crate) fn requeue_task(&mut self, id: &TaskId) -> Result<Transition> {
        let transition = self.task_mut(id)?.requeue();
        Ok(self.touch(transition))
    }
}

/// Arena view of a [`TaskGraph`]: one node per task, one edge per
/// resolvable dependency, pointing from the dependency to the dependent.
///
/// Dangling `dependsOn` entries have no node to attach to and are left out;
/// `validate` reports them separately.
pub struct GraphIndex<'a> {
    graph: DiGraph<&'a Task, ()>,
    nodes: HashMap<&'a TaskId, NodeIndex>,
}

impl<'a> GraphIndex<'a> {
    fn build(source: &'a TaskGraph) -> Self {
        let mut graph = DiGraph::with_capacity(source.len(), source.len());
        let mut nodes = HashMap::with_capacity(source.len());

        // Insert in id order so node indices, and every traversal over
        // them, are stable across runs.
        for id in source.sorted_ids() {
            let task = &source.tasks[id];
            nodes.insert(id, graph.add_node(task));
        }

        for id in source.sorted_ids() {
            let to = nodes[id];
            for dep in &source.tasks[id].depends_on {
                if let Some(&from) = nodes.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self { graph, nodes }
    }

    pub fn node(&self, id: &TaskId) -> Option<NodeIndex> {
        self.nodes.get(id).copied()
    }

    pub fn task(&self, node: NodeIndex) -> &'a Task {
        self.graph[node]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Node indices in ascending (task id) order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Dependencies of a node, in ascending node order.
    pub fn dependencies(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(node, Direction::Incoming)
    }

    /// Dependents of a node, in ascending node order.
    pub fn dependents(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(node, Direction::Outgoing)
    }

    fn sorted_neighbors(&self, node: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(node, dir).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn graph(&self) -> &DiGraph<&'a Task, ()> {
        &self.graph
    }
}
