//! Dependency graph and layer index.
//!
//! Nodes live in a [`petgraph::Graph`] arena and refer to each other only by
//! [`NodeIndex`]. Edges point from a dependency (parent) to the task that
//! depends on it (child), so the parents of a node are its incoming
//! neighbours.
//!
//! Each node is assigned a layer equal to `1 + max(parent.layer)`, or `0` when
//! it has no parents. Layers are what the executor schedules: every node of
//! layer `i` completes before any node of layer `i + 1` starts.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug, Write};
use std::hash::Hash;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::NodeIndex;

use crate::error::BuildError;
use crate::task::Task;

pub(crate) struct Node<K, V> {
    pub task: Arc<Task<K, V>>,
    pub layer: usize,
}

impl<K, V> Node<K, V> {
    fn new(task: Task<K, V>) -> Self {
        Self {
            task: Arc::new(task),
            layer: 0,
        }
    }
}

/// All nodes sharing one layer index.
#[derive(Debug, Default, Clone)]
pub(crate) struct Layer {
    /// Insertion order.
    pub nodes: Vec<NodeIndex>,
    pub blocking: usize,
    pub nonblocking: usize,
}

pub(crate) struct TaskGraph<K, V> {
    graph: petgraph::Graph<Node<K, V>, ()>,
    by_key: HashMap<K, NodeIndex>,
    layers: Vec<Layer>,
}

impl<K, V> TaskGraph<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self {
            graph: petgraph::Graph::new(),
            by_key: HashMap::new(),
            layers: Vec::new(),
        }
    }

    /// Adds a batch of tasks. On error the graph is restored to the state it
    /// had before the call.
    pub fn add(
        &mut self,
        tasks: impl IntoIterator<Item = Task<K, V>>,
    ) -> Result<(), BuildError<K>> {
        let mut added = Vec::new();

        for task in tasks {
            if self.by_key.contains_key(task.key()) {
                let key = task.key().clone();
                self.rollback(&added);
                return Err(BuildError::DuplicateKey(key));
            }

            let key = task.key().clone();
            let index = self.graph.add_node(Node::new(task));
            self.by_key.insert(key, index);
            added.push(index);
        }

        if let Err(err) = self.link(&added).and_then(|()| self.assign_layers(&added)) {
            tracing::debug!("rolling back batch of {} tasks: {}", added.len(), err);
            self.rollback(&added);
            return Err(err);
        }

        for &index in &added {
            let node = &self.graph[index];
            let layer = node.layer;
            let blocking = node.task.is_blocking();

            if self.layers.len() <= layer {
                self.layers.resize_with(layer + 1, Layer::default);
            }

            let entry = &mut self.layers[layer];
            if blocking {
                entry.blocking += 1;
            } else {
                entry.nonblocking += 1;
            }
            entry.nodes.push(index);
        }

        tracing::debug!(
            "added {} tasks, graph now has {} layers",
            added.len(),
            self.layers.len()
        );

        Ok(())
    }

    /// Adds an edge from every known dependency to each new node. Unknown
    /// keys are ignored and a dependency declared twice is linked once.
    fn link(&mut self, added: &[NodeIndex]) -> Result<(), BuildError<K>> {
        for &index in added {
            let task = self.graph[index].task.clone();
            let mut linked = HashSet::new();

            for dependency in task.dependencies() {
                let Some(&parent) = self.by_key.get(dependency) else {
                    tracing::debug!(
                        "{:?} depends on unknown key {:?}, ignoring",
                        task.key(),
                        dependency
                    );
                    continue;
                };

                if parent == index {
                    return Err(BuildError::CircularDependency(dependency.clone()));
                }

                if linked.insert(parent) {
                    self.graph.add_edge(parent, index, ());
                }
            }
        }

        Ok(())
    }

    /// Rejects cycles and sets `layer = 1 + max(parent.layer)` on the new
    /// nodes. Older nodes never gain parents, so their layers stay final.
    fn assign_layers(&mut self, added: &[NodeIndex]) -> Result<(), BuildError<K>> {
        let Some(&first) = added.first() else {
            return Ok(());
        };

        let order = petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            BuildError::CircularDependency(self.graph[cycle.node_id()].task.key().clone())
        })?;

        // New nodes were appended last, so their indices start at `first`.
        for index in order.into_iter().filter(|&index| index >= first) {
            let layer = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .map(|parent| self.graph[parent].layer + 1)
                .max()
                .unwrap_or(0);
            self.graph[index].layer = layer;
        }

        Ok(())
    }

    /// Removes the nodes of a failed batch. They were appended last, so
    /// removing them newest first never moves an older node's index.
    fn rollback(&mut self, added: &[NodeIndex]) {
        for &index in added.iter().rev() {
            if let Some(node) = self.graph.remove_node(index) {
                self.by_key.remove(node.task.key());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn node(&self, index: NodeIndex) -> &Node<K, V> {
        &self.graph[index]
    }

    pub fn index_of(&self, key: &K) -> Option<NodeIndex> {
        self.by_key.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.by_key.keys()
    }

    /// Parents of `index` in the order their dependencies were declared.
    pub fn parents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut parents: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();
        // petgraph yields the most recently added edge first
        parents.reverse();
        parents
    }

    /// Keys of the parents of `key`, deduplicated. Empty for unknown keys.
    pub fn dependencies(&self, key: &K) -> Vec<K> {
        let Some(index) = self.index_of(key) else {
            return Vec::new();
        };

        self.parents(index)
            .into_iter()
            .map(|parent| self.graph[parent].task.key().clone())
            .collect()
    }

    /// Directed edges as `(parent, child)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (edge.source(), edge.target()))
    }

    /// Human readable dump of every layer.
    pub fn pretty_print(&self, f: &mut impl Write) -> fmt::Result {
        if self.layers.is_empty() {
            return writeln!(f, "(no tasks)");
        }

        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(
                f,
                "layer {} ({} blocking, {} non-blocking)",
                i, layer.blocking, layer.nonblocking
            )?;

            for &index in &layer.nodes {
                let task = &self.graph[index].task;
                write!(f, "  {:?}", task.key())?;

                let parents = self.parents(index);
                if !parents.is_empty() {
                    write!(f, " <-")?;
                    for (n, parent) in parents.into_iter().enumerate() {
                        let sep = if n == 0 { " " } else { ", " };
                        write!(f, "{}{:?}", sep, self.graph[parent].task.key())?;
                    }
                }

                if task.is_blocking() {
                    write!(f, " [blocking]")?;
                }
                writeln!(f)?;
            }
        }

        Ok(())
    }
}
