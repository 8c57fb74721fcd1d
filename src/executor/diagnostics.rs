use std::collections::HashMap;
use std::fmt::{Debug, Write};
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Engine;

/// What happened to a single task during one execution.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The callback ran and returned.
    Completed,
    /// The skip predicate returned `true`; the callback was not invoked.
    Skipped,
    /// The callback (or the skip predicate) panicked. The panic was caught and
    /// the task counted as completed for scheduling purposes.
    Panicked(Arc<anyhow::Error>),
}

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub layer: usize,
    pub start: Instant,
    pub duration: Duration,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone)]
pub struct LayerExecution {
    pub index: usize,
    pub start: Instant,
    pub duration: Duration,
    /// Tasks scheduled in the layer, whether or not they got to run.
    pub tasks: usize,
}

/// Execution report returned by [`Engine::execute`].
///
/// Tasks that never reached a worker (because the context was cancelled) have
/// no entry in [`Diagnostics::tasks`].
#[derive(Debug)]
pub struct Diagnostics<K> {
    pub tasks: HashMap<K, TaskExecution>,
    /// Layers that were started, in order.
    pub layers: Vec<LayerExecution>,
    /// Whether the context was cancelled by the time execution returned.
    pub cancelled: bool,
}

impl<K> Default for Diagnostics<K> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
            layers: Vec::new(),
            cancelled: false,
        }
    }
}

impl<K> Diagnostics<K>
where
    K: Eq + Hash,
{
    pub fn outcome(&self, key: &K) -> Option<&TaskOutcome> {
        self.tasks.get(key).map(|execution| &execution.outcome)
    }

    pub fn completed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TaskOutcome::Completed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, TaskOutcome::Skipped))
    }

    pub fn panicked(&self) -> usize {
        self.count(|outcome| matches!(outcome, TaskOutcome::Panicked(_)))
    }

    fn count(&self, f: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.tasks
            .values()
            .filter(|execution| f(&execution.outcome))
            .count()
    }

    /// Total wall time across all started layers.
    pub fn duration(&self) -> Duration {
        self.layers.iter().map(|layer| layer.duration).sum()
    }
}

impl<K> Diagnostics<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Renders the layered task graph as a Mermaid diagram, one subgraph per
    /// layer, color-coded by what happened to each task.
    ///
    /// * **Green**: Completed
    /// * **Grey**: Skipped
    /// * **Red**: Panicked
    /// * **Light blue**: Not run (cancelled)
    pub fn render_mermaid<V>(&self, engine: &Engine<K, V>) -> String {
        let graph = engine.read();
        let mut f = String::new();

        writeln!(f, "graph TD").unwrap();

        for (i, layer) in graph.layers().iter().enumerate() {
            writeln!(f, "    subgraph layer{i}[\"layer {i}\"]").unwrap();

            for &index in &layer.nodes {
                let task = &graph.node(index).task;
                let name = format!("{:?}", task.key()).replace('"', "#quot;");

                let (label, color) = match self.tasks.get(task.key()) {
                    Some(TaskExecution {
                        outcome: TaskOutcome::Completed,
                        duration,
                        ..
                    }) => (format!("{duration:.2?}"), "#90EE90"),
                    Some(TaskExecution {
                        outcome: TaskOutcome::Skipped,
                        ..
                    }) => ("Skipped".to_string(), "#D3D3D3"),
                    Some(TaskExecution {
                        outcome: TaskOutcome::Panicked(_),
                        ..
                    }) => ("Panicked".to_string(), "#FF6347"),
                    None => ("Not run".to_string(), "#ADD8E6"),
                };

                writeln!(f, "        {:?}[\"{}\\n{}\"]", index.index(), name, label).unwrap();
                writeln!(f, "        style {:?} fill:{}", index.index(), color).unwrap();
            }

            writeln!(f, "    end").unwrap();
        }

        for (source, target) in graph.edges() {
            writeln!(f, "    {:?} --> {:?}", source.index(), target.index()).unwrap();
        }

        f
    }
}
