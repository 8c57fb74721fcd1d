//! The public engine: build, introspect, execute.

use std::borrow::Cow;
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::thread;

use crate::context::Context;
use crate::error::BuildError;
use crate::executor::{Diagnostics, PlannedLayer, run_layers};
use crate::graph::TaskGraph;
use crate::task::Task;

/// Tunables for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Name recorded on the `execute` span, and the prefix of blocking worker
    /// thread names (`{name}-{layer}-{n}`).
    pub name: Cow<'static, str>,
    /// Stack size for blocking worker threads. `None` uses the std default.
    pub stack_size: Option<usize>,
    /// Drive a progress bar on the `execute` span. Only visible when the host
    /// installed a `tracing_indicatif::IndicatifLayer`.
    pub progress: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("strata"),
            stack_size: None,
            progress: true,
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub(crate) fn thread_builder(&self, layer: usize, worker: usize) -> thread::Builder {
        let builder = thread::Builder::new().name(format!("{}-{}-{}", self.name, layer, worker));
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

/// Layered dependency executor.
///
/// Tasks are added in batches with [`Engine::add`], which links them to the
/// tasks they depend on, rejects cycles, and assigns each task a layer: one
/// more than the deepest of its dependencies. [`Engine::execute`] then runs
/// the layers in order, never starting a layer before the previous one has
/// finished.
///
/// Within a layer, blocking tasks each get their own thread while
/// non-blocking tasks run one after another, in the order they were added, on
/// a single cooperative worker.
///
/// # Example
///
/// ```rust
/// use std::sync::Mutex;
/// use strata::{Context, Engine, Task};
///
/// let engine = Engine::new();
/// engine
///     .add([
///         Task::new("a", 1),
///         Task::new("b", 2).depends_on("a"),
///         Task::new("c", 3).depends_on("a"),
///     ])
///     .unwrap();
///
/// assert_eq!(engine.layer_count(), 2);
///
/// let seen = Mutex::new(Vec::new());
/// engine.execute(&Context::new(), |_, key, _| seen.lock().unwrap().push(*key));
/// assert_eq!(seen.into_inner().unwrap(), ["a", "b", "c"]);
/// ```
pub struct Engine<K, V> {
    graph: RwLock<TaskGraph<K, V>>,
    options: EngineOptions,
}

impl<K, V> Engine<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            graph: RwLock::new(TaskGraph::new()),
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Adds a batch of tasks.
    ///
    /// Dependencies may point at tasks from this batch or from earlier ones.
    /// Keys that are unknown when the batch is added are ignored.
    ///
    /// # Errors
    ///
    /// * [`BuildError::DuplicateKey`] if a key is already present or repeated
    ///   in the batch.
    /// * [`BuildError::CircularDependency`] if the batch would close a cycle,
    ///   including a task depending on itself.
    ///
    /// On error, none of the batch is added.
    pub fn add(&self, tasks: impl IntoIterator<Item = Task<K, V>>) -> Result<(), BuildError<K>> {
        self.graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(tasks)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, TaskGraph<K, V>> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of layers, `max_layer + 1`. Zero for an empty engine.
    pub fn layer_count(&self) -> usize {
        self.read().layers().len()
    }

    /// Number of tasks in layer `index`, or 0 if there is no such layer.
    pub fn nodes_in_layer(&self, index: usize) -> usize {
        self.read()
            .layers()
            .get(index)
            .map_or(0, |layer| layer.nodes.len())
    }

    /// Every key in the engine, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    /// Keys of the tasks `key` depends on and that are present in the engine,
    /// deduplicated. Empty for unknown keys.
    pub fn dependencies(&self, key: &K) -> Vec<K> {
        self.read().dependencies(key)
    }

    /// Layer the task was assigned to.
    pub fn layer_of(&self, key: &K) -> Option<usize> {
        let graph = self.read();
        graph.index_of(key).map(|index| graph.node(index).layer)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.read().index_of(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Multi-line listing of every layer and its tasks, with their
    /// dependencies and blocking flag.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.read().pretty_print(&mut out);
        out
    }

    /// Runs every task, layer by layer, invoking `callback` with each task's
    /// key and value.
    ///
    /// The callback runs at most once per task, never for tasks whose skip
    /// predicate returns `true`, and may run on any thread, concurrently with
    /// other invocations. A panic in the callback is caught, logged and
    /// recorded in the returned [`Diagnostics`]; tasks in later layers still
    /// run.
    ///
    /// When `ctx` is cancelled, idle workers exit, queued tasks are dropped
    /// and no further layers start. Callbacks already running are waited for.
    pub fn execute<F>(&self, ctx: &Context, callback: F) -> Diagnostics<K>
    where
        K: Send + Sync,
        V: Send + Sync,
        F: Fn(&Context, &K, &V) + Send + Sync,
    {
        let plan = self.plan();
        run_layers(&plan, &self.options, ctx, &callback)
    }

    /// Snapshots the layers so the lock is not held while callbacks run.
    fn plan(&self) -> Vec<PlannedLayer<K, V>> {
        let graph = self.read();

        graph
            .layers()
            .iter()
            .map(|layer| PlannedLayer {
                tasks: layer
                    .nodes
                    .iter()
                    .map(|&index| graph.node(index).task.clone())
                    .collect(),
                blocking: layer.blocking,
                nonblocking: layer.nonblocking,
            })
            .collect()
    }
}

impl<K, V> Default for Engine<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Display for Engine<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read().pretty_print(f)
    }
}

impl<K, V> Debug for Engine<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("tasks", &self.len())
            .field("layers", &self.layer_count())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::TaskOutcome;

    fn quiet() -> EngineOptions {
        EngineOptions::new().with_progress(false)
    }

    #[test]
    fn test_empty_engine() {
        let engine: Engine<&str, ()> = Engine::new();

        assert_eq!(engine.layer_count(), 0);
        assert_eq!(engine.nodes_in_layer(0), 0);
        assert!(engine.keys().is_empty());
        assert!(engine.is_empty());
        assert_eq!(engine.pretty_print(), "(no tasks)\n");

        let diagnostics = engine.execute(&Context::new(), |_, _, _| unreachable!());
        assert!(diagnostics.tasks.is_empty());
        assert!(diagnostics.layers.is_empty());
    }

    #[test]
    fn test_introspection_does_not_mutate() {
        let engine = Engine::new();
        engine
            .add([
                Task::new("a", ()),
                Task::new("b", ()).depends_on("a"),
                Task::new("c", ()).depends_on_all(["a", "b"]),
            ])
            .unwrap();

        let before = engine.pretty_print();
        for _ in 0..3 {
            assert_eq!(engine.layer_count(), 3);
            assert_eq!(engine.nodes_in_layer(1), 1);
            assert_eq!(engine.dependencies(&"c"), vec!["a", "b"]);
            assert!(engine.dependencies(&"nope").is_empty());
            assert_eq!(engine.keys().len(), 3);
        }
        assert_eq!(engine.pretty_print(), before);
        assert_eq!(engine.to_string(), before);
    }

    #[test]
    fn test_batches_link_across_calls() {
        let engine = Engine::new();
        engine.add([Task::new("a", ())]).unwrap();
        engine.add([Task::new("b", ()).depends_on("a")]).unwrap();
        engine.add([Task::new("c", ()).depends_on("b")]).unwrap();

        assert_eq!(engine.layer_of(&"c"), Some(2));
        assert_eq!(engine.layer_count(), 3);
    }

    #[test]
    fn test_duplicate_key_across_batches() {
        let engine = Engine::new();
        engine.add([Task::new("a", 1)]).unwrap();

        let err = engine.add([Task::new("a", 2)]).unwrap_err();
        assert_eq!(err, BuildError::DuplicateKey("a"));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.nodes_in_layer(0), 1);
    }

    #[test]
    fn test_execute_twice() {
        let engine = Engine::with_options(quiet());
        engine
            .add([Task::new("a", ()), Task::new("b", ()).depends_on("a")])
            .unwrap();

        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let diagnostics = engine.execute(&Context::new(), |_, _, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(diagnostics.completed(), 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_blocking_tasks_run_concurrently() {
        let engine = Engine::with_options(quiet());
        engine
            .add((0..4).map(|i| Task::new(i, ()).blocking(true)))
            .unwrap();

        let current = AtomicUsize::new(0);
        let max = AtomicUsize::new(0);

        engine.execute(&Context::new(), |_, _, _| {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            current.fetch_sub(1, Ordering::SeqCst);
        });

        assert_eq!(max.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_blocking_workers_are_named() {
        let engine = Engine::with_options(quiet().with_name("io"));
        engine.add([Task::new("a", ()).blocking(true)]).unwrap();

        let name = Mutex::new(None);
        engine.execute(&Context::new(), |_, _, _| {
            *name.lock().unwrap() = thread::current().name().map(String::from);
        });

        assert_eq!(name.into_inner().unwrap().as_deref(), Some("io-0-0"));
    }

    #[test]
    fn test_nonblocking_tasks_run_sequentially_in_order() {
        let engine = Engine::with_options(quiet());
        engine
            .add((0..16).map(|i| Task::new(i, ())))
            .unwrap();

        let current = AtomicUsize::new(0);
        let seen = Mutex::new(Vec::new());

        engine.execute(&Context::new(), |_, key, _| {
            assert_eq!(current.fetch_add(1, Ordering::SeqCst), 0);
            seen.lock().unwrap().push(*key);
            current.fetch_sub(1, Ordering::SeqCst);
        });

        assert_eq!(seen.into_inner().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_callback_panic_is_recovered() {
        let engine = Engine::with_options(quiet());
        engine
            .add([
                Task::new("a", ()),
                Task::new("b", ()),
                Task::new("c", ()).depends_on("a"),
            ])
            .unwrap();

        let ran = Mutex::new(Vec::new());
        let diagnostics = engine.execute(&Context::new(), |_, key, _| {
            if *key == "a" {
                panic!("a failed");
            }
            ran.lock().unwrap().push(*key);
        });

        assert_eq!(ran.into_inner().unwrap(), ["b", "c"]);
        assert_eq!(diagnostics.panicked(), 1);
        match diagnostics.outcome(&"a") {
            Some(TaskOutcome::Panicked(err)) => {
                assert_eq!(err.to_string(), "Task panicked: a failed")
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_skip_predicate_panic_is_recovered() {
        let engine = Engine::with_options(quiet());
        engine
            .add([
                Task::new("a", ()).skip_if(|| panic!("bad predicate")),
                Task::new("b", ()).depends_on("a"),
            ])
            .unwrap();

        let ran = Mutex::new(Vec::new());
        let diagnostics = engine.execute(&Context::new(), |_, key, _| {
            ran.lock().unwrap().push(*key);
        });

        assert_eq!(ran.into_inner().unwrap(), ["b"]);
        assert!(matches!(
            diagnostics.outcome(&"a"),
            Some(TaskOutcome::Panicked(_))
        ));
    }

    #[test]
    fn test_diagnostics_layers() {
        let engine = Engine::with_options(quiet());
        engine
            .add([
                Task::new("a", ()),
                Task::new("b", ()).depends_on("a").blocking(true),
                Task::new("c", ()).depends_on("a"),
            ])
            .unwrap();

        let diagnostics = engine.execute(&Context::new(), |_, _, _| {});

        assert!(!diagnostics.cancelled);
        assert_eq!(diagnostics.layers.len(), 2);
        assert_eq!(diagnostics.layers[1].index, 1);
        assert_eq!(diagnostics.layers[1].tasks, 2);
        assert_eq!(diagnostics.tasks[&"b"].layer, 1);
        assert!(diagnostics.layers[0].start <= diagnostics.layers[1].start);
    }
}
