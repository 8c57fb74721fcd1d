//! Task descriptors.
//!
//! A [`Task`] is the unit of work handed to the [`Engine`](crate::Engine). It
//! carries a key, an opaque payload, the keys it depends on, and two
//! scheduling hints:
//!
//! * **blocking** — the task may wait on I/O or some other slow resource, so
//!   the executor gives it a dedicated worker thread.
//! * **skip** — a predicate checked right before the callback would run. When
//!   it returns `true` the callback is not invoked, but the task still counts
//!   as completed for the tasks downstream of it.
//!
//! ```rust
//! use strata::Task;
//!
//! let fetch = Task::new("fetch", "https://example.org").blocking(true);
//! let parse = Task::new("parse", "html").depends_on("fetch");
//!
//! assert!(fetch.is_blocking());
//! assert_eq!(parse.dependencies(), ["fetch"]);
//! ```

use std::fmt::{self, Debug};
use std::sync::Arc;

/// Predicate deciding whether a task should be skipped at execution time.
pub type SkipFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// A unit of work with declared dependencies.
#[derive(Clone)]
pub struct Task<K, V> {
    key: K,
    value: V,
    depends_on: Vec<K>,
    blocking: bool,
    skip: Option<SkipFn>,
}

impl<K, V> Task<K, V> {
    /// Creates a non-blocking task with no dependencies.
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            depends_on: Vec::new(),
            blocking: false,
            skip: None,
        }
    }

    /// Adds a dependency on the task identified by `key`.
    ///
    /// Keys that are not known to the engine when the task is added are
    /// ignored; the task does not wait for them.
    pub fn depends_on(mut self, key: impl Into<K>) -> Self {
        self.depends_on.push(key.into());
        self
    }

    /// Adds multiple dependencies at once.
    pub fn depends_on_all(mut self, keys: impl IntoIterator<Item = impl Into<K>>) -> Self {
        self.depends_on.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Marks the task as blocking (I/O bound), giving it its own worker.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Sets a predicate evaluated on the worker thread right before the
    /// callback. Returning `true` suppresses the callback.
    pub fn skip_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// Dependency keys exactly as declared, including unknown ones.
    pub fn dependencies(&self) -> &[K] {
        &self.depends_on
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Evaluates the skip predicate. Tasks without one are never skipped.
    pub fn should_skip(&self) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip())
    }
}

impl<K, V> Debug for Task<K, V>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("depends_on", &self.depends_on)
            .field("blocking", &self.blocking)
            .field("skip", &self.skip.is_some())
            .finish()
    }
}
