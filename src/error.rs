use std::fmt::Debug;

use thiserror::Error;

/// Errors raised while adding tasks to an [`Engine`](crate::Engine).
///
/// A failed [`Engine::add`](crate::Engine::add) leaves the engine exactly as
/// it was before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError<K: Debug> {
    /// The batch would close a directed cycle. Carries the dependency key at
    /// which the cycle was detected.
    #[error("Circular dependency detected at key {0:?}")]
    CircularDependency(K),

    /// The key is already present in the engine, or appears twice in the
    /// batch.
    #[error("Duplicate task key {0:?}")]
    DuplicateKey(K),
}

impl<K: Debug> BuildError<K> {
    /// The key the error refers to.
    pub fn key(&self) -> &K {
        match self {
            BuildError::CircularDependency(key) => key,
            BuildError::DuplicateKey(key) => key,
        }
    }
}
