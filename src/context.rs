//! Cancellation signal shared between the caller and the executor.
//!
//! A [`Context`] starts out live and can be cancelled exactly once, from any
//! thread. Every clone observes the same state. The executor's workers wait
//! on [`Context::done`] alongside their task channel, so cancelling wakes
//! idle workers immediately while callbacks that are already running are left
//! to finish on their own.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

/// Message type of the done channel. Nothing is ever sent; the channel only
/// ever gets disconnected.
pub enum Never {}

struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<Never>>>,
    done: Receiver<Never>,
}

/// Cloneable cancellation handle passed to [`Engine::execute`](crate::Engine::execute)
/// and through to every task callback.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new() -> Self {
        let (trigger, done) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                done,
            }),
        }
    }

    /// Cancels the context. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!("context cancelled");

        // Dropping the only sender disconnects every receiver of `done`.
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Channel that becomes ready (disconnected) once the context is
    /// cancelled. Meant to be used as a `crossbeam_channel::select!` arm.
    pub fn done(&self) -> &Receiver<Never> {
        &self.inner.done
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
