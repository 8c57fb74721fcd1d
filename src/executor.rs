mod diagnostics;

use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::context::Context;
use crate::engine::EngineOptions;
use crate::task::Task;

pub use diagnostics::{Diagnostics, LayerExecution, TaskExecution, TaskOutcome};

/// Snapshot of one layer, detached from the engine's lock.
pub(crate) struct PlannedLayer<K, V> {
    /// Insertion order.
    pub tasks: Vec<Arc<Task<K, V>>>,
    pub blocking: usize,
    pub nonblocking: usize,
}

type Completion<K> = (K, TaskExecution);

/// Runs the planned layers in order with a full barrier between them.
///
/// For every layer:
/// 1. Two bounded channels are created, sized to the number of blocking and
///    non-blocking tasks so that feeding them never blocks.
/// 2. Every blocking task gets a dedicated scoped OS thread that drains the
///    blocking channel.
/// 3. A single cooperative worker on the rayon pool drains the non-blocking
///    channel sequentially.
/// 4. The feeder routes tasks to their channel in insertion order and then
///    closes both channels.
/// 5. Both scopes are joined before the next layer starts.
///
/// Workers stop picking up new tasks as soon as the context is cancelled, and
/// no further layers are started.
pub(crate) fn run_layers<K, V, F>(
    plan: &[PlannedLayer<K, V>],
    options: &EngineOptions,
    ctx: &Context,
    callback: &F,
) -> Diagnostics<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Send + Sync,
    F: Fn(&Context, &K, &V) + Send + Sync,
{
    let mut diagnostics = Diagnostics::default();

    let total_tasks: usize = plan.iter().map(|layer| layer.tasks.len()).sum();
    if total_tasks == 0 {
        diagnostics.cancelled = ctx.is_cancelled();
        return diagnostics;
    }

    let root_span = tracing::span!(Level::INFO, "execute", name = %options.name);
    if options.progress {
        root_span.pb_set_length(total_tasks as u64);
        if let Some(style) = crate::utils::get_style_execute() {
            root_span.pb_set_style(&style);
        }
        root_span.pb_set_message("Running tasks...");
    }
    let _enter = root_span.enter();

    let (result_sender, result_receiver) = unbounded::<Completion<K>>();

    for (index, layer) in plan.iter().enumerate() {
        if ctx.is_cancelled() {
            tracing::info!("cancelled before layer {}, stopping", index);
            break;
        }

        if layer.tasks.is_empty() {
            continue;
        }

        let start = Instant::now();
        run_layer(index, layer, options, ctx, callback, &result_sender);

        let mut finished = 0;
        for (key, execution) in result_receiver.try_iter() {
            diagnostics.tasks.insert(key, execution);
            finished += 1;
        }

        if options.progress {
            root_span.pb_inc(finished);
        }

        diagnostics.layers.push(LayerExecution {
            index,
            start,
            duration: start.elapsed(),
            tasks: layer.tasks.len(),
        });
    }

    diagnostics.cancelled = ctx.is_cancelled();

    tracing::info!(
        "execution finished: {} completed, {} skipped, {} panicked{}",
        diagnostics.completed(),
        diagnostics.skipped(),
        diagnostics.panicked(),
        if diagnostics.cancelled { " (cancelled)" } else { "" }
    );

    diagnostics
}

fn run_layer<K, V, F>(
    index: usize,
    layer: &PlannedLayer<K, V>,
    options: &EngineOptions,
    ctx: &Context,
    callback: &F,
    results: &Sender<Completion<K>>,
) where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Send + Sync,
    F: Fn(&Context, &K, &V) + Send + Sync,
{
    let span = tracing::span!(
        Level::INFO,
        "layer",
        index,
        blocking = layer.blocking,
        nonblocking = layer.nonblocking
    );
    let _enter = span.enter();

    let (blocking_sender, blocking_receiver) = bounded(layer.blocking);
    let (nonblocking_sender, nonblocking_receiver) = bounded(layer.nonblocking);

    let worker = |receiver: &Receiver<Arc<Task<K, V>>>| {
        drain(index, receiver, ctx, callback, results, &span);
    };

    thread::scope(|threads| {
        // Blocking workers that could not get a thread of their own fall back
        // to the rayon pool.
        let mut fallback = 0;

        for n in 0..layer.blocking {
            let spawned = options
                .thread_builder(index, n)
                .spawn_scoped(threads, || worker(&blocking_receiver));

            if let Err(err) = spawned {
                tracing::error!("failed to spawn blocking worker: {}", err);
                fallback += 1;
            }
        }

        rayon::scope(|s| {
            if layer.nonblocking > 0 {
                s.spawn(|_| worker(&nonblocking_receiver));
            }

            for _ in 0..fallback {
                s.spawn(|_| worker(&blocking_receiver));
            }

            // The channels are sized to hold the whole layer, so the feeder
            // runs to completion here without waiting on any worker, even on
            // a single-threaded pool.
            feed(&layer.tasks, blocking_sender, nonblocking_sender);
        });
    });
}

/// Routes tasks to their channel in insertion order. Dropping the senders on
/// return closes both channels.
fn feed<K, V>(
    tasks: &[Arc<Task<K, V>>],
    blocking: Sender<Arc<Task<K, V>>>,
    nonblocking: Sender<Arc<Task<K, V>>>,
) {
    for task in tasks {
        let sender = if task.is_blocking() {
            &blocking
        } else {
            &nonblocking
        };
        // Capacity equals the task count and the receivers outlive the feeder.
        sender
            .try_send(task.clone())
            .expect("layer channel smaller than its task count");
    }
}

/// Worker loop shared by blocking and cooperative workers.
fn drain<K, V, F>(
    layer: usize,
    receiver: &Receiver<Arc<Task<K, V>>>,
    ctx: &Context,
    callback: &F,
    results: &Sender<Completion<K>>,
    parent: &Span,
) where
    K: Clone + Debug,
    F: Fn(&Context, &K, &V),
{
    loop {
        if ctx.is_cancelled() {
            return;
        }

        let task = select! {
            recv(receiver) -> msg => match msg {
                Ok(task) => task,
                Err(_) => return,
            },
            recv(ctx.done()) -> _ => return,
        };

        // Both arms may have been ready at once.
        if ctx.is_cancelled() {
            return;
        }

        let execution = run_task(layer, &task, ctx, callback, parent);
        let _ = results.send((task.key().clone(), execution));
    }
}

fn run_task<K, V, F>(
    layer: usize,
    task: &Task<K, V>,
    ctx: &Context,
    callback: &F,
    parent: &Span,
) -> TaskExecution
where
    K: Debug,
    F: Fn(&Context, &K, &V),
{
    let span = tracing::span!(parent: parent, Level::DEBUG, "task", key = ?task.key());
    let _enter = span.enter();

    let start = Instant::now();

    // AssertUnwindSafe: the task and context are only read here, and a panic
    // is reported as the task's outcome rather than resumed.
    let outcome = match catch_unwind(AssertUnwindSafe(|| {
        if task.should_skip() {
            return TaskOutcome::Skipped;
        }
        callback(ctx, task.key(), task.value());
        TaskOutcome::Completed
    })) {
        Ok(outcome) => outcome,
        Err(panic) => {
            let err = crate::utils::panic_to_error(panic);
            tracing::error!("Task {:?} in layer {}: {}", task.key(), layer, err);
            TaskOutcome::Panicked(Arc::new(err))
        }
    };

    if matches!(outcome, TaskOutcome::Skipped) {
        tracing::debug!("skipped");
    }

    TaskExecution {
        layer,
        start,
        duration: start.elapsed(),
        outcome,
    }
}
