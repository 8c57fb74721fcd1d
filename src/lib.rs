#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod context;
mod engine;
mod error;
mod executor;
mod graph;
#[cfg(feature = "logging")]
mod logging;
mod task;
mod utils;

pub use crate::context::{Context, Never};
pub use crate::engine::{Engine, EngineOptions};
pub use crate::error::BuildError;
pub use crate::executor::{Diagnostics, LayerExecution, TaskExecution, TaskOutcome};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::task::{SkipFn, Task};
