use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, defaulting to
/// `info`.
///
/// Returns an error if a global subscriber is already set.
pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init()?;

    Ok(())
}
