use std::thread;
use std::time::Duration;

use strata::{Context, Engine, EngineOptions, Task};

/// A small release pipeline.
///
/// Topology:
///        [fetch-deps]   [lint]
///          /      \       |
///   [build-lib] [build-bin]
///          \      /
///          [test]
///            |
///        [publish]  (skipped unless PUBLISH is set)
///
/// `fetch-deps`, `test` and `publish` are I/O bound and get their own worker
/// threads; everything else shares the cooperative worker of its layer.
///
/// Run with `cargo run --example layers --features logging`.
fn main() -> anyhow::Result<()> {
    strata::init_logging()?;

    let engine = Engine::with_options(EngineOptions::new().with_name("release"));

    engine.add([
        Task::new("fetch-deps", 300).blocking(true),
        Task::new("lint", 50),
        Task::new("build-lib", 120).depends_on("fetch-deps"),
        Task::new("build-bin", 80).depends_on_all(["fetch-deps", "build-lib"]),
        Task::new("test", 200)
            .depends_on_all(["build-lib", "build-bin", "lint"])
            .blocking(true),
        Task::new("publish", 100)
            .depends_on("test")
            .blocking(true)
            .skip_if(|| std::env::var_os("PUBLISH").is_none()),
    ])?;

    print!("{engine}");

    let ctx = Context::new();
    let diagnostics = engine.execute(&ctx, |_, key, millis| {
        tracing::info!("{key} started");
        thread::sleep(Duration::from_millis(*millis));
        tracing::info!("{key} done");
    });

    println!(
        "{} completed, {} skipped in {:.2?}",
        diagnostics.completed(),
        diagnostics.skipped(),
        diagnostics.duration()
    );
    println!("{}", diagnostics.render_mermaid(&engine));

    Ok(())
}
