//! framepipe demo host
//!
//! Runs a pipeline described by a TOML file and polls its newest output at a
//! fixed cadence, the way a display would.
//!
//! ```text
//! framepipe [CONFIG]
//! ```
//!
//! Without an argument the config is read from the platform config
//! directory, falling back to defaults.

use anyhow::Context;
use framepipe::{
    config::LoggingConfig, Pipeline, PipelineConfig, SourceRegistry, TransformRegistry,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the subscriber; the guard must live until exit to flush the file
fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "framepipe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

fn main() -> anyhow::Result<()> {
    let path: Option<PathBuf> = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match &path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default_path()
            .map(|p| PipelineConfig::load_or_default(p))
            .unwrap_or_default(),
    };

    let _guard = init_logging(&config.logging)?;
    tracing::info!("Starting framepipe");
    match &path {
        Some(path) => tracing::info!("Config: {}", path.display()),
        None => tracing::info!("Config: default location or built-in defaults"),
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || running_clone.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    let mut pipeline = Pipeline::from_config(
        &config,
        &SourceRegistry::with_builtins(),
        &TransformRegistry::with_builtins(),
    )?;
    pipeline.start()?;

    let poll = Duration::from_millis(config.consumer.poll_interval_ms.max(1));
    let deadline = config
        .consumer
        .run_for_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_report = Instant::now();
    let mut last_seq = None;
    let mut displayed = 0u64;

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("Run duration elapsed");
            break;
        }

        if let Some(frame) = pipeline.latest_output() {
            if last_seq != Some(frame.seq()) {
                last_seq = Some(frame.seq());
                displayed += 1;
                tracing::trace!("Frame #{} {}", frame.seq(), frame.shape());
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            tracing::info!("{} | displayed {}", pipeline.stats(), displayed);
            last_report = Instant::now();
        }

        std::thread::sleep(poll);
    }

    tracing::info!("Shutting down...");
    pipeline.stop();
    tracing::info!("Final: {}", pipeline.stats());
    Ok(())
}
