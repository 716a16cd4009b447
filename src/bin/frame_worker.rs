//! Isolated processing worker
//!
//! Spawned by the host with piped stdin/stdout. Stdout carries the wire
//! protocol, so all logging goes to stderr.

use framepipe::isolated::run_worker;
use framepipe::TransformRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,framepipe=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();

    tracing::info!("frame-worker starting (PID {})", std::process::id());
    let registry = TransformRegistry::with_builtins();
    run_worker(std::io::stdin().lock(), std::io::stdout().lock(), &registry)?;
    Ok(())
}
