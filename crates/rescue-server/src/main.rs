//! Entry point: logging setup, configuration, signal handling and the
//! top-level supervisor (C9) that owns the shutdown broadcast channel.

use std::sync::Arc;

use anyhow::Context;
use rescue_server::{config::config_from_env, Server};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("RESCUE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if use_json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = config_from_env();
    if config.max_drones == 0 {
        anyhow::bail!("RESCUE_MAX_DRONES must be at least 1");
    }
    if config.map_width <= 0 || config.map_height <= 0 {
        anyhow::bail!("RESCUE_MAP_WIDTH / RESCUE_MAP_HEIGHT must be positive");
    }
    if config.heartbeat_miss_threshold == 0 {
        anyhow::bail!("RESCUE_HEARTBEAT_MISS_THRESHOLD must be at least 1");
    }

    info!(target: "server", port = config.port, max_drones = config.max_drones, "starting rescue-server");

    let (shutdown_tx, _) = broadcast::channel(1);
    let server = Arc::new(Server::new(config));

    let run_shutdown = shutdown_tx.clone();
    let mut run_handle = tokio::spawn(async move { server.run(run_shutdown).await });

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    // The watchdog (liveness monitor) can also fire `shutdown_tx` on its own,
    // with no signal involved - wait on whichever comes first.
    let run_result = tokio::select! {
        _ = sigterm.recv() => {
            info!(target: "server", "received SIGTERM");
            info!(target: "server", "shutting down");
            let _ = shutdown_tx.send(());
            run_handle.await
        }
        _ = sigint.recv() => {
            info!(target: "server", "received SIGINT");
            info!(target: "server", "shutting down");
            let _ = shutdown_tx.send(());
            run_handle.await
        }
        result = &mut run_handle => {
            info!(target: "server", "watchdog triggered shutdown");
            result
        }
    };

    match run_result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(target: "server", error = %err, "server loop exited with an error"),
        Err(join_err) => tracing::error!(target: "server", error = %join_err, "server task panicked"),
    }

    info!(target: "server", "shutdown complete");
    Ok(())
}
