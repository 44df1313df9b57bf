//! Standalone entry point: load configuration, run the gateway until
//! SIGINT/SIGTERM, then give in-flight work a 5s grace period before
//! forcing exit.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gateway::{build_context, run};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gateway")]
#[command(about = "Payment-message gateway: terminal multiplexer and host link")]
#[command(version)]
struct Args {}

#[tokio::main]
async fn main() -> Result<()> {
    let _args = Args::parse();
    init_logging();

    let config = gwconfig::Config::from_env()?;
    info!(mode = %config.mode, port = config.listen_port, "starting gateway");

    let ctx = build_context(config).await?;
    let shutdown = CancellationToken::new();

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, stopping gateway");
        shutdown_signal.cancel();
    });

    let gateway = tokio::spawn(run(ctx, shutdown));

    // `run` bounds its own shutdown wait to accept::SHUTDOWN_GRACE (5s);
    // this outer timeout is a last-resort backstop in case a task
    // deadlocks rather than returning.
    match tokio::time::timeout(Duration::from_secs(10), gateway).await {
        Ok(Ok(Ok(()))) => info!("gateway stopped gracefully"),
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "gateway exited with error");
            std::process::exit(1);
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "gateway task panicked");
            std::process::exit(1);
        }
        Err(_) => {
            tracing::warn!("graceful shutdown timed out, forcing exit");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
}
