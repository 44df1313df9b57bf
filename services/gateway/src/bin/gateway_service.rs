//! OS-service-wrapping entry point: adds `install | uninstall | start |
//! stop | status | run` verbs around the same [`gateway::run`] core the
//! standalone binary uses.
//!
//! No dependency in this workspace wraps a platform service manager, so
//! the management verbs here report what they would do rather than
//! actually registering with `systemd`/the Windows SCM. `run` (and bare
//! invocation) drives the real gateway.

use anyhow::Result;
use clap::{Parser, Subcommand};
use gateway::{build_context, run};
use tokio_util::sync::CancellationToken;
use tracing::info;

const SERVICE_NAME: &str = "gateway";

#[derive(Parser, Debug)]
#[command(name = "gateway-service")]
#[command(about = "Payment-message gateway, packaged as an OS service")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    verb: Option<Verb>,
}

#[derive(Subcommand, Debug)]
enum Verb {
    /// Register the gateway with the platform's service manager.
    Install,
    /// Remove the gateway's service manager registration.
    Uninstall,
    /// Start the installed service.
    Start,
    /// Stop the running service.
    Stop,
    /// Report whether the installed service is running.
    Status,
    /// Run the gateway in the foreground (what the service manager
    /// invokes once installed).
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    match args.verb {
        Some(Verb::Install) => {
            println!("service '{SERVICE_NAME}' would be installed with the platform service manager");
            Ok(())
        }
        Some(Verb::Uninstall) => {
            println!("service '{SERVICE_NAME}' would be unregistered from the platform service manager");
            Ok(())
        }
        Some(Verb::Start) => {
            println!("service '{SERVICE_NAME}' would be started via the platform service manager");
            Ok(())
        }
        Some(Verb::Stop) => {
            println!("service '{SERVICE_NAME}' would be stopped via the platform service manager");
            Ok(())
        }
        Some(Verb::Status) => {
            println!("service '{SERVICE_NAME}' status is unknown outside a real service manager integration");
            Ok(())
        }
        Some(Verb::Run) | None => run_foreground().await,
    }
}

/// Runs the gateway until SIGINT/SIGTERM, the same control flow a
/// service manager would exercise: start on invocation, stop on signal.
async fn run_foreground() -> Result<()> {
    let config = gwconfig::Config::from_env()?;
    info!(mode = %config.mode, port = config.listen_port, "starting gateway service");

    let ctx = build_context(config).await?;
    let shutdown = CancellationToken::new();

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, stopping gateway service");
        shutdown_signal.cancel();
    });

    run(ctx, shutdown).await?;
    info!("gateway service stopped");
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
