//! The payment-message gateway core: wires together the frame codec,
//! ISO 8583 dialect adapter, HSM client, and persistence crates into the
//! terminal-side accept server and the single upstream host session.
//! Two binaries in `src/bin/` share this one [`Context`] and the
//! [`run`] entry point.

pub mod accept;
pub mod correlator;
pub mod error;
pub mod license;
pub mod netmgmt;
pub mod router;
pub mod terminal;
pub mod upstream;
pub mod util;

use std::sync::Arc;
use std::time::Duration;

use db::DbPool;
use hsm::HsmClient;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use error::GatewayError;

use correlator::StanCorrelator;
use router::ResponseRouter;
use upstream::UpstreamSession;

/// The STAN counter file, relative to the working directory the gateway
/// is started from.
const STAN_FILE: &str = "stan.json";

/// Everything a terminal-session task needs, shared read-only (or behind
/// its own internal locking) across every accepted connection and the
/// upstream session.
pub struct Context {
    pub config: gwconfig::Config,
    pub pool: DbPool,
    pub hsm: HsmClient,
    pub correlator: Arc<StanCorrelator>,
    pub router: Arc<ResponseRouter>,
    pub upstream: Arc<UpstreamSession>,
}

/// Assembles the [`Context`] from a loaded [`gwconfig::Config`]: connects
/// the database pool, loads the STAN allocator, and constructs the
/// upstream session (not yet connected — [`run`] spawns its supervisor).
pub async fn build_context(config: gwconfig::Config) -> anyhow::Result<Arc<Context>> {
    let pool = db::connect(&config.mysql_dsn).await?;
    let allocator = db::StanAllocator::load(STAN_FILE).await?;
    let correlator = Arc::new(StanCorrelator::new(allocator));
    let router = Arc::new(ResponseRouter::new());
    let hsm = HsmClient::new(config.hsm_address.clone());

    let upstream = UpstreamSession::new(config.host_address.clone(), router.clone(), Arc::new(hsm.clone()), pool.clone());

    Ok(Arc::new(Context {
        config,
        pool,
        hsm,
        correlator,
        router,
        upstream,
    }))
}

/// Runs the gateway until `shutdown` is cancelled: spawns the upstream
/// session supervisor, the correlator reaper, and the bounded-concurrency
/// terminal accept server, then waits for all three to wind down within
/// the shutdown grace period.
///
/// Per spec §7, a host reconnect that exhausts its backoff is fatal to the
/// whole gateway, not just the upstream task: if `upstream.run()` returns an
/// error before the accept server has wound down on its own, the root
/// `shutdown` token is cancelled (so the accept server stops taking
/// terminals it could never forward for) and the error is propagated to the
/// caller, which aborts the process.
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", ctx.config.listen_port)).await?;
    info!(port = ctx.config.listen_port, "terminal accept server listening");

    let mut upstream_task = {
        let upstream = ctx.upstream.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { upstream.run(shutdown).await })
    };

    let reaper_task = {
        let correlator = ctx.correlator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = correlator.run_reaper() => {}
                _ = shutdown.cancelled() => {}
            }
        })
    };

    let mut accept_task = {
        let accept_shutdown = shutdown.clone();
        let accept_ctx = ctx.clone();
        tokio::spawn(async move {
            accept::run(listener, accept_shutdown, move |stream, permit| {
                let ctx = accept_ctx.clone();
                tokio::spawn(async move {
                    terminal::run(stream, permit, ctx).await;
                })
            })
            .await;
        })
    };

    enum Finished {
        Upstream(Result<Result<(), GatewayError>, tokio::task::JoinError>),
        Accept,
    }

    let finished = tokio::select! {
        result = &mut upstream_task => Finished::Upstream(result),
        _ = &mut accept_task => Finished::Accept,
    };

    let fatal = match finished {
        Finished::Upstream(Ok(Ok(()))) => None,
        Finished::Upstream(Ok(Err(e))) => {
            error!(error = %e, "upstream session exited fatally, aborting gateway");
            Some(e)
        }
        Finished::Upstream(Err(e)) => {
            error!(error = %e, "upstream task panicked, aborting gateway");
            Some(GatewayError::Internal("upstream task panicked"))
        }
        Finished::Accept => None,
    };

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        if !upstream_task.is_finished() {
            let _ = (&mut upstream_task).await;
        }
        if !accept_task.is_finished() {
            let _ = (&mut accept_task).await;
        }
        let _ = reaper_task.await;
    })
    .await;

    match fatal {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
