//! Bounded-concurrency accept server: a semaphore caps in-flight
//! handlers, a buffered waiting queue smooths bursts past the cap, and a
//! dispatcher pulls from the queue as permits free up.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Maximum concurrent in-flight terminal handlers.
pub const MAX_CLIENTS: usize = 1000;

/// Capacity of the waiting queue between accept and dispatch.
pub const QUEUE_CAPACITY: usize = 1000;

/// Backoff applied after a transient accept error.
const TRANSIENT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Grace period given to in-flight handlers after shutdown is requested
/// before the accept server returns regardless.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs the accept loop and dispatcher until `shutdown` is cancelled.
///
/// `spawn_handler` is handed the accepted socket and the permit that
/// bounds its concurrency slot; it must spawn its own task and drop the
/// permit only when that task finishes, which is what actually enforces
/// the [`MAX_CLIENTS`] cap.
pub async fn run<F>(listener: TcpListener, shutdown: CancellationToken, spawn_handler: F)
where
    F: Fn(TcpStream, OwnedSemaphorePermit) -> tokio::task::JoinHandle<()> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(MAX_CLIENTS));
    let (tx, mut rx) = mpsc::channel::<TcpStream>(QUEUE_CAPACITY);

    let dispatcher_shutdown = shutdown.clone();
    let dispatcher = tokio::spawn(async move {
        let mut in_flight = Vec::new();
        loop {
            tokio::select! {
                maybe_conn = rx.recv() => {
                    let Some(conn) = maybe_conn else { break };
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    in_flight.push(spawn_handler(conn, permit));
                }
                _ = dispatcher_shutdown.cancelled() => {
                    info!("dispatcher shutting down, draining queue");
                    while let Ok(conn) = rx.try_recv() {
                        drop(conn);
                    }
                    break;
                }
            }
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(in_flight))
            .await
            .is_err()
        {
            warn!("grace period elapsed with handlers still in flight");
        }
    });

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        if tx.send(stream).await.is_err() {
                            warn!(%peer, "dispatcher gone, dropping connection");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "transient accept error, backing off");
                        tokio::time::sleep(TRANSIENT_ACCEPT_BACKOFF).await;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("accept loop shutting down");
                break;
            }
        }
    }

    drop(tx);
    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "dispatcher task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream as ClientStream;

    #[tokio::test]
    async fn accepted_connections_reach_the_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let handler_count = count.clone();
        let shutdown_clone = shutdown.clone();
        let server = tokio::spawn(run(listener, shutdown_clone, move |_stream, permit| {
            let counter = handler_count.clone();
            tokio::spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                drop(permit);
            })
        }));

        let mut client = ClientStream::connect(addr).await.unwrap();
        client.write_all(b"hi").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        server.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
