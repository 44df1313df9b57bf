//! The STAN correlator: counter, in-flight STAN-translation map, and the
//! reversal-advice store, kept behind one lock. Deliberately disjoint
//! from [`crate::router::ResponseRouter`], which owns the single-waiter
//! response channels — STAN bookkeeping and in-flight response routing
//! are two separate concerns and stay as two owned structures rather
//! than one coarse map.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use db::StanAllocator;
use iso8583::Message;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// How long a `stan_map` entry may live without a matching response before
/// the reaper reclaims it.
pub const STAN_ENTRY_TTL: Duration = Duration::from_secs(120);

/// How often the reaper sweeps `stan_map`.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);

struct StanEntry {
    client_stan: String,
    acquired_at: Instant,
}

struct State {
    stan_map: HashMap<String, StanEntry>,
    reversal_advice: HashMap<String, Message>,
}

/// Owns the monotonic STAN counter, the host→client STAN translation map,
/// and the per-terminal reversal-advice store.
pub struct StanCorrelator {
    allocator: StanAllocator,
    state: Mutex<State>,
}

impl StanCorrelator {
    pub fn new(allocator: StanAllocator) -> Self {
        StanCorrelator {
            allocator,
            state: Mutex::new(State {
                stan_map: HashMap::new(),
                reversal_advice: HashMap::new(),
            }),
        }
    }

    /// Allocates a fresh host STAN for `client_stan`, remembering the
    /// translation so the matching response can be rewritten back.
    pub async fn allocate_host_stan(&self, client_stan: &str) -> Result<String, GatewayError> {
        let host_stan = self.allocator.next().await?;

        let mut state = self.state.lock().await;
        state.stan_map.insert(
            host_stan.clone(),
            StanEntry {
                client_stan: client_stan.to_string(),
                acquired_at: Instant::now(),
            },
        );
        debug!(host_stan, client_stan, "allocated host stan");
        Ok(host_stan)
    }

    /// Looks up and removes the client STAN for `host_stan`. Returns
    /// `None` if no entry exists — already reaped, or a response for a
    /// STAN we never sent.
    pub async fn take_client_stan(&self, host_stan: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state.stan_map.remove(host_stan).map(|e| e.client_stan)
    }

    /// Removes the in-flight entry for `host_stan` without returning it —
    /// used when a request has definitively failed (e.g. a write error)
    /// and its slot should not linger until the reaper gets to it.
    pub async fn discard(&self, host_stan: &str) {
        self.state.lock().await.stan_map.remove(host_stan);
    }

    /// Reaps any `stan_map` entry older than [`STAN_ENTRY_TTL`]. Intended
    /// to be driven by a dedicated task on [`REAPER_INTERVAL`].
    pub async fn reap(&self) {
        let mut state = self.state.lock().await;
        let before = state.stan_map.len();
        state
            .stan_map
            .retain(|_, entry| entry.acquired_at.elapsed() < STAN_ENTRY_TTL);
        let reaped = before - state.stan_map.len();
        if reaped > 0 {
            warn!(reaped, "reaper purged stale stan_map entries");
        }
    }

    /// Runs the reaper loop forever, on [`REAPER_INTERVAL`]. Intended to be
    /// spawned as its own task and aborted on shutdown.
    pub async fn run_reaper(&self) {
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        loop {
            ticker.tick().await;
            self.reap().await;
        }
    }

    /// Stores the original reversal message under `tid‖client_stan`, so a
    /// later matching `0400` is resent as a `0421` advice instead of a
    /// fresh `0420`.
    pub async fn store_reversal_advice(&self, key: String, original: Message) {
        self.state.lock().await.reversal_advice.insert(key, original);
    }

    /// True if `tid‖client_stan` already holds an unresponded reversal.
    pub async fn has_reversal_advice(&self, key: &str) -> bool {
        self.state.lock().await.reversal_advice.contains_key(key)
    }

    /// Consumed on a successful (`RC=00`) `0421` response.
    pub async fn clear_reversal_advice(&self, key: &str) {
        self.state.lock().await.reversal_advice.remove(key);
    }
}

/// Rewrites field 11 of an outbound message to `host_stan`. Free function,
/// not a method: it needs no access to the correlator's shared state,
/// only the message.
pub fn rewrite_outbound_stan(msg: &mut Message, host_stan: &str) -> Result<(), GatewayError> {
    msg.set(11, host_stan).map_err(GatewayError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    async fn correlator() -> StanCorrelator {
        let dir = tempfile::tempdir().unwrap();
        let allocator = StanAllocator::load(dir.path().join("stan.json")).await.unwrap();
        StanCorrelator::new(allocator)
    }

    #[tokio::test]
    async fn allocate_then_take_round_trips_client_stan() {
        let c = correlator().await;
        let host_stan = c.allocate_host_stan("000123").await.unwrap();
        assert_eq!(c.take_client_stan(&host_stan).await, Some("000123".to_string()));
        // second take finds nothing - the entry was consumed.
        assert_eq!(c.take_client_stan(&host_stan).await, None);
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let c = correlator().await;
        let a = c.allocate_host_stan("000001").await.unwrap();
        let b = c.allocate_host_stan("000002").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn reaper_purges_entries_older_than_ttl() {
        let c = correlator().await;
        let host_stan = c.allocate_host_stan("000123").await.unwrap();
        {
            let mut state = c.state.lock().await;
            let entry = state.stan_map.get_mut(&host_stan).unwrap();
            entry.acquired_at = Instant::now() - StdDuration::from_secs(121);
        }
        c.reap().await;
        assert_eq!(c.take_client_stan(&host_stan).await, None);
    }

    #[tokio::test]
    async fn reversal_advice_round_trips() {
        let c = correlator().await;
        let key = "T1000045".to_string();
        assert!(!c.has_reversal_advice(&key).await);
        c.store_reversal_advice(key.clone(), Message::new("0420")).await;
        assert!(c.has_reversal_advice(&key).await);
        c.clear_reversal_advice(&key).await;
        assert!(!c.has_reversal_advice(&key).await);
    }
}
