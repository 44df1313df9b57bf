//! The response router. Keyed by host STAN, holding at most one waiter's
//! oneshot sender at a time. Deliberately disjoint from
//! [`crate::correlator::StanCorrelator`]: the correlator owns STAN
//! lifetime and translation, this owns only "who is waiting for the
//! reply right now."

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use iso8583::Message;

use crate::error::GatewayError;

/// A response delivered from the upstream host for a given host STAN.
#[derive(Debug, Clone)]
pub struct HostResponse {
    pub message: Message,
}

/// Owns the host-STAN-keyed table of single-shot response channels.
///
/// Double-registering a waiter for a host STAN that already has one is a
/// programming error — `register` returns [`GatewayError::Internal`]
/// rather than silently overwriting the prior waiter, since that would
/// orphan it forever.
#[derive(Default)]
pub struct ResponseRouter {
    waiters: Mutex<HashMap<String, oneshot::Sender<HostResponse>>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        ResponseRouter { waiters: Mutex::new(HashMap::new()) }
    }

    /// Registers a waiter for `host_stan`, returning the receive half.
    pub fn register(&self, host_stan: &str) -> Result<oneshot::Receiver<HostResponse>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        if waiters.contains_key(host_stan) {
            return Err(GatewayError::Internal("duplicate response waiter registration"));
        }
        waiters.insert(host_stan.to_string(), tx);
        Ok(rx)
    }

    /// Delivers `response` to the waiter for `host_stan`, if any is still
    /// registered. Returns `false` (logged by the caller) when the
    /// response is late or unknown — the host read loop must never block
    /// or panic on this.
    pub fn deliver(&self, host_stan: &str, response: HostResponse) -> bool {
        let sender = self.waiters.lock().remove(host_stan);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Removes a waiter without delivering anything — called after a
    /// timeout so a late response has nowhere to land.
    pub fn unregister(&self, host_stan: &str) {
        self.waiters.lock().remove(host_stan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let router = ResponseRouter::new();
        let _rx = router.register("000000000001").unwrap();
        assert!(matches!(
            router.register("000000000001"),
            Err(GatewayError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn deliver_reaches_the_registered_waiter() {
        let router = ResponseRouter::new();
        let rx = router.register("000000000001").unwrap();
        let delivered = router.deliver(
            "000000000001",
            HostResponse { message: Message::new("0210") },
        );
        assert!(delivered);
        let got = rx.await.unwrap();
        assert_eq!(got.message.mti(), "0210");
    }

    #[test]
    fn delivering_to_unknown_stan_is_reported_false() {
        let router = ResponseRouter::new();
        assert!(!router.deliver("no-such-stan", HostResponse { message: Message::new("0210") }));
    }

    #[tokio::test]
    async fn unregister_makes_the_waiter_unreachable() {
        let router = ResponseRouter::new();
        let rx = router.register("000000000001").unwrap();
        router.unregister("000000000001");
        assert!(!router.deliver("000000000001", HostResponse { message: Message::new("0210") }));
        assert!(rx.await.is_err());
    }
}
