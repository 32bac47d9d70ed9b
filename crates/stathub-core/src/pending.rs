//! Pending-request registry and per-request expiry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::oneshot;

use crate::frame::Frame;
use crate::settings::Settings;

/// Table of in-flight requests, keyed by correlation id.
///
/// Each entry holds a single-shot completion handle for one waiting
/// caller. Two independent triggers race to resolve an entry: the matching
/// reply frame arriving from the peer, and the expiry timer armed at
/// registration. Whichever removes the entry first delivers through its
/// sender; the loser finds the entry gone and does nothing. The map's
/// atomic remove is the only gate needed for that to hold under
/// parallelism.
///
/// One registry instance is shared by every connection; it is owned by the
/// connection-management layer and passed down by handle.
pub struct PendingRequests {
    waiting: DashMap<String, oneshot::Sender<Frame>>,
    timeout: Duration,
}

impl PendingRequests {
    /// Registry whose requests expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            waiting: DashMap::new(),
            timeout,
        }
    }

    /// Configured per-request deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a waiter under `uuid` and arm its expiry timer.
    ///
    /// The returned receiver resolves exactly once: with the matching
    /// reply frame, or with [`Frame::timeout_error`] once the deadline
    /// passes. Callers must register before writing the request frame, so
    /// a transport that loops a reply back synchronously still finds the
    /// waiter in place.
    pub fn register(self: &Arc<Self>, uuid: String) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        let _ = self.waiting.insert(uuid.clone(), tx);

        let registry = Arc::clone(self);
        let _ = tokio::spawn(async move {
            tokio::time::sleep(registry.timeout).await;
            if registry.expire(&uuid) {
                counter!("stathub_request_timeouts_total").increment(1);
            }
        });

        rx
    }

    /// Hand an inbound frame to the waiter registered under its `uuid`.
    ///
    /// Returns the frame back when no waiter takes it: the `uuid` is
    /// absent or unknown, or the entry was already resolved (a late reply
    /// racing the expiry timer). The registry stays silent on misses;
    /// routing an undelivered frame elsewhere is the caller's decision.
    pub fn deliver(&self, frame: Frame) -> Result<(), Frame> {
        let Some(uuid) = frame.uuid.as_deref() else {
            return Err(frame);
        };
        match self.waiting.remove(uuid) {
            Some((_, tx)) => tx.send(frame),
            None => Err(frame),
        }
    }

    /// Number of requests still awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.waiting.len()
    }

    /// Resolve one entry with the synthetic timeout frame. False when the
    /// entry was already resolved by a reply.
    fn expire(&self, uuid: &str) -> bool {
        match self.waiting.remove(uuid) {
            Some((_, tx)) => {
                let _ = tx.send(Frame::timeout_error());
                true
            }
            None => false,
        }
    }
}

impl Default for PendingRequests {
    /// Registry using the process-wide configured timeout.
    fn default() -> Self {
        Self::new(Settings::get().request_timeout)
    }
}
