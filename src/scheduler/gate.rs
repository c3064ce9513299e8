//! Inference gate: at most one synthesis call on the device at a time.
//!
//! Waiters are served in arrival order. The device lock is a Tokio mutex,
//! whose queue is FIFO, so a steady stream of short requests cannot starve
//! an earlier long one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::{deadline_after, Lease, LifecycleError};
use crate::telemetry;

/// Decrements the waiting count however the wait ends.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serializes inference calls onto the device.
#[derive(Clone, Default)]
pub struct InferenceGate {
    device: Arc<Mutex<()>>,
    waiting: Arc<AtomicUsize>,
    executed: Arc<AtomicU64>,
}

impl InferenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests currently queued for the device.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// True while an inference call holds the device.
    pub fn is_busy(&self) -> bool {
        self.device.try_lock().is_err()
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Run `work` against the leased model once the device is free.
    ///
    /// The lease is consumed and released when the call finishes, fails or
    /// times out waiting for the device.
    pub async fn run<P, T, F>(
        &self,
        lease: Lease<P>,
        timeout: Duration,
        work: F,
    ) -> Result<T, LifecycleError>
    where
        P: Send + Sync + 'static,
        T: Send + 'static,
        F: FnOnce(&P) -> T + Send + 'static,
    {
        self.run_until(lease, deadline_after(Instant::now(), timeout), work).await
    }

    /// Like `run`, bounded by an absolute deadline for the device wait.
    pub async fn run_until<P, T, F>(
        &self,
        lease: Lease<P>,
        deadline: Instant,
        work: F,
    ) -> Result<T, LifecycleError>
    where
        P: Send + Sync + 'static,
        T: Send + 'static,
        F: FnOnce(&P) -> T + Send + 'static,
    {
        let started = Instant::now();
        let permit = {
            let _waiting = Waiting::enter(&self.waiting);
            tokio::time::timeout_at(deadline, self.device.clone().lock_owned()).await
        };
        let waited = started.elapsed();
        telemetry::record_gate_wait(waited, self.waiting());

        let permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                telemetry::record_gate_timeout();
                warn!(
                    lease = %lease.id(),
                    variant = lease.variant_id(),
                    waited_ms = waited.as_millis() as u64,
                    "gave up waiting for the device"
                );
                drop(lease);
                return Err(LifecycleError::GateTimeout {
                    waited_ms: waited.as_millis() as u64,
                });
            }
        };

        let checkout = lease.checkout()?;
        debug!(lease = %checkout.lease_id(), waited_ms = waited.as_millis() as u64, "device acquired");

        let result = tokio::task::spawn_blocking(move || {
            let output = work(checkout.payload());
            drop(checkout);
            drop(permit);
            output
        })
        .await;

        self.executed.fetch_add(1, Ordering::Relaxed);
        result.map_err(|err| {
            let reason = if err.is_panic() {
                panic_message(err.into_panic())
            } else {
                err.to_string()
            };
            warn!(error = %reason, "inference call failed");
            LifecycleError::InferenceFailed(reason)
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "inference panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "inference panicked");
    }

    #[tokio::test]
    async fn test_waiting_count_tracks_queue() {
        let gate = InferenceGate::new();
        assert_eq!(gate.waiting(), 0);
        assert!(!gate.is_busy());

        let held = gate.device.clone().lock_owned().await;
        assert!(gate.is_busy());
        {
            let _w = Waiting::enter(&gate.waiting);
            assert_eq!(gate.waiting(), 1);
        }
        assert_eq!(gate.waiting(), 0);
        drop(held);
    }
}
