//! Graceful shutdown for the synthesis runtime.
//!
//! Shutdown runs in two stages: stop admitting synthesis requests and wait
//! for the ones in flight, then let the lifecycle manager drain leases and
//! evict every resident model.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl ShutdownState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    /// Deadline passed with `remaining` requests or leases still outstanding.
    Timeout { remaining: u32 },
}

impl ShutdownResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Combine the results of consecutive shutdown stages.
    pub fn and(self, next: ShutdownResult) -> ShutdownResult {
        match (self, next) {
            (Self::Complete, Self::Complete) => Self::Complete,
            (Self::Timeout { remaining: a }, Self::Timeout { remaining: b }) => {
                Self::Timeout { remaining: a + b }
            }
            (Self::Timeout { remaining }, Self::Complete)
            | (Self::Complete, Self::Timeout { remaining }) => Self::Timeout { remaining },
        }
    }
}

/// Admission control for synthesis requests during shutdown.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    state: Arc<AtomicU8>,
    in_flight: Arc<AtomicU32>,
    drained: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ShutdownState::Running as u8)),
            in_flight: Arc::new(AtomicU32::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Track an in-flight request. Returns None once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = ShutdownGuard {
            counter: self.in_flight.clone(),
            drained: self.drained.clone(),
        };
        // Checked after the increment so a concurrent `initiate` either sees
        // this request or the request sees the new state.
        if !self.is_accepting() {
            return None;
        }
        Some(guard)
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting requests and wait for in-flight ones to finish.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        self.state.store(ShutdownState::Draining as u8, Ordering::SeqCst);
        let deadline = crate::models::deadline_after(Instant::now(), timeout);

        let result = loop {
            let notified = self.drained.notified();
            let count = self.in_flight_count();
            if count == 0 {
                break ShutdownResult::Complete;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let count = self.in_flight_count();
                break if count == 0 {
                    ShutdownResult::Complete
                } else {
                    ShutdownResult::Timeout { remaining: count }
                };
            }
        };

        self.state.store(ShutdownState::Stopped as u8, Ordering::SeqCst);
        result
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for in-flight request tracking.
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    drained: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}
