//! Model handles: identity, lifecycle state and the resident record.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use super::lease::LeaseId;
use super::registry::ModelVariant;

/// Unique handle to a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Lifecycle state of the handle occupying a slot.
///
/// `Loading` and `Evicting` are transient; no lease is granted in either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Unloaded,
    Loading,
    Ready,
    Evicting,
}

/// Why a resident handle was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Idle,
    Swap,
    Shutdown,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Swap => "swap",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Bookkeeping for one outstanding lease.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseEntry {
    pub deadline: Instant,
    /// Set while the lease is executing inside the inference gate.
    pub in_use: bool,
}

/// A READY handle and everything the manager knows about it.
pub(crate) struct ResidentModel<P> {
    pub id: HandleId,
    pub variant: Arc<ModelVariant>,
    pub payload: Arc<P>,
    pub loaded_at: Instant,
    pub last_used: Instant,
    pub leases: HashMap<LeaseId, LeaseEntry>,
}

impl<P> ResidentModel<P> {
    pub fn new(id: HandleId, variant: Arc<ModelVariant>, payload: P, now: Instant) -> Self {
        Self {
            id,
            variant,
            payload: Arc::new(payload),
            loaded_at: now,
            last_used: now,
            leases: HashMap::new(),
        }
    }

    /// Earliest deadline among leases that could be reclaimed right now.
    pub fn next_reclaim_deadline(&self) -> Option<Instant> {
        self.leases
            .values()
            .filter(|entry| !entry.in_use)
            .map(|entry| entry.deadline)
            .min()
    }
}
