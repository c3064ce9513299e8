//! Leases: short-lived proof that the holder may use a resident handle.
//!
//! A lease is released exactly once, either explicitly through
//! `LifecycleManager::release` or implicitly when it is dropped. Dropping is
//! how abandoned requests (client disconnect, cancelled futures) give their
//! lease back.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use super::error::LifecycleError;
use super::handle::HandleId;
use super::registry::ModelVariant;
use super::slot::Slot;

/// Unique lease identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Right to run one inference call against a specific handle.
pub struct Lease<P> {
    id: LeaseId,
    handle: HandleId,
    variant: Arc<ModelVariant>,
    granted_at: Instant,
    deadline: Instant,
    released: AtomicBool,
    slot: Arc<Slot<P>>,
}

impl<P> Lease<P> {
    pub(crate) fn new(
        id: LeaseId,
        handle: HandleId,
        variant: Arc<ModelVariant>,
        granted_at: Instant,
        deadline: Instant,
        slot: Arc<Slot<P>>,
    ) -> Self {
        Self {
            id,
            handle,
            variant,
            granted_at,
            deadline,
            released: AtomicBool::new(false),
            slot,
        }
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    pub fn variant_id(&self) -> &str {
        &self.variant.id
    }

    pub fn variant(&self) -> &ModelVariant {
        &self.variant
    }

    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }

    /// Maximum lifetime; past it the sweeper may reclaim the lease.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn release(&self) -> Result<(), LifecycleError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::DoubleRelease(self.id));
        }
        self.slot.release(self.id, self.handle)
    }

    /// Start executing under this lease. Consumes it; the lease is released
    /// when the returned checkout is dropped.
    pub(crate) fn checkout(self) -> Result<Checkout<P>, LifecycleError> {
        if self.is_released() {
            return Err(LifecycleError::DoubleRelease(self.id));
        }
        let payload = self.slot.checkout(self.id, self.handle)?;
        Ok(Checkout {
            payload: Some(payload),
            lease: self,
        })
    }
}

impl<P> Drop for Lease<P> {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.slot.release(self.id, self.handle) {
            debug!(lease = %self.id, error = %err, "dropped lease was already reclaimed");
        }
    }
}

impl<P> fmt::Debug for Lease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("variant", &self.variant.id)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A lease that is currently executing inside the inference gate.
///
/// Drop order matters: the payload reference goes first, then the in-use
/// mark, then the lease itself, so an eviction waiting on the release finds
/// the payload uniquely owned.
pub(crate) struct Checkout<P> {
    payload: Option<Arc<P>>,
    lease: Lease<P>,
}

impl<P> Checkout<P> {
    pub fn payload(&self) -> &P {
        match &self.payload {
            Some(payload) => payload,
            None => unreachable!("payload is only taken on drop"),
        }
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease.id
    }
}

impl<P> Drop for Checkout<P> {
    fn drop(&mut self) {
        self.payload.take();
        self.lease.slot.checkin(self.lease.id, self.lease.handle);
    }
}
