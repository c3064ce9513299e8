//! Model lifecycle manager.
//!
//! Decides which variant is resident in each device budget slot, loads on
//! demand, swaps when a different variant is requested, and hands out leases.
//! Idle eviction runs in a background sweeper (see `sweep.rs`); the swap and
//! eviction transitions live in `swap.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::ModelBackend;
use super::error::LifecycleError;
use super::handle::{EvictionReason, HandleState, LeaseEntry};
use super::lease::{Lease, LeaseId};
use super::registry::{ModelRegistry, ModelVariant};
use super::slot::{deadline_after, Phase, PendingSwap, Slot, SlotKey, SlotPolicy, SlotState};
use super::sweep::spawn_sweeper;
use crate::shutdown::ShutdownResult;
use crate::telemetry;

/// Lifecycle manager configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Quiet period after the last release before a handle is evicted.
    pub idle_timeout: Duration,
    /// Leases older than this are reclaimed even if never released.
    pub max_lease_lifetime: Duration,
    pub slot_policy: SlotPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(180),
            max_lease_lifetime: Duration::from_secs(900),
            slot_policy: SlotPolicy::Shared,
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub loads: AtomicU64,
    pub load_failures: AtomicU64,
    pub evictions: AtomicU64,
    pub idle_evictions: AtomicU64,
    pub swaps: AtomicU64,
    pub leases_granted: AtomicU64,
    pub leases_reclaimed: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LifecycleStats {
        LifecycleStats {
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            idle_evictions: self.idle_evictions.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
            leases_granted: self.leases_granted.load(Ordering::Relaxed),
            leases_reclaimed: self.leases_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Cumulative lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub idle_evictions: u64,
    pub swaps: u64,
    pub leases_granted: u64,
    pub leases_reclaimed: u64,
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: String,
    pub state: HandleState,
    pub variant: Option<String>,
    pub handle: Option<u64>,
    pub leases: usize,
    pub resident_ms: Option<u64>,
    pub idle_ms: Option<u64>,
    pub evicts_in_ms: Option<u64>,
    pub swap_pending: Option<String>,
}

pub(crate) enum Step<P> {
    Granted(Lease<P>),
    Fail(LifecycleError),
    Drive(u64),
    Wait,
}

/// Shared state behind every clone of a `LifecycleManager`.
pub(crate) struct Core<B: ModelBackend> {
    pub registry: Arc<ModelRegistry>,
    pub backend: Arc<B>,
    pub config: LifecycleConfig,
    pub slots: Vec<Arc<Slot<B::Payload>>>,
    pub counters: Counters,
    /// Set once a backend reports the device as lost.
    pub fault: Mutex<Option<String>>,
    pub next_handle: AtomicU64,
    next_lease: AtomicU64,
    next_attempt: AtomicU64,
    pub cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<B: ModelBackend> Drop for Core<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<B: ModelBackend> Core<B> {
    fn slot_for(&self, variant: &ModelVariant) -> Arc<Slot<B::Payload>> {
        let key = self.config.slot_policy.slot_for(variant);
        self.slots
            .iter()
            .find(|slot| slot.key == key)
            .unwrap_or(&self.slots[0])
            .clone()
    }

    async fn acquire(
        self: &Arc<Self>,
        variant_id: &str,
        timeout: Duration,
    ) -> Result<Lease<B::Payload>, LifecycleError> {
        let variant = self.registry.resolve(variant_id)?;
        let slot = self.slot_for(&variant);
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);
        let timed_out = || LifecycleError::AcquireTimeout {
            variant: variant.id.clone(),
            waited_ms: started.elapsed().as_millis() as u64,
        };

        let _interest = slot.register_interest(&variant.id);
        // Load attempt this caller is waiting on, for failure reporting.
        let mut watched = None;

        loop {
            let mut events = slot.subscribe();
            let step = {
                let mut guard = slot.state.lock();
                self.plan(&slot, &mut guard, &variant, &mut watched)
            };

            match step {
                Step::Granted(lease) => {
                    Counters::bump(&self.counters.leases_granted);
                    telemetry::record_lease_granted(&variant.id, started.elapsed());
                    debug!(
                        slot = %slot.key,
                        variant = %variant.id,
                        lease = %lease.id(),
                        handle = %lease.handle(),
                        "lease granted"
                    );
                    return Ok(lease);
                }
                Step::Fail(err) => return Err(err),
                Step::Drive(attempt) => {
                    if !self.drive_swap(&slot, &variant, attempt, deadline).await {
                        return Err(timed_out());
                    }
                }
                Step::Wait => {
                    if tokio::time::timeout_at(deadline, events.changed()).await.is_err() {
                        return Err(timed_out());
                    }
                }
            }
        }
    }

    /// Decide what an acquisition does next. Runs under the slot lock.
    fn plan(
        &self,
        slot: &Arc<Slot<B::Payload>>,
        st: &mut SlotState<B::Payload>,
        variant: &Arc<ModelVariant>,
        watched: &mut Option<u64>,
    ) -> Step<B::Payload> {
        if st.closed {
            return Step::Fail(LifecycleError::ShuttingDown);
        }
        if let Some(reason) = self.fault.lock().clone() {
            return Step::Fail(LifecycleError::DeviceFailure(reason));
        }
        if let Some(failed) = watched.and_then(|attempt| st.failure_for(attempt)) {
            return Step::Fail(LifecycleError::LoadFailure {
                variant: failed.variant.clone(),
                reason: failed.reason.clone(),
            });
        }

        let swap_pending = st.pending.is_some();
        let contested = st.resident_contested();
        match &mut st.phase {
            Phase::Ready(resident) if resident.variant.id == variant.id && !swap_pending => {
                let now = Instant::now();
                let id = LeaseId(self.next_lease.fetch_add(1, Ordering::SeqCst));
                let deadline = deadline_after(now, self.config.max_lease_lifetime);
                resident.leases.insert(id, LeaseEntry { deadline, in_use: false });
                resident.last_used = now;
                let first = resident.leases.len() == 1;
                let lease = Lease::new(
                    id,
                    resident.id,
                    resident.variant.clone(),
                    now,
                    deadline,
                    slot.clone(),
                );
                st.idle_deadline = None;
                if first {
                    slot.wake_sweeper();
                }
                Step::Granted(lease)
            }
            Phase::Loading { variant: loading, attempt } => {
                if loading.id == variant.id {
                    *watched = Some(*attempt);
                }
                Step::Wait
            }
            Phase::Evicting { then_load, .. } => {
                if let Some((next, attempt)) = then_load {
                    if next.id == variant.id {
                        *watched = Some(*attempt);
                    }
                }
                Step::Wait
            }
            Phase::Ready(_) | Phase::Unloaded => match &st.pending {
                Some(pending) => {
                    if pending.target.id == variant.id {
                        *watched = Some(pending.attempt);
                    }
                    Step::Wait
                }
                // Callers that waited for the resident load are served first.
                None if contested => Step::Wait,
                None => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                    st.pending = Some(PendingSwap {
                        target: variant.clone(),
                        attempt,
                    });
                    *watched = Some(attempt);
                    Step::Drive(attempt)
                }
            },
        }
    }

    /// Wait for a slot to become evictable, evict it, and report leases left behind.
    async fn retire(&self, slot: Arc<Slot<B::Payload>>, deadline: Instant) -> usize {
        loop {
            let mut events = slot.subscribe();
            let outgoing = {
                let mut st = slot.state.lock();
                if matches!(st.phase, Phase::Unloaded) {
                    return 0;
                }
                if st.lease_count() == 0 {
                    st.begin_eviction(None)
                } else {
                    None
                }
            };

            if let Some(resident) = outgoing {
                slot.notify();
                self.evict(&slot, resident, EvictionReason::Shutdown).await;
                slot.state.lock().phase = Phase::Unloaded;
                slot.notify();
                return 0;
            }

            if tokio::time::timeout_at(deadline, events.changed()).await.is_err() {
                return slot.state.lock().lease_count();
            }
        }
    }
}

/// Owns the resident-model state for one device.
///
/// Cloning is cheap; all clones share the same slots and sweeper.
pub struct LifecycleManager<B: ModelBackend> {
    core: Arc<Core<B>>,
}

impl<B: ModelBackend> Clone for LifecycleManager<B> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<B: ModelBackend> LifecycleManager<B> {
    /// Create a manager with every slot UNLOADED and start its idle sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(registry: Arc<ModelRegistry>, backend: B, config: LifecycleConfig) -> Self {
        let wake = Arc::new(Notify::new());
        let slots = config
            .slot_policy
            .slots()
            .into_iter()
            .map(|key: SlotKey| Arc::new(Slot::new(key, config.idle_timeout, wake.clone())))
            .collect();

        let core = Arc::new(Core {
            registry,
            backend: Arc::new(backend),
            config,
            slots,
            counters: Counters::default(),
            fault: Mutex::new(None),
            next_handle: AtomicU64::new(1),
            next_lease: AtomicU64::new(1),
            next_attempt: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });

        let task = spawn_sweeper(Arc::downgrade(&core), wake, core.cancel.clone());
        *core.sweeper.lock() = Some(task);

        info!(
            policy = core.config.slot_policy.as_str(),
            slots = core.slots.len(),
            idle_timeout_secs = core.config.idle_timeout.as_secs(),
            variants = core.registry.len(),
            "model lifecycle manager started"
        );

        Self { core }
    }

    /// Get a lease on `variant_id`, loading or swapping it in if needed.
    ///
    /// Returns immediately when the variant is already READY and no swap is
    /// pending on its slot. Otherwise waits, bounded by `timeout`, for
    /// outstanding leases on the outgoing handle to drain and for the load.
    pub async fn acquire(
        &self,
        variant_id: &str,
        timeout: Duration,
    ) -> Result<Lease<B::Payload>, LifecycleError> {
        let result = self.core.acquire(variant_id, timeout).await;
        if let Err(err) = &result {
            telemetry::record_acquire_failure(err.kind());
            debug!(variant = variant_id, error = %err, "acquire failed");
        }
        result
    }

    /// Give a lease back. Releasing the same lease twice is rejected.
    pub fn release(&self, lease: &Lease<B::Payload>) -> Result<(), LifecycleError> {
        lease.release()
    }

    /// Evict whatever is due right now instead of waiting for the sweeper.
    pub async fn sweep(&self) {
        self.core.sweep().await;
    }

    /// Stop admitting acquisitions, drain leases and evict every resident handle.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        let deadline = deadline_after(Instant::now(), timeout);
        for slot in &self.core.slots {
            {
                let mut st = slot.state.lock();
                st.closed = true;
                st.pending = None;
            }
            slot.notify();
        }

        let retiring = self
            .core
            .slots
            .iter()
            .map(|slot| self.core.retire(slot.clone(), deadline));
        let remaining: usize = join_all(retiring).await.into_iter().sum();

        self.core.cancel.cancel();
        if let Some(task) = self.core.sweeper.lock().take() {
            task.abort();
        }

        info!(remaining, "model lifecycle manager stopped");
        if remaining == 0 {
            ShutdownResult::Complete
        } else {
            ShutdownResult::Timeout {
                remaining: remaining as u32,
            }
        }
    }

    pub fn status(&self) -> Vec<SlotStatus> {
        let now = Instant::now();
        let ms = |d: Duration| d.as_millis() as u64;

        self.core
            .slots
            .iter()
            .map(|slot| {
                let st = slot.state.lock();
                let mut status = SlotStatus {
                    slot: slot.key.to_string(),
                    state: st.phase.state(),
                    variant: None,
                    handle: None,
                    leases: 0,
                    resident_ms: None,
                    idle_ms: None,
                    evicts_in_ms: None,
                    swap_pending: st.pending.as_ref().map(|p| p.target.id.clone()),
                };
                match &st.phase {
                    Phase::Ready(resident) => {
                        status.variant = Some(resident.variant.id.clone());
                        status.handle = Some(resident.id.id());
                        status.leases = resident.leases.len();
                        status.resident_ms = Some(ms(now.saturating_duration_since(resident.loaded_at)));
                        status.idle_ms = Some(ms(now.saturating_duration_since(resident.last_used)));
                        status.evicts_in_ms =
                            st.idle_deadline.map(|at| ms(at.saturating_duration_since(now)));
                    }
                    Phase::Loading { variant, .. } | Phase::Evicting { variant, .. } => {
                        status.variant = Some(variant.id.clone());
                    }
                    Phase::Unloaded => {}
                }
                status
            })
            .collect()
    }

    pub fn stats(&self) -> LifecycleStats {
        self.core.counters.snapshot()
    }

    /// True if `variant_id` is READY in its slot.
    pub fn is_resident(&self, variant_id: &str) -> bool {
        self.core.slots.iter().any(|slot| {
            matches!(&slot.state.lock().phase, Phase::Ready(r) if r.variant.id == variant_id)
        })
    }

    pub fn resident_variants(&self) -> Vec<String> {
        self.core
            .slots
            .iter()
            .filter_map(|slot| match &slot.state.lock().phase {
                Phase::Ready(resident) => Some(resident.variant.id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn outstanding_leases(&self) -> usize {
        self.core.slots.iter().map(|slot| slot.state.lock().lease_count()).sum()
    }

    /// Reason the device was marked failed, if it was.
    pub fn device_fault(&self) -> Option<String> {
        self.core.fault.lock().clone()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.core.registry
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.core.config
    }

    pub fn backend(&self) -> &B {
        &self.core.backend
    }
}
