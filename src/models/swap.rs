//! Swap, load and eviction transitions.
//!
//! Orchestrates drain, evict and load for one slot. The acquiring caller
//! drives the drain; once the slot is claimed the transition runs on its own
//! task, so a caller that gives up never strands a slot in LOADING.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backend::{LoadError, ModelBackend};
use super::handle::{EvictionReason, HandleId, ResidentModel};
use super::manager::{Core, Counters};
use super::registry::ModelVariant;
use super::slot::{deadline_after, Phase, Slot};
use crate::telemetry;

enum Drain<P> {
    /// The pending claim was cleared by someone else (shutdown).
    Abandoned,
    Waiting(usize),
    Done(Option<ResidentModel<P>>),
}

/// Clears a pending swap claim if the claiming caller stops driving it.
struct PendingGuard<'a, P> {
    slot: &'a Slot<P>,
    attempt: u64,
    armed: bool,
}

impl<P> Drop for PendingGuard<'_, P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut st = self.slot.state.lock();
            if st.pending.as_ref().is_some_and(|p| p.attempt == self.attempt) {
                st.pending = None;
                if st.lease_count() == 0 && matches!(st.phase, Phase::Ready(_)) {
                    st.idle_deadline = Some(deadline_after(Instant::now(), self.slot.idle_after));
                }
            }
        }
        self.slot.notify();
        self.slot.wake_sweeper();
    }
}

impl<B: ModelBackend> Core<B> {
    /// Drain the slot for a claimed swap and start the transition:
    /// 1. Wait until the outgoing handle has no outstanding leases
    /// 2. Move it READY → EVICTING (or the empty slot to LOADING)
    /// 3. Hand evict + load to a background task
    ///
    /// Returns false if `deadline` passed before the drain finished. The
    /// pending claim is dropped in that case and the slot is left as it was.
    pub(crate) async fn drive_swap(
        self: &Arc<Self>,
        slot: &Arc<Slot<B::Payload>>,
        variant: &Arc<ModelVariant>,
        attempt: u64,
        deadline: Instant,
    ) -> bool {
        let mut guard = PendingGuard {
            slot: slot.as_ref(),
            attempt,
            armed: true,
        };

        loop {
            let mut events = slot.subscribe();
            let drain = {
                let mut state = slot.state.lock();
                let st = &mut *state;
                if !st.pending.as_ref().is_some_and(|p| p.attempt == attempt) {
                    Drain::Abandoned
                } else {
                    match &st.phase {
                        Phase::Ready(resident) if !resident.leases.is_empty() => {
                            Drain::Waiting(resident.leases.len())
                        }
                        Phase::Ready(_) => {
                            st.pending = None;
                            Drain::Done(st.begin_eviction(Some((variant.clone(), attempt))))
                        }
                        Phase::Unloaded => {
                            st.pending = None;
                            st.phase = Phase::Loading {
                                variant: variant.clone(),
                                attempt,
                            };
                            Drain::Done(None)
                        }
                        Phase::Loading { .. } | Phase::Evicting { .. } => Drain::Waiting(0),
                    }
                }
            };

            match drain {
                Drain::Abandoned => {
                    guard.armed = false;
                    return true;
                }
                Drain::Done(outgoing) => {
                    guard.armed = false;
                    slot.notify();
                    self.spawn_transition(slot.clone(), outgoing, variant.clone(), attempt);
                    return true;
                }
                Drain::Waiting(leases) => {
                    if leases > 0 {
                        debug!(
                            slot = %slot.key,
                            target = %variant.id,
                            leases,
                            "waiting for outstanding leases before swap"
                        );
                    }
                    if tokio::time::timeout_at(deadline, events.changed()).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn spawn_transition(
        self: &Arc<Self>,
        slot: Arc<Slot<B::Payload>>,
        outgoing: Option<ResidentModel<B::Payload>>,
        variant: Arc<ModelVariant>,
        attempt: u64,
    ) {
        let core = self.clone();
        tokio::spawn(async move {
            if let Some(resident) = outgoing {
                Counters::bump(&core.counters.swaps);
                info!(
                    slot = %slot.key,
                    from = %resident.variant.id,
                    to = %variant.id,
                    "swapping resident model"
                );
                core.evict(&slot, resident, EvictionReason::Swap).await;
                slot.state.lock().phase = Phase::Loading {
                    variant: variant.clone(),
                    attempt,
                };
                slot.notify();
            }
            core.load(&slot, variant, attempt).await;
        });
    }

    /// LOADING → READY on success, LOADING → UNLOADED on failure.
    async fn load(&self, slot: &Slot<B::Payload>, variant: Arc<ModelVariant>, attempt: u64) {
        let backend = self.backend.clone();
        let target = variant.clone();
        let started = Instant::now();
        let result = tokio::task::spawn_blocking(move || backend.load(&target))
            .await
            .unwrap_or_else(|join| Err(LoadError::Backend(format!("load task failed: {join}"))));
        let elapsed = started.elapsed();
        telemetry::record_load(&variant.id, elapsed, result.is_ok());

        match result {
            Ok(payload) => {
                let handle = HandleId(self.next_handle.fetch_add(1, Ordering::SeqCst));
                {
                    let now = Instant::now();
                    let mut st = slot.state.lock();
                    st.phase = Phase::Ready(ResidentModel::new(handle, variant.clone(), payload, now));
                    st.idle_deadline = Some(deadline_after(now, slot.idle_after));
                }
                Counters::bump(&self.counters.loads);
                info!(
                    slot = %slot.key,
                    variant = %variant.id,
                    handle = %handle,
                    load_ms = elapsed.as_millis() as u64,
                    "model ready"
                );
                slot.wake_sweeper();
            }
            Err(err) => {
                if err.is_fatal() {
                    *self.fault.lock() = Some(err.to_string());
                    error!(variant = %variant.id, error = %err, "device failure, refusing further loads");
                } else {
                    error!(variant = %variant.id, error = %err, "model load failed");
                }
                {
                    let mut st = slot.state.lock();
                    st.phase = Phase::Unloaded;
                    st.idle_deadline = None;
                    st.record_failure(attempt, &variant.id, err.to_string());
                }
                Counters::bump(&self.counters.load_failures);
            }
        }
        slot.notify();
    }

    /// Release the device memory of a handle already moved to EVICTING.
    pub(crate) async fn evict(
        &self,
        slot: &Slot<B::Payload>,
        resident: ResidentModel<B::Payload>,
        reason: EvictionReason,
    ) {
        let ResidentModel {
            id,
            variant,
            payload,
            loaded_at,
            ..
        } = resident;

        match Arc::try_unwrap(payload) {
            Ok(payload) => {
                let backend = self.backend.clone();
                let outgoing = variant.clone();
                let unloaded =
                    tokio::task::spawn_blocking(move || backend.unload(&outgoing, payload)).await;
                if let Err(err) = unloaded {
                    warn!(handle = %id, variant = %variant.id, error = %err, "unload task failed");
                }
            }
            Err(_) => {
                warn!(
                    handle = %id,
                    variant = %variant.id,
                    "payload still referenced at eviction, memory freed on last drop"
                );
            }
        }

        Counters::bump(&self.counters.evictions);
        if reason == EvictionReason::Idle {
            Counters::bump(&self.counters.idle_evictions);
        }
        telemetry::record_eviction(&variant.id, reason.as_str());
        info!(
            slot = %slot.key,
            handle = %id,
            variant = %variant.id,
            reason = reason.as_str(),
            resident_secs = loaded_at.elapsed().as_secs(),
            "model evicted"
        );
    }
}
