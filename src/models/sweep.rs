//! Idle sweeper and lease reclamation.

use std::sync::{Arc, Weak};

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backend::ModelBackend;
use super::handle::{EvictionReason, ResidentModel};
use super::manager::{Core, Counters};
use super::slot::{deadline_after, Phase, Slot};
use crate::telemetry;

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

impl<B: ModelBackend> Core<B> {
    /// Reclaim overdue leases and evict handles whose idle timer has fired.
    ///
    /// Returns the next instant at which something becomes due.
    pub(crate) async fn sweep(&self) -> Option<Instant> {
        let mut next = None;
        let mut due = Vec::new();

        for slot in &self.slots {
            let now = Instant::now();
            let mut reclaimed = Vec::new();
            let mut variant_id = String::new();

            let outgoing = {
                let mut guard = slot.state.lock();
                let st = &mut *guard;

                if let Phase::Ready(resident) = &mut st.phase {
                    resident.leases.retain(|id, entry| {
                        let keep = entry.in_use || entry.deadline > now;
                        if !keep {
                            reclaimed.push(*id);
                        }
                        keep
                    });
                    if !reclaimed.is_empty() {
                        variant_id = resident.variant.id.clone();
                        if resident.leases.is_empty() {
                            st.idle_deadline = Some(deadline_after(now, slot.idle_after));
                        }
                    }
                }

                let idle_due = st.pending.is_none()
                    && !st.closed
                    && st.lease_count() == 0
                    && st.idle_deadline.is_some_and(|at| at <= now);

                if idle_due {
                    st.begin_eviction(None)
                } else {
                    let reclaim_at = match &st.phase {
                        Phase::Ready(resident) => resident.next_reclaim_deadline(),
                        _ => None,
                    };
                    let idle_at = if st.pending.is_none() && st.lease_count() == 0 {
                        st.idle_deadline
                    } else {
                        None
                    };
                    next = earliest(next, earliest(reclaim_at, idle_at));
                    None
                }
            };

            for lease in &reclaimed {
                Counters::bump(&self.counters.leases_reclaimed);
                telemetry::record_lease_reclaimed(&variant_id);
                warn!(slot = %slot.key, lease = %lease, variant = %variant_id, "lease outlived its deadline, reclaimed");
            }
            if !reclaimed.is_empty() {
                slot.notify();
            }

            if let Some(resident) = outgoing {
                slot.notify();
                debug!(slot = %slot.key, variant = %resident.variant.id, "idle timeout elapsed");
                due.push(self.evict_idle(slot, resident));
            }
        }

        // Unloads of different slots run side by side.
        join_all(due).await;
        next
    }

    async fn evict_idle(
        &self,
        slot: &Arc<Slot<B::Payload>>,
        resident: ResidentModel<B::Payload>,
    ) {
        self.evict(slot, resident, EvictionReason::Idle).await;
        {
            let mut st = slot.state.lock();
            if matches!(st.phase, Phase::Evicting { .. }) {
                st.phase = Phase::Unloaded;
            }
        }
        slot.notify();
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Background task that runs `sweep` whenever something may have become due.
///
/// Holds only a weak reference, so it never keeps the manager alive.
pub(crate) fn spawn_sweeper<B: ModelBackend>(
    core: Weak<Core<B>>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = {
                let Some(core) = core.upgrade() else { break };
                core.sweep().await
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake.notified() => {}
                _ = wait_until(next) => {}
            }
        }
        debug!("idle sweeper stopped");
    })
}
