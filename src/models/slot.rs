//! Device budget slots.
//!
//! A slot holds the single phase value for one memory-budget slot. Every
//! transition, lease-count change and idle-timer rearm happens under the
//! slot mutex, so a sweep eviction and a swap eviction can never both claim
//! the same READY handle. The mutex is never held across an await; waiters
//! subscribe to the `events` channel before inspecting state so a change made
//! between inspection and sleep is never lost.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::debug;

use super::error::LifecycleError;
use super::handle::{HandleId, HandleState, ResidentModel};
use super::lease::LeaseId;
use super::registry::{FootprintClass, ModelVariant};

/// How many recent load failures a slot remembers for late waiters.
const FAILURE_HISTORY: usize = 8;

/// Stand-in for "never" when a timeout is too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`, saturating at roughly thirty years out.
pub(crate) fn deadline_after(start: Instant, after: Duration) -> Instant {
    start.checked_add(after.min(FAR_FUTURE)).unwrap_or(start)
}

/// How variants are mapped onto device budget slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotPolicy {
    /// One resident model for the whole device, whatever its size.
    #[default]
    Shared,
    /// One resident model per footprint class.
    PerFootprint,
}

impl SlotPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::PerFootprint => "per-footprint",
        }
    }

    pub fn slot_for(&self, variant: &ModelVariant) -> SlotKey {
        match self {
            Self::Shared => SlotKey::Device,
            Self::PerFootprint => SlotKey::Footprint(variant.footprint),
        }
    }

    pub fn slots(&self) -> Vec<SlotKey> {
        match self {
            Self::Shared => vec![SlotKey::Device],
            Self::PerFootprint => vec![
                SlotKey::Footprint(FootprintClass::Small),
                SlotKey::Footprint(FootprintClass::Large),
            ],
        }
    }
}

impl FromStr for SlotPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" | "single" => Ok(Self::Shared),
            "per-footprint" | "per_footprint" | "footprint" => Ok(Self::PerFootprint),
            other => Err(format!("unknown slot policy: {other}")),
        }
    }
}

/// Identifies one device budget slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Device,
    Footprint(FootprintClass),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => f.write_str("device"),
            Self::Footprint(class) => write!(f, "{class}"),
        }
    }
}

/// What currently occupies the slot.
pub(crate) enum Phase<P> {
    Unloaded,
    Loading {
        variant: Arc<ModelVariant>,
        attempt: u64,
    },
    Ready(ResidentModel<P>),
    Evicting {
        variant: Arc<ModelVariant>,
        /// Load that follows this eviction when it is part of a swap.
        then_load: Option<(Arc<ModelVariant>, u64)>,
    },
}

impl<P> Phase<P> {
    pub fn state(&self) -> HandleState {
        match self {
            Self::Unloaded => HandleState::Unloaded,
            Self::Loading { .. } => HandleState::Loading,
            Self::Ready(_) => HandleState::Ready,
            Self::Evicting { .. } => HandleState::Evicting,
        }
    }
}

/// A swap that has claimed the slot and is draining the outgoing handle.
pub(crate) struct PendingSwap {
    pub target: Arc<ModelVariant>,
    pub attempt: u64,
}

pub(crate) struct FailedLoad {
    pub attempt: u64,
    pub variant: String,
    pub reason: String,
}

pub(crate) struct SlotState<P> {
    pub phase: Phase<P>,
    pub pending: Option<PendingSwap>,
    pub failures: VecDeque<FailedLoad>,
    /// Idle timer: eviction is due once this passes with zero leases.
    pub idle_deadline: Option<Instant>,
    /// Callers currently inside `acquire`, by variant id.
    pub interest: HashMap<String, usize>,
    pub closed: bool,
}

impl<P> SlotState<P> {
    pub fn record_failure(&mut self, attempt: u64, variant: &str, reason: String) {
        if self.failures.len() == FAILURE_HISTORY {
            self.failures.pop_front();
        }
        self.failures.push_back(FailedLoad {
            attempt,
            variant: variant.to_string(),
            reason,
        });
    }

    pub fn failure_for(&self, attempt: u64) -> Option<&FailedLoad> {
        self.failures.iter().find(|f| f.attempt == attempt)
    }

    /// True if callers are waiting on the variant currently READY.
    pub fn resident_contested(&self) -> bool {
        match &self.phase {
            Phase::Ready(resident) => self.interest.contains_key(&resident.variant.id),
            _ => false,
        }
    }

    pub fn lease_count(&self) -> usize {
        match &self.phase {
            Phase::Ready(handle) => handle.leases.len(),
            _ => 0,
        }
    }

    /// READY → EVICTING. Returns the outgoing handle, or None if nothing is READY.
    ///
    /// This is the only way a handle leaves READY; sweep, swap and shutdown
    /// all go through it while holding the slot lock.
    pub fn begin_eviction(
        &mut self,
        then_load: Option<(Arc<ModelVariant>, u64)>,
    ) -> Option<ResidentModel<P>> {
        let variant = match &self.phase {
            Phase::Ready(resident) => resident.variant.clone(),
            _ => return None,
        };
        self.idle_deadline = None;
        match std::mem::replace(&mut self.phase, Phase::Evicting { variant, then_load }) {
            Phase::Ready(resident) => Some(resident),
            _ => None,
        }
    }
}

pub(crate) struct Slot<P> {
    pub key: SlotKey,
    pub state: Mutex<SlotState<P>>,
    events: watch::Sender<u64>,
    sweeper: Arc<Notify>,
    pub idle_after: Duration,
}

impl<P> Slot<P> {
    pub fn new(key: SlotKey, idle_after: Duration, sweeper: Arc<Notify>) -> Self {
        let (events, _) = watch::channel(0);
        Self {
            key,
            state: Mutex::new(SlotState {
                phase: Phase::Unloaded,
                pending: None,
                failures: VecDeque::new(),
                idle_deadline: None,
                interest: HashMap::new(),
                closed: false,
            }),
            events,
            sweeper,
            idle_after,
        }
    }

    /// Subscribe before inspecting state; see module docs.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.events.subscribe()
    }

    /// Wake everyone waiting on this slot.
    pub fn notify(&self) {
        self.events.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Wake the idle sweeper so it recomputes its next deadline.
    pub fn wake_sweeper(&self) {
        self.sweeper.notify_one();
    }

    /// Record that a caller is acquiring `variant` until the guard drops.
    pub fn register_interest(self: &Arc<Self>, variant: &str) -> Interest<P> {
        *self.state.lock().interest.entry(variant.to_string()).or_insert(0) += 1;
        Interest {
            slot: self.clone(),
            variant: variant.to_string(),
        }
    }

    /// Drop one outstanding lease; arms the idle timer at zero.
    pub fn release(&self, lease: LeaseId, handle: HandleId) -> Result<(), LifecycleError> {
        let drained = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            match &mut st.phase {
                Phase::Ready(resident) if resident.id == handle => {
                    if resident.leases.remove(&lease).is_none() {
                        return Err(LifecycleError::LeaseExpired(lease));
                    }
                    let drained = resident.leases.is_empty();
                    if drained {
                        st.idle_deadline = Some(deadline_after(Instant::now(), self.idle_after));
                    }
                    drained
                }
                _ => return Err(LifecycleError::LeaseExpired(lease)),
            }
        };

        if drained {
            debug!(slot = %self.key, "last lease released, idle timer armed");
            self.wake_sweeper();
        }
        self.notify();
        Ok(())
    }

    /// Mark a lease as executing and hand out the payload.
    pub fn checkout(&self, lease: LeaseId, handle: HandleId) -> Result<Arc<P>, LifecycleError> {
        let mut guard = self.state.lock();
        match &mut guard.phase {
            Phase::Ready(resident) if resident.id == handle => {
                let entry = resident
                    .leases
                    .get_mut(&lease)
                    .ok_or(LifecycleError::LeaseExpired(lease))?;
                entry.in_use = true;
                resident.last_used = Instant::now();
                Ok(resident.payload.clone())
            }
            _ => Err(LifecycleError::LeaseExpired(lease)),
        }
    }

    /// Clear the executing mark set by `checkout`.
    pub fn checkin(&self, lease: LeaseId, handle: HandleId) {
        let overdue = {
            let mut guard = self.state.lock();
            match &mut guard.phase {
                Phase::Ready(resident) if resident.id == handle => {
                    match resident.leases.get_mut(&lease) {
                        Some(entry) => {
                            entry.in_use = false;
                            entry.deadline <= Instant::now()
                        }
                        None => false,
                    }
                }
                _ => false,
            }
        };
        if overdue {
            self.wake_sweeper();
        }
    }
}

/// An in-progress acquisition. A swap away from a READY variant waits until
/// no caller is still interested in it.
pub(crate) struct Interest<P> {
    slot: Arc<Slot<P>>,
    variant: String,
}

impl<P> Drop for Interest<P> {
    fn drop(&mut self) {
        {
            let mut st = self.slot.state.lock();
            if let Some(count) = st.interest.get_mut(&self.variant) {
                *count -= 1;
                if *count == 0 {
                    st.interest.remove(&self.variant);
                }
            }
        }
        self.slot.notify();
    }
}
