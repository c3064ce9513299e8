//! Health reporting for the synthesis runtime.
//!
//! Provides liveness, readiness, and a full report covering slot states,
//! outstanding leases, the inference gate backlog and device faults.

use std::time::Instant;

use serde::Serialize;

use crate::models::{LifecycleStats, SlotStatus};
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Everything a health report is computed from.
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub shutdown: ShutdownState,
    pub device_fault: Option<String>,
    pub slots: Vec<SlotStatus>,
    pub gate_waiting: usize,
    pub in_flight: u32,
    pub stats: LifecycleStats,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_requests: bool,
    pub device_fault: Option<String>,
    pub resident_models: Vec<String>,
    pub outstanding_leases: usize,
    pub gate_waiting: usize,
    pub in_flight: u32,
    pub slots: Vec<SlotStatus>,
    pub stats: LifecycleStats,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Gate backlog at which the runtime reports itself degraded.
    pub max_gate_waiting: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_gate_waiting: 64,
        }
    }
}

pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Ready to accept synthesis requests.
    pub fn is_ready(&self, inputs: &HealthInputs) -> bool {
        inputs.shutdown == ShutdownState::Running && inputs.device_fault.is_none()
    }

    pub fn report(&self, inputs: HealthInputs) -> HealthReport {
        let ready = self.is_ready(&inputs);
        let state = self.compute_state(&inputs);
        let resident_models = inputs
            .slots
            .iter()
            .filter(|slot| slot.state == crate::models::HandleState::Ready)
            .filter_map(|slot| slot.variant.clone())
            .collect();
        let outstanding_leases = inputs.slots.iter().map(|slot| slot.leases).sum();

        HealthReport {
            state,
            ready,
            accepting_requests: inputs.shutdown == ShutdownState::Running,
            device_fault: inputs.device_fault,
            resident_models,
            outstanding_leases,
            gate_waiting: inputs.gate_waiting,
            in_flight: inputs.in_flight,
            slots: inputs.slots,
            stats: inputs.stats,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, inputs: &HealthInputs) -> HealthState {
        if inputs.shutdown != ShutdownState::Running || inputs.device_fault.is_some() {
            return HealthState::Unhealthy;
        }
        if inputs.gate_waiting >= self.config.max_gate_waiting {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
