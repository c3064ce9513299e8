//! VOX CORE model lifecycle runtime
//!
//! Keeps text-to-speech model variants resident on a single accelerator only
//! while they are needed. Requests name a variant; the runtime loads it on
//! demand, swaps it with whatever is resident when a different one is asked
//! for, evicts it after an idle period, and runs inference calls on the
//! device one at a time.
//!
//! # Components
//!
//! - **Registry**: static table mapping variant ids to sources and footprints
//! - **Lifecycle manager**: per-slot state machine, leases and idle sweeper
//! - **Inference gate**: FIFO mutual exclusion for device execution
//!
//! The HTTP layer, audio encoding and the synthesis kernels themselves live
//! outside this crate; callers provide the synthesis closure.

pub mod cli;
pub mod config;
pub mod health;
pub mod memory;
pub mod models;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, Span};
use uuid::Uuid;

use config::EnvConfig;
use health::{HealthChecker, HealthConfig, HealthInputs, HealthReport};
use models::{HandleId, LifecycleConfig, LifecycleError, LifecycleManager, ModelBackend, ModelRegistry};
use scheduler::InferenceGate;
use shutdown::{ShutdownCoordinator, ShutdownResult};
use telemetry::{SpanExt, SynthesisSpan};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub lifecycle: LifecycleConfig,
    /// Bound on acquire plus the wait for the device, per request.
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub health: HealthConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            request_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            health: HealthConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env(env: &EnvConfig) -> Self {
        Self {
            lifecycle: env.lifecycle_config(),
            request_timeout: env.acquire_timeout,
            shutdown_timeout: env.shutdown_timeout,
            health: HealthConfig::default(),
        }
    }
}

/// The synthesis runtime: registry, lifecycle manager and inference gate.
pub struct Runtime<B: ModelBackend> {
    manager: LifecycleManager<B>,
    gate: InferenceGate,
    shutdown: ShutdownCoordinator,
    health: HealthChecker,
    config: RuntimeConfig,
}

impl<B: ModelBackend> Runtime<B> {
    /// Create a runtime. Must be called from within a Tokio runtime.
    pub fn new(registry: ModelRegistry, backend: B, config: RuntimeConfig) -> Self {
        telemetry::describe_metrics();
        let manager = LifecycleManager::new(Arc::new(registry), backend, config.lifecycle.clone());
        Self {
            manager,
            gate: InferenceGate::new(),
            shutdown: ShutdownCoordinator::new(),
            health: HealthChecker::new(config.health.clone()),
            config,
        }
    }

    /// Run one synthesis call against `variant_id`.
    ///
    /// Acquires a lease (loading or swapping as needed), waits for the
    /// device, runs `work` on the blocking pool and releases the lease. The
    /// whole request is bounded by `request_timeout`.
    pub async fn synthesize<T, F>(&self, variant_id: &str, work: F) -> Result<T, LifecycleError>
    where
        T: Send + 'static,
        F: FnOnce(&B::Payload) -> T + Send + 'static,
    {
        let _in_flight = self.shutdown.track().ok_or(LifecycleError::ShuttingDown)?;
        let request_id = Uuid::new_v4().to_string();
        let span = SynthesisSpan::new(&request_id, variant_id);
        let started = Instant::now();
        let deadline = models::deadline_after(started, self.config.request_timeout);

        let result = async {
            let lease = self.manager.acquire(variant_id, self.config.request_timeout).await?;
            Span::current().record_lease(&lease);
            self.gate.run_until(lease, deadline, work).await
        }
        .instrument(span.clone())
        .await;

        span.record_outcome(&result, started);
        result
    }

    /// Make `variant_id` resident without running inference.
    pub async fn warm(&self, variant_id: &str) -> Result<HandleId, LifecycleError> {
        let lease = self.manager.acquire(variant_id, self.config.request_timeout).await?;
        let handle = lease.handle();
        self.manager.release(&lease)?;
        Ok(handle)
    }

    /// Stop admitting requests, wait for in-flight ones, then evict every model.
    pub async fn shutdown(&self) -> ShutdownResult {
        let deadline = models::deadline_after(Instant::now(), self.config.shutdown_timeout);
        let drained = self.shutdown.initiate(self.config.shutdown_timeout).await;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let evicted = self.manager.shutdown(remaining).await;
        drained.and(evicted)
    }

    pub fn health(&self) -> HealthReport {
        self.health.report(HealthInputs {
            shutdown: self.shutdown.state(),
            device_fault: self.manager.device_fault(),
            slots: self.manager.status(),
            gate_waiting: self.gate.waiting(),
            in_flight: self.shutdown.in_flight_count(),
            stats: self.manager.stats(),
        })
    }

    pub fn manager(&self) -> &LifecycleManager<B> {
        &self.manager
    }

    pub fn gate(&self) -> &InferenceGate {
        &self.gate
    }

    pub fn registry(&self) -> &ModelRegistry {
        self.manager.registry()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}
