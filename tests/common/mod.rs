//! Shared fixtures for lifecycle integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vox_core::models::{
    LifecycleConfig, LifecycleManager, LoadError, ModelBackend, ModelRegistry, ModelVariant,
    SlotPolicy,
};

/// Stand-in for a device-resident model.
#[derive(Debug)]
pub struct FakeModel {
    pub variant: String,
    pub serial: u64,
}

#[derive(Default)]
struct Inner {
    loads: AtomicUsize,
    unloads: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    serial: AtomicU64,
    fatal: AtomicBool,
    failing: Mutex<HashSet<String>>,
    load_delay: Mutex<Duration>,
    unload_delay: Mutex<Duration>,
    events: Mutex<Vec<String>>,
}

/// In-memory backend that counts loads and unloads.
#[derive(Clone, Default)]
pub struct CountingBackend {
    inner: Arc<Inner>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(delay: Duration) -> Self {
        let backend = Self::new();
        *backend.inner.load_delay.lock().unwrap() = delay;
        backend
    }

    pub fn set_unload_delay(&self, delay: Duration) {
        *self.inner.unload_delay.lock().unwrap() = delay;
    }

    pub fn fail_loads_of(&self, variant: &str) {
        self.inner.failing.lock().unwrap().insert(variant.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner.failing.lock().unwrap().clear();
    }

    /// Make every later load report a lost device.
    pub fn lose_device(&self) {
        self.inner.fatal.store(true, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.inner.unloads.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Most models ever resident at once.
    pub fn max_live(&self) -> usize {
        self.inner.max_live.load(Ordering::SeqCst)
    }

    /// "load:<id>" / "unload:<id>" in call order.
    pub fn events(&self) -> Vec<String> {
        self.inner.events.lock().unwrap().clone()
    }
}

impl ModelBackend for CountingBackend {
    type Payload = FakeModel;

    fn load(&self, variant: &ModelVariant) -> Result<FakeModel, LoadError> {
        let delay = *self.inner.load_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.inner.fatal.load(Ordering::SeqCst) {
            return Err(LoadError::DeviceLost("accelerator fell off the bus".into()));
        }
        if self.inner.failing.lock().unwrap().contains(&variant.id) {
            return Err(LoadError::Backend(format!("weights for {} are corrupt", variant.id)));
        }

        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_live.fetch_max(live, Ordering::SeqCst);
        self.inner.events.lock().unwrap().push(format!("load:{}", variant.id));

        Ok(FakeModel {
            variant: variant.id.clone(),
            serial: self.inner.serial.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn unload(&self, variant: &ModelVariant, _payload: FakeModel) {
        let delay = *self.inner.unload_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.inner.unloads.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        self.inner.events.lock().unwrap().push(format!("unload:{}", variant.id));
    }
}

/// Durations scaled down so tests run in milliseconds.
pub fn fast_config(idle_ms: u64) -> LifecycleConfig {
    LifecycleConfig {
        idle_timeout: Duration::from_millis(idle_ms),
        max_lease_lifetime: Duration::from_secs(60),
        slot_policy: SlotPolicy::Shared,
    }
}

pub fn manager_with(
    backend: &CountingBackend,
    config: LifecycleConfig,
) -> LifecycleManager<CountingBackend> {
    LifecycleManager::new(Arc::new(ModelRegistry::builtin()), backend.clone(), config)
}

pub const TIMEOUT: Duration = Duration::from_secs(2);
