//! Tests for the inference gate and the runtime's synthesize path.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{fast_config, manager_with, CountingBackend, TIMEOUT};
use vox_core::health::HealthState;
use vox_core::models::{LifecycleError, ModelRegistry};
use vox_core::scheduler::InferenceGate;
use vox_core::{Runtime, RuntimeConfig};

fn runtime(backend: &CountingBackend) -> Arc<Runtime<CountingBackend>> {
    let config = RuntimeConfig {
        lifecycle: fast_config(10_000),
        request_timeout: TIMEOUT,
        shutdown_timeout: Duration::from_secs(1),
        ..RuntimeConfig::default()
    };
    Arc::new(Runtime::new(ModelRegistry::builtin(), backend.clone(), config))
}

#[tokio::test]
async fn test_gate_runs_calls_one_at_a_time() {
    let backend = CountingBackend::new();
    let runtime = runtime(&backend);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let runtime = runtime.clone();
        let active = active.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            runtime
                .synthesize("0.6b-clone", move |_model| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.gate().executed(), 4);
    assert_eq!(backend.loads(), 1);
    assert_eq!(runtime.manager().outstanding_leases(), 0);
}

#[tokio::test]
async fn test_gate_serves_waiters_in_arrival_order() {
    let backend = CountingBackend::new();
    let manager = manager_with(&backend, fast_config(10_000));
    let gate = InferenceGate::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let blocker = manager.acquire("0.6b-clone", TIMEOUT).await.unwrap();
    let first = {
        let gate = gate.clone();
        tokio::spawn(async move {
            gate.run(blocker, TIMEOUT, |_| std::thread::sleep(Duration::from_millis(60)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut waiters = Vec::new();
    for n in 1..=3 {
        let lease = manager.acquire("0.6b-clone", TIMEOUT).await.unwrap();
        let gate = gate.clone();
        let order = order.clone();
        waiters.push(tokio::spawn(async move {
            gate.run(lease, TIMEOUT, move |_| order.lock().unwrap().push(n)).await
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(gate.waiting(), 3);

    first.await.unwrap().unwrap();
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_gate_timeout_releases_lease() {
    let backend = CountingBackend::new();
    let manager = manager_with(&backend, fast_config(10_000));
    let gate = InferenceGate::new();

    let busy = manager.acquire("1.7b-clone", TIMEOUT).await.unwrap();
    let long_call = {
        let gate = gate.clone();
        tokio::spawn(async move {
            gate.run(busy, TIMEOUT, |_| std::thread::sleep(Duration::from_millis(150)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(gate.is_busy());

    let lease = manager.acquire("1.7b-clone", TIMEOUT).await.unwrap();
    assert_eq!(manager.outstanding_leases(), 2);

    let err = gate
        .run(lease, Duration::from_millis(30), |_| ())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::GateTimeout { .. }));
    assert_eq!(manager.outstanding_leases(), 1);
    assert_eq!(gate.waiting(), 0);

    long_call.await.unwrap().unwrap();
    assert_eq!(manager.outstanding_leases(), 0);
}

#[tokio::test]
async fn test_panicking_call_frees_device_and_lease() {
    let backend = CountingBackend::new();
    let manager = manager_with(&backend, fast_config(10_000));
    let gate = InferenceGate::new();

    let lease = manager.acquire("1.7b-design", TIMEOUT).await.unwrap();
    let err = gate
        .run(lease, TIMEOUT, |_| -> u32 { panic!("vocoder exploded") })
        .await
        .unwrap_err();
    assert_eq!(err, LifecycleError::InferenceFailed("vocoder exploded".into()));
    assert_eq!(manager.outstanding_leases(), 0);
    assert!(!gate.is_busy());

    let lease = manager.acquire("1.7b-design", TIMEOUT).await.unwrap();
    let variant = gate
        .run(lease, TIMEOUT, |model| model.variant.clone())
        .await
        .unwrap();
    assert_eq!(variant, "1.7b-design");
}

#[tokio::test]
async fn test_synthesize_runs_against_requested_variant() {
    let backend = CountingBackend::new();
    let runtime = runtime(&backend);

    let served = runtime
        .synthesize("0.6b-custom", |model| model.variant.clone())
        .await
        .unwrap();
    assert_eq!(served, "0.6b-custom");

    let served = runtime
        .synthesize("1.7b-custom", |model| model.variant.clone())
        .await
        .unwrap();
    assert_eq!(served, "1.7b-custom");
    assert_eq!(backend.max_live(), 1);

    let report = runtime.health();
    assert_eq!(report.state, HealthState::Healthy);
    assert_eq!(report.resident_models, vec!["1.7b-custom".to_string()]);
    assert_eq!(report.outstanding_leases, 0);
    assert_eq!(report.stats.swaps, 1);
}

#[tokio::test]
async fn test_synthesize_unknown_variant() {
    let backend = CountingBackend::new();
    let runtime = runtime(&backend);

    let err = runtime.synthesize("3b-clone", |_| ()).await.unwrap_err();
    assert_eq!(err, LifecycleError::UnknownVariant("3b-clone".into()));
    assert_eq!(backend.loads(), 0);
}

#[tokio::test]
async fn test_runtime_shutdown_rejects_new_requests() {
    let backend = CountingBackend::new();
    let runtime = runtime(&backend);

    runtime.warm("1.7b-clone").await.unwrap();
    assert!(runtime.shutdown().await.is_complete());
    assert_eq!(backend.live(), 0);

    let err = runtime.synthesize("1.7b-clone", |_| ()).await.unwrap_err();
    assert_eq!(err, LifecycleError::ShuttingDown);

    let report = runtime.health();
    assert_eq!(report.state, HealthState::Unhealthy);
    assert!(!report.accepting_requests);
}

#[tokio::test]
async fn test_lost_device_reports_unhealthy() {
    let backend = CountingBackend::new();
    backend.lose_device();
    let runtime = runtime(&backend);

    let err = runtime.synthesize("1.7b-clone", |_| ()).await.unwrap_err();
    assert!(err.is_fatal());

    let report = runtime.health();
    assert_eq!(report.state, HealthState::Unhealthy);
    assert!(report.device_fault.is_some());
    assert!(!report.ready);
}

#[tokio::test]
async fn test_abandoned_gate_waiter_releases_lease_and_device() {
    let backend = CountingBackend::new();
    let manager = manager_with(&backend, fast_config(10_000));
    let gate = InferenceGate::new();

    let busy = manager.acquire("0.6b-clone", TIMEOUT).await.unwrap();
    let long_call = {
        let gate = gate.clone();
        tokio::spawn(async move {
            gate.run(busy, TIMEOUT, |_| std::thread::sleep(Duration::from_millis(100)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let lease = manager.acquire("0.6b-clone", TIMEOUT).await.unwrap();
    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.run(lease, TIMEOUT, |_| ()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gate.waiting(), 1);
    assert_eq!(manager.outstanding_leases(), 2);

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert_eq!(gate.waiting(), 0);
    assert_eq!(manager.outstanding_leases(), 1);

    long_call.await.unwrap().unwrap();
    assert!(!gate.is_busy());
    assert_eq!(manager.outstanding_leases(), 0);
    assert_eq!(gate.executed(), 1);

    let lease = manager.acquire("0.6b-clone", TIMEOUT).await.unwrap();
    gate.run(lease, TIMEOUT, |_| ()).await.unwrap();
    assert_eq!(gate.executed(), 2);
}

#[tokio::test]
async fn test_unbounded_request_timeouts_are_accepted() {
    let backend = CountingBackend::new();
    let config = RuntimeConfig {
        lifecycle: fast_config(10_000),
        request_timeout: Duration::MAX,
        shutdown_timeout: Duration::MAX,
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::new(ModelRegistry::builtin(), backend.clone(), config);

    let serial = runtime.synthesize("1.7b-clone", |model| model.serial).await.unwrap();
    assert_eq!(serial, 0);

    let lease = runtime.manager().acquire("1.7b-clone", Duration::MAX).await.unwrap();
    runtime.gate().run(lease, Duration::MAX, |_| ()).await.unwrap();

    assert!(runtime.shutdown().await.is_complete());
    assert_eq!(backend.unloads(), 1);
}
