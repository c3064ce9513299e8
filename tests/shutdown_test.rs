//! Tests for graceful shutdown of the synthesis runtime.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, CountingBackend, TIMEOUT};
use tokio_test::{assert_err, assert_ok};
use vox_core::models::{LifecycleError, ModelRegistry};
use vox_core::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use vox_core::{Runtime, RuntimeConfig};

fn runtime(backend: &CountingBackend, shutdown_ms: u64) -> Arc<Runtime<CountingBackend>> {
    let config = RuntimeConfig {
        lifecycle: fast_config(10_000),
        request_timeout: TIMEOUT,
        shutdown_timeout: Duration::from_millis(shutdown_ms),
        ..RuntimeConfig::default()
    };
    Arc::new(Runtime::new(ModelRegistry::builtin(), backend.clone(), config))
}

#[tokio::test]
async fn test_initial_state_is_running() {
    let coordinator = ShutdownCoordinator::new();
    assert_eq!(coordinator.state(), ShutdownState::Running);
    assert!(coordinator.is_accepting());
}

#[tokio::test]
async fn test_multiple_guards_track_correctly() {
    let coordinator = ShutdownCoordinator::new();

    let g1 = coordinator.track();
    let g2 = coordinator.track();
    let g3 = coordinator.track();
    assert_eq!(coordinator.in_flight_count(), 3);

    drop(g1);
    assert_eq!(coordinator.in_flight_count(), 2);

    drop(g2);
    drop(g3);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_synthesis() {
    let backend = CountingBackend::new();
    let runtime = runtime(&backend, 2_000);

    let request = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            runtime
                .synthesize("1.7b-clone", |model| {
                    std::thread::sleep(Duration::from_millis(80));
                    model.serial
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = runtime.shutdown().await;
    assert_eq!(result, ShutdownResult::Complete);
    assert_ok!(request.await.unwrap());
    assert_eq!(backend.unloads(), 1);
    assert_eq!(backend.live(), 0);
}

#[tokio::test]
async fn test_requests_after_shutdown_are_rejected() {
    let backend = CountingBackend::new();
    let runtime = runtime(&backend, 500);

    assert!(runtime.shutdown().await.is_complete());

    let result = runtime.synthesize("0.6b-clone", |_| ()).await;
    assert_err!(&result);
    assert_eq!(result.unwrap_err(), LifecycleError::ShuttingDown);
    assert_eq!(backend.loads(), 0);
}

#[tokio::test]
async fn test_shutdown_timeout_reports_remaining() {
    let backend = CountingBackend::new();
    let runtime = runtime(&backend, 50);

    let request = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            runtime
                .synthesize("0.6b-clone", |_| std::thread::sleep(Duration::from_millis(300)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = runtime.shutdown().await;
    assert!(matches!(result, ShutdownResult::Timeout { .. }));
    assert_ok!(request.await.unwrap());
}
