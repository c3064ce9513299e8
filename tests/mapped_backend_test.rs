//! End-to-end tests for the memory-mapped weights backend under the manager.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vox_core::memory::{GpuMemory, GpuMemoryConfig};
use vox_core::models::{
    LifecycleConfig, LifecycleError, LifecycleManager, MappedBackend, ModelRegistry, SlotPolicy,
    WEIGHTS_FILE,
};

const CATALOG: &str = r#"
[[variant]]
id = "tiny-clone"
source = "acme/tiny-base"
footprint = "small"
mode = "clone"

[[variant]]
id = "tiny-design"
source = "acme/tiny-design"
footprint = "small"
mode = "design"

[[variant]]
id = "pinned"
source = "acme/pinned"
footprint = "large"
mode = "custom_voice"
sha256 = "0000000000000000000000000000000000000000000000000000000000000000"
"#;

fn write_weights(dir: &TempDir, source: &str, bytes: usize) {
    let model_dir = dir.path().join("models").join(source);
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join(WEIGHTS_FILE), vec![3u8; bytes]).unwrap();
}

fn manager(dir: &TempDir, budget: usize, idle_ms: u64) -> LifecycleManager<MappedBackend> {
    let backend = MappedBackend::new(
        dir.path().to_path_buf(),
        GpuMemory::new(GpuMemoryConfig { max_bytes: budget }),
    );
    let config = LifecycleConfig {
        idle_timeout: Duration::from_millis(idle_ms),
        max_lease_lifetime: Duration::from_secs(60),
        slot_policy: SlotPolicy::Shared,
    };
    LifecycleManager::new(Arc::new(ModelRegistry::from_toml(CATALOG).unwrap()), backend, config)
}

#[tokio::test]
async fn test_resident_weights_are_charged_to_device_budget() {
    let dir = TempDir::new().unwrap();
    write_weights(&dir, "acme/tiny-base", 4096);
    let manager = manager(&dir, 64 * 1024, 10_000);

    let lease = manager.acquire("tiny-clone", Duration::from_secs(2)).await.unwrap();
    assert_eq!(manager.backend().gpu().allocated(), 4096);
    manager.release(&lease).unwrap();
}

#[tokio::test]
async fn test_idle_eviction_returns_device_memory() {
    let dir = TempDir::new().unwrap();
    write_weights(&dir, "acme/tiny-base", 2048);
    let manager = manager(&dir, 64 * 1024, 40);

    let lease = manager.acquire("tiny-clone", Duration::from_secs(2)).await.unwrap();
    manager.release(&lease).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!manager.is_resident("tiny-clone"));
    assert_eq!(manager.backend().gpu().allocated(), 0);
}

#[tokio::test]
async fn test_swap_releases_outgoing_reservation_first() {
    let dir = TempDir::new().unwrap();
    write_weights(&dir, "acme/tiny-base", 3000);
    write_weights(&dir, "acme/tiny-design", 3000);
    // Room for exactly one of the two.
    let manager = manager(&dir, 4000, 10_000);

    let lease = manager.acquire("tiny-clone", Duration::from_secs(2)).await.unwrap();
    manager.release(&lease).unwrap();

    let lease = manager.acquire("tiny-design", Duration::from_secs(2)).await.unwrap();
    assert_eq!(lease.variant_id(), "tiny-design");
    assert_eq!(manager.backend().gpu().allocated(), 3000);
}

#[tokio::test]
async fn test_hash_mismatch_surfaces_as_load_failure() {
    let dir = TempDir::new().unwrap();
    write_weights(&dir, "acme/pinned", 64);
    let manager = manager(&dir, 64 * 1024, 10_000);

    let err = manager.acquire("pinned", Duration::from_secs(2)).await.unwrap_err();
    match err {
        LifecycleError::LoadFailure { variant, reason } => {
            assert_eq!(variant, "pinned");
            assert!(reason.contains("Hash mismatch"), "reason: {reason}");
        }
        other => panic!("expected load failure, got {other:?}"),
    }
    assert_eq!(manager.backend().gpu().allocated(), 0);
    assert!(manager.device_fault().is_none());
}

#[tokio::test]
async fn test_missing_weights_surface_as_load_failure() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    let manager = manager(&dir, 64 * 1024, 10_000);

    let err = manager.acquire("tiny-design", Duration::from_secs(2)).await.unwrap_err();
    assert!(matches!(err, LifecycleError::LoadFailure { .. }));
    assert!(err.is_retryable());
}
