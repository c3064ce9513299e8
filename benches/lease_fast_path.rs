//! Lease fast-path benchmarks.
//!
//! Measures acquire/release against a resident model and a full trip
//! through the inference gate.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime as TokioRuntime;

use vox_core::models::{
    LifecycleConfig, LifecycleManager, LoadError, ModelBackend, ModelRegistry, ModelVariant,
};
use vox_core::scheduler::InferenceGate;

struct NullBackend;

impl ModelBackend for NullBackend {
    type Payload = String;

    fn load(&self, variant: &ModelVariant) -> Result<String, LoadError> {
        Ok(variant.id.clone())
    }

    fn unload(&self, _variant: &ModelVariant, _payload: String) {}
}

const TIMEOUT: Duration = Duration::from_secs(5);

fn warm_manager(rt: &TokioRuntime) -> LifecycleManager<NullBackend> {
    rt.block_on(async {
        let manager = LifecycleManager::new(
            Arc::new(ModelRegistry::builtin()),
            NullBackend,
            LifecycleConfig::default(),
        );
        let lease = manager.acquire("0.6b-clone", TIMEOUT).await.unwrap();
        manager.release(&lease).unwrap();
        manager
    })
}

fn bench_acquire_release(c: &mut Criterion) {
    let rt = TokioRuntime::new().unwrap();
    let manager = warm_manager(&rt);

    let mut group = c.benchmark_group("lease");
    group.throughput(Throughput::Elements(1));
    group.bench_function("acquire_release_resident", |b| {
        b.iter(|| {
            rt.block_on(async {
                let lease = manager.acquire(black_box("0.6b-clone"), TIMEOUT).await.unwrap();
                manager.release(&lease).unwrap();
            })
        })
    });
    group.finish();
}

fn bench_concurrent_holders(c: &mut Criterion) {
    let rt = TokioRuntime::new().unwrap();
    let manager = warm_manager(&rt);

    let mut group = c.benchmark_group("lease_concurrent");
    for holders in [1usize, 8, 32] {
        group.throughput(Throughput::Elements(holders as u64));
        group.bench_with_input(BenchmarkId::new("holders", holders), &holders, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let acquires = (0..n).map(|_| manager.acquire("0.6b-clone", TIMEOUT));
                    let leases = futures::future::join_all(acquires).await;
                    for lease in leases {
                        manager.release(&lease.unwrap()).unwrap();
                    }
                })
            })
        });
    }
    group.finish();
}

fn bench_gate_roundtrip(c: &mut Criterion) {
    let rt = TokioRuntime::new().unwrap();
    let manager = warm_manager(&rt);
    let gate = InferenceGate::new();

    c.bench_function("gate_run_resident", |b| {
        b.iter(|| {
            rt.block_on(async {
                let lease = manager.acquire("0.6b-clone", TIMEOUT).await.unwrap();
                let len = gate.run(lease, TIMEOUT, |model: &String| model.len()).await;
                black_box(len.unwrap())
            })
        })
    });
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_concurrent_holders,
    bench_gate_roundtrip
);
criterion_main!(benches);
