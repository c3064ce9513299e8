//! Lifecycle metrics through the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op, so the library can
//! record unconditionally and the embedding server decides on an exporter.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Register descriptions for every metric this crate emits.
pub fn describe_metrics() {
    describe_counter!("vox_model_loads_total", "Model loads by variant and outcome");
    describe_counter!("vox_model_evictions_total", "Model evictions by variant and reason");
    describe_counter!("vox_leases_granted_total", "Leases granted by variant");
    describe_counter!("vox_leases_reclaimed_total", "Leases reclaimed past their deadline");
    describe_counter!("vox_acquire_failures_total", "Failed acquisitions by error kind");
    describe_counter!("vox_gate_timeouts_total", "Requests that gave up waiting for the device");
    describe_histogram!("vox_model_load_seconds", "Time spent inside the backend load call");
    describe_histogram!("vox_acquire_wait_seconds", "Time from acquire to lease grant");
    describe_histogram!("vox_gate_wait_seconds", "Time spent waiting for the device");
    describe_gauge!("vox_gate_waiting", "Requests currently queued at the inference gate");
}

pub fn record_load(variant: &str, elapsed: Duration, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("vox_model_loads_total", "variant" => variant.to_string(), "outcome" => outcome)
        .increment(1);
    if success {
        histogram!("vox_model_load_seconds", "variant" => variant.to_string())
            .record(elapsed.as_secs_f64());
    }
}

pub fn record_eviction(variant: &str, reason: &'static str) {
    counter!("vox_model_evictions_total", "variant" => variant.to_string(), "reason" => reason)
        .increment(1);
}

pub fn record_lease_granted(variant: &str, waited: Duration) {
    counter!("vox_leases_granted_total", "variant" => variant.to_string()).increment(1);
    histogram!("vox_acquire_wait_seconds").record(waited.as_secs_f64());
}

pub fn record_lease_reclaimed(variant: &str) {
    counter!("vox_leases_reclaimed_total", "variant" => variant.to_string()).increment(1);
}

pub fn record_acquire_failure(kind: &'static str) {
    counter!("vox_acquire_failures_total", "kind" => kind).increment(1);
}

pub fn record_gate_wait(waited: Duration, waiting: usize) {
    histogram!("vox_gate_wait_seconds").record(waited.as_secs_f64());
    gauge!("vox_gate_waiting").set(waiting as f64);
}

pub fn record_gate_timeout() {
    counter!("vox_gate_timeouts_total").increment(1);
}
