//! Telemetry for the synthesis runtime.
//!
//! Provides structured logging, request spans, and lifecycle metrics.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    describe_metrics, record_acquire_failure, record_eviction, record_gate_timeout,
    record_gate_wait, record_lease_granted, record_lease_reclaimed, record_load,
};
pub use spans::{SpanExt, SynthesisSpan};
