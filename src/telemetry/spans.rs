//! The `synthesis_request` span.
//!
//! One span covers the whole request: acquire, the gate wait and the
//! inference call. Its fields start empty and are filled through `SpanExt`
//! as the request progresses.

use tokio::time::Instant;
use tracing::{field, info_span, Span};

use crate::models::{Lease, LifecycleError};

pub struct SynthesisSpan;

impl SynthesisSpan {
    pub fn new(request_id: &str, variant_id: &str) -> Span {
        info_span!(
            "synthesis_request",
            request_id = %request_id,
            variant = %variant_id,
            lease = field::Empty,
            handle = field::Empty,
            status = field::Empty,
            error.kind = field::Empty,
            error.message = field::Empty,
            retryable = field::Empty,
            latency_ms = field::Empty,
        )
    }
}

/// Records request progress on a `synthesis_request` span.
pub trait SpanExt {
    /// Lease and handle the request was granted.
    fn record_lease<P>(&self, lease: &Lease<P>);

    /// Final status, error classification and latency since `started`.
    fn record_outcome<T>(&self, result: &Result<T, LifecycleError>, started: Instant);
}

impl SpanExt for Span {
    fn record_lease<P>(&self, lease: &Lease<P>) {
        self.record("lease", field::display(lease.id()));
        self.record("handle", field::display(lease.handle()));
    }

    fn record_outcome<T>(&self, result: &Result<T, LifecycleError>, started: Instant) {
        self.record("latency_ms", started.elapsed().as_millis() as u64);
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.kind", e.kind());
                self.record("error.message", field::display(e));
                self.record("retryable", e.is_retryable());
            }
        }
    }
}
