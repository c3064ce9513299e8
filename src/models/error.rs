//! Errors surfaced to callers of the lifecycle manager and inference gate.
//!
//! Every variant is local to one request except `DeviceFailure`.

use thiserror::Error;

use super::lease::LeaseId;
use super::registry::RegistryError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Unknown model variant: {0}")]
    UnknownVariant(String),

    #[error("Failed to load {variant}: {reason}")]
    LoadFailure { variant: String, reason: String },

    #[error("Timed out after {waited_ms}ms waiting for {variant} to become ready")]
    AcquireTimeout { variant: String, waited_ms: u64 },

    #[error("Lease {0} was already released")]
    DoubleRelease(LeaseId),

    #[error("Lease {0} outlived its deadline and was reclaimed")]
    LeaseExpired(LeaseId),

    #[error("Timed out after {waited_ms}ms waiting for the device")]
    GateTimeout { waited_ms: u64 },

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Model manager is shutting down")]
    ShuttingDown,

    #[error("Device failure: {0}")]
    DeviceFailure(String),
}

impl LifecycleError {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownVariant(_) => "unknown_variant",
            Self::LoadFailure { .. } => "load_failure",
            Self::AcquireTimeout { .. } => "acquire_timeout",
            Self::DoubleRelease(_) => "double_release",
            Self::LeaseExpired(_) => "lease_expired",
            Self::GateTimeout { .. } => "gate_timeout",
            Self::InferenceFailed(_) => "inference_failed",
            Self::ShuttingDown => "shutting_down",
            Self::DeviceFailure(_) => "device_failure",
        }
    }

    /// Returns true if the caller sent a bad request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownVariant(_))
    }

    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LoadFailure { .. } | Self::AcquireTimeout { .. } | Self::GateTimeout { .. }
        )
    }

    /// Returns true if no further acquisition can succeed in this process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceFailure(_))
    }

    /// Returns true if this error signals a caller bug.
    pub fn is_caller_bug(&self) -> bool {
        matches!(self, Self::DoubleRelease(_))
    }
}

impl From<RegistryError> for LifecycleError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::UnknownVariant(id),
            other => Self::UnknownVariant(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(LifecycleError::UnknownVariant("x".into()).is_client_error());
        assert!(LifecycleError::GateTimeout { waited_ms: 5 }.is_retryable());
        assert!(!LifecycleError::DoubleRelease(LeaseId(1)).is_retryable());
        assert!(LifecycleError::DoubleRelease(LeaseId(1)).is_caller_bug());
        assert!(LifecycleError::DeviceFailure("gone".into()).is_fatal());
    }

    #[test]
    fn test_registry_not_found_maps_to_unknown_variant() {
        let err: LifecycleError = RegistryError::NotFound("9b".into()).into();
        assert_eq!(err, LifecycleError::UnknownVariant("9b".into()));
    }
}
