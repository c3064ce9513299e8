//! The load/unload capability the lifecycle manager drives.
//!
//! Both calls are blocking. The manager runs them on the blocking pool, one
//! at a time per slot, so implementations never see concurrent transitions
//! for the same slot.

use std::path::PathBuf;
use thiserror::Error;

use super::registry::ModelVariant;
use crate::memory::GpuMemoryError;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Model path not allowed: {0}")]
    PathNotAllowed(PathBuf),

    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid model format: {0}")]
    InvalidFormat(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error(transparent)]
    OutOfMemory(#[from] GpuMemoryError),

    /// The device is gone; no further load can succeed.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Returns true if the failure makes every later load pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

/// Loads model variants into device memory and releases them again.
pub trait ModelBackend: Send + Sync + 'static {
    /// Device-resident model instance.
    type Payload: Send + Sync + 'static;

    fn load(&self, variant: &ModelVariant) -> Result<Self::Payload, LoadError>;

    /// Free the device memory held by `payload`.
    fn unload(&self, variant: &ModelVariant, payload: Self::Payload);
}
