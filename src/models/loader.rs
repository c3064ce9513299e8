//! Memory-mapped reference backend.
//!
//! Resolves `<base>/models/<source>/model.safetensors`, maps it read-only,
//! verifies its hash when the registry pins one, and charges its size to the
//! device budget for as long as the payload lives.

use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::backend::{LoadError, ModelBackend};
use super::registry::ModelVariant;
use crate::memory::{GpuMemory, GpuReservation};

/// File name of the weights inside a variant's source directory.
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Allowed directories for model loading.
const ALLOWED_DIRS: &[&str] = &["models"];

/// Validated model path within allowed directories.
#[derive(Debug, Clone)]
pub struct ModelPath {
    path: PathBuf,
}

impl ModelPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

/// Memory-mapped weights file.
pub struct MappedModel {
    mmap: Mmap,
}

impl MappedModel {
    /// Memory-map a model file for zero-copy access.
    pub fn open(path: &ModelPath) -> Result<Self, LoadError> {
        let file = File::open(path.as_path())?;
        // SAFETY: File is opened read-only, model files are not modified during runtime
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

/// Weights resident on the device, plus the budget they occupy.
pub struct LoadedWeights {
    variant_id: String,
    mapped: MappedModel,
    reservation: GpuReservation,
}

impl LoadedWeights {
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.mapped.as_bytes()
    }

    pub fn device_bytes(&self) -> usize {
        self.reservation.bytes()
    }
}

/// Backend that maps weight files from disk into the device budget.
pub struct MappedBackend {
    base_path: PathBuf,
    gpu: GpuMemory,
}

impl MappedBackend {
    pub fn new(base_path: PathBuf, gpu: GpuMemory) -> Self {
        Self { base_path, gpu }
    }

    pub fn gpu(&self) -> &GpuMemory {
        &self.gpu
    }

    /// Relative location of a variant's weights under the base path.
    pub fn weights_location(variant: &ModelVariant) -> PathBuf {
        Path::new("models").join(&variant.source).join(WEIGHTS_FILE)
    }

    /// Validate and create a ModelPath if within allowed directories.
    pub fn validate_path(&self, relative_path: &Path) -> Result<ModelPath, LoadError> {
        let full_path = self.base_path.join(relative_path);
        let canonical = full_path
            .canonicalize()
            .map_err(|_| LoadError::NotFound(full_path.clone()))?;

        let is_allowed = ALLOWED_DIRS.iter().any(|dir| {
            self.base_path
                .join(dir)
                .canonicalize()
                .map(|allowed| canonical.starts_with(&allowed))
                .unwrap_or(false)
        });

        if !is_allowed {
            return Err(LoadError::PathNotAllowed(canonical));
        }

        Ok(ModelPath { path: canonical })
    }

    /// Check a variant's weights without charging the device budget.
    pub fn verify(&self, variant: &ModelVariant) -> Result<u64, LoadError> {
        let path = self.validate_path(&Self::weights_location(variant))?;
        let mapped = MappedModel::open(&path)?;
        check_weights(variant, &mapped)?;
        Ok(mapped.len() as u64)
    }
}

fn check_weights(variant: &ModelVariant, mapped: &MappedModel) -> Result<(), LoadError> {
    if mapped.is_empty() {
        return Err(LoadError::InvalidFormat(format!(
            "weights for {} are empty",
            variant.id
        )));
    }
    if let Some(expected) = &variant.sha256 {
        let actual = hex::encode(Sha256::digest(mapped.as_bytes()));
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(LoadError::HashMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

impl ModelBackend for MappedBackend {
    type Payload = LoadedWeights;

    fn load(&self, variant: &ModelVariant) -> Result<LoadedWeights, LoadError> {
        let path = self.validate_path(&Self::weights_location(variant))?;
        let mapped = MappedModel::open(&path)?;
        check_weights(variant, &mapped)?;
        let reservation = self.gpu.reserve(mapped.len())?;

        debug!(
            variant = %variant.id,
            bytes = mapped.len(),
            available = self.gpu.available(),
            "weights mapped"
        );

        Ok(LoadedWeights {
            variant_id: variant.id.clone(),
            mapped,
            reservation,
        })
    }

    fn unload(&self, variant: &ModelVariant, payload: LoadedWeights) {
        let bytes = payload.device_bytes();
        drop(payload);
        debug!(variant = %variant.id, bytes, available = self.gpu.available(), "weights unmapped");
    }
}
