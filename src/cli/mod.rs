// Copyright 2024-2026 VOX-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for vox-core operator commands.
//!
//! Every command works against the local configuration and model directory;
//! there is no server to connect to.
//!
//! ## Usage
//!
//! ```bash
//! vox-core-cli models list               # Show the variant catalog
//! vox-core-cli models verify             # Check weights for every variant
//! vox-core-cli warm 1.7b-clone           # Load a variant and report its handle
//! vox-core-cli health --warm 0.6b-clone  # Self-check after loading a variant
//! ```

pub mod config_cmd;
pub mod health_cmd;
pub mod models_cmd;

use thiserror::Error;

use crate::config::EnvConfig;
use crate::memory::GpuMemory;
use crate::models::{LifecycleError, MappedBackend, RegistryError};
use crate::{Runtime, RuntimeConfig};

/// Exit code for success / healthy.
pub const EXIT_OK: i32 = 0;
/// Exit code for an operation that failed.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for configuration or usage errors.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code for a fatal device failure.
pub const EXIT_DEVICE: i32 = 4;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Registry(_) => EXIT_CONFIG,
            Self::Lifecycle(err) if err.is_fatal() => EXIT_DEVICE,
            Self::Lifecycle(err) if err.is_client_error() => EXIT_CONFIG,
            Self::Lifecycle(_) => EXIT_FAILURE,
        }
    }
}

/// Weights backend for the configured models directory and device budget.
pub fn mapped_backend(env: &EnvConfig) -> MappedBackend {
    MappedBackend::new(env.models_dir.clone(), GpuMemory::new(env.gpu_memory_config()))
}

/// Runtime over the configured registry and weights. Needs a Tokio runtime.
pub fn build_runtime(env: &EnvConfig) -> Result<Runtime<MappedBackend>, CliError> {
    let registry = env.load_registry()?;
    Ok(Runtime::new(registry, mapped_backend(env), RuntimeConfig::from_env(env)))
}
