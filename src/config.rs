//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `VOX_CORE_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `VOX_CORE_IDLE_TIMEOUT` | 180 | Idle seconds before a resident model is evicted |
//! | `VOX_CORE_ACQUIRE_TIMEOUT` | 120 | Max seconds a request waits for a model and the device |
//! | `VOX_CORE_MAX_LEASE_LIFETIME` | 900 | Seconds after which an unreleased lease is reclaimed |
//! | `VOX_CORE_SLOT_POLICY` | shared | `shared` or `per-footprint` |
//! | `VOX_CORE_REGISTRY` | (built-in) | TOML file replacing the built-in variant table |
//! | `VOX_CORE_MODELS_DIR` | . | Directory containing `models/<source>/` weights |
//! | `VOX_CORE_DEVICE_MEMORY` | 8589934592 | Device memory budget (bytes) |
//! | `VOX_CORE_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |
//! | `VOX_CORE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `VOX_CORE_LOG_LEVEL` | info | Log filter directive |
//!
//! Durations are whole seconds, clamped to `1..=2592000` (30 days).

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::memory::GpuMemoryConfig;
use crate::models::{LifecycleConfig, ModelRegistry, RegistryError, SlotPolicy};
use crate::telemetry::{LogConfig, LogFormat};

const DEFAULT_IDLE_SECS: u64 = 180;
const DEFAULT_ACQUIRE_SECS: u64 = 120;
const DEFAULT_LEASE_SECS: u64 = 900;
const DEFAULT_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DEVICE_MEMORY: u64 = 8 * 1024 * 1024 * 1024;
const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub idle_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub max_lease_lifetime_secs: u64,
    pub slot_policy: SlotPolicy,
    pub registry: Option<PathBuf>,
    pub models_dir: PathBuf,
    pub device_memory_bytes: u64,
    pub shutdown_timeout_secs: u64,
    pub log_format: String,
    pub log_level: String,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub max_lease_lifetime: Duration,
    pub slot_policy: SlotPolicy,
    pub registry_path: Option<PathBuf>,
    pub models_dir: PathBuf,
    pub device_memory: u64,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a duration in seconds, clamped to `1..=MAX_DURATION_SECS`.
fn parse_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(parse_u64(key, default).clamp(1, MAX_DURATION_SECS))
}

fn parse_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|val| !val.is_empty())
        .map(PathBuf::from)
}

fn load_slot_policy() -> SlotPolicy {
    std::env::var("VOX_CORE_SLOT_POLICY")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or_default()
}

fn load_log_config() -> LogConfig {
    let format = match std::env::var("VOX_CORE_LOG_FORMAT") {
        Ok(val) if val.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    let level = std::env::var("VOX_CORE_LOG_LEVEL")
        .ok()
        .filter(|val| !val.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    LogConfig {
        format,
        level,
        output_path: None,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let device_memory = parse_u64("VOX_CORE_DEVICE_MEMORY", DEFAULT_DEVICE_MEMORY).max(1024 * 1024);

    EnvConfig {
        idle_timeout: parse_secs("VOX_CORE_IDLE_TIMEOUT", DEFAULT_IDLE_SECS),
        acquire_timeout: parse_secs("VOX_CORE_ACQUIRE_TIMEOUT", DEFAULT_ACQUIRE_SECS),
        max_lease_lifetime: parse_secs("VOX_CORE_MAX_LEASE_LIFETIME", DEFAULT_LEASE_SECS),
        slot_policy: load_slot_policy(),
        registry_path: parse_path("VOX_CORE_REGISTRY"),
        models_dir: parse_path("VOX_CORE_MODELS_DIR").unwrap_or_else(|| PathBuf::from(".")),
        device_memory,
        shutdown_timeout: parse_secs("VOX_CORE_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_SECS),
        log: load_log_config(),
    }
}

impl EnvConfig {
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            idle_timeout: self.idle_timeout,
            max_lease_lifetime: self.max_lease_lifetime,
            slot_policy: self.slot_policy,
        }
    }

    pub fn gpu_memory_config(&self) -> GpuMemoryConfig {
        GpuMemoryConfig {
            max_bytes: self.device_memory as usize,
        }
    }

    /// The configured registry file, or the built-in table.
    pub fn load_registry(&self) -> Result<ModelRegistry, RegistryError> {
        match &self.registry_path {
            Some(path) => ModelRegistry::from_file(path),
            None => Ok(ModelRegistry::builtin()),
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            idle_timeout_secs: self.idle_timeout.as_secs(),
            acquire_timeout_secs: self.acquire_timeout.as_secs(),
            max_lease_lifetime_secs: self.max_lease_lifetime.as_secs(),
            slot_policy: self.slot_policy,
            registry: self.registry_path.clone(),
            models_dir: self.models_dir.clone(),
            device_memory_bytes: self.device_memory,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_format: match self.log.format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Pretty => "pretty".to_string(),
            },
            log_level: self.log.level.clone(),
        }
    }
}

/// Serializes tests that mutate process environment.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) const ENV_KEYS: &[&str] = &[
    "VOX_CORE_IDLE_TIMEOUT",
    "VOX_CORE_ACQUIRE_TIMEOUT",
    "VOX_CORE_MAX_LEASE_LIFETIME",
    "VOX_CORE_SLOT_POLICY",
    "VOX_CORE_REGISTRY",
    "VOX_CORE_MODELS_DIR",
    "VOX_CORE_DEVICE_MEMORY",
    "VOX_CORE_SHUTDOWN_TIMEOUT",
    "VOX_CORE_LOG_FORMAT",
    "VOX_CORE_LOG_LEVEL",
];

#[cfg(test)]
pub(crate) fn clear_env_vars() {
    for k in ENV_KEYS {
        std::env::remove_var(k);
    }
}
