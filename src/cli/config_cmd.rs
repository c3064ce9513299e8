// Copyright 2024-2026 VOX-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables.

use crate::config::{self, EffectiveConfig};

use super::{EXIT_CONFIG, EXIT_OK};

/// Print effective config as key-value pairs to stdout.
pub fn run_show() {
    let cfg = config::load().effective_config();
    print_config(&cfg);
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    println!("VOX_CORE_IDLE_TIMEOUT=180");
    println!("VOX_CORE_ACQUIRE_TIMEOUT=120");
    println!("VOX_CORE_MAX_LEASE_LIFETIME=900");
    println!("VOX_CORE_SLOT_POLICY=shared");
    println!("VOX_CORE_REGISTRY=");
    println!("VOX_CORE_MODELS_DIR=.");
    println!("VOX_CORE_DEVICE_MEMORY=8589934592");
    println!("VOX_CORE_SHUTDOWN_TIMEOUT=30");
    println!("VOX_CORE_LOG_FORMAT=json");
    println!("VOX_CORE_LOG_LEVEL=info");
}

/// Check configuration for misconfigurations.
///
/// Returns 0 if valid, 2 if any problem is found.
pub fn run_validate() -> i32 {
    let problems = validate(&config::load());
    for problem in &problems {
        eprintln!("WARNING: {problem}");
    }
    if problems.is_empty() {
        println!("Configuration is valid.");
        EXIT_OK
    } else {
        EXIT_CONFIG
    }
}

/// Problems found in the loaded configuration, empty if none.
pub fn validate(env: &config::EnvConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if let Err(err) = env.load_registry() {
        problems.push(format!("VOX_CORE_REGISTRY: {err}"));
    }
    if !env.models_dir.is_dir() {
        problems.push(format!(
            "VOX_CORE_MODELS_DIR ({}) is not a directory",
            env.models_dir.display()
        ));
    }
    if env.max_lease_lifetime < env.acquire_timeout {
        problems.push(format!(
            "VOX_CORE_MAX_LEASE_LIFETIME ({}s) < VOX_CORE_ACQUIRE_TIMEOUT ({}s); leases may be reclaimed mid-request",
            env.max_lease_lifetime.as_secs(),
            env.acquire_timeout.as_secs()
        ));
    }
    if tracing_subscriber::EnvFilter::try_new(&env.log.level).is_err() {
        problems.push(format!("VOX_CORE_LOG_LEVEL ({}) is not a valid filter", env.log.level));
    }

    problems
}

fn print_config(cfg: &EffectiveConfig) {
    println!("VOX_CORE_IDLE_TIMEOUT={}", cfg.idle_timeout_secs);
    println!("VOX_CORE_ACQUIRE_TIMEOUT={}", cfg.acquire_timeout_secs);
    println!("VOX_CORE_MAX_LEASE_LIFETIME={}", cfg.max_lease_lifetime_secs);
    println!("VOX_CORE_SLOT_POLICY={}", cfg.slot_policy.as_str());
    println!(
        "VOX_CORE_REGISTRY={}",
        cfg.registry.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
    );
    println!("VOX_CORE_MODELS_DIR={}", cfg.models_dir.display());
    println!("VOX_CORE_DEVICE_MEMORY={}", cfg.device_memory_bytes);
    println!("VOX_CORE_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("VOX_CORE_LOG_FORMAT={}", cfg.log_format);
    println!("VOX_CORE_LOG_LEVEL={}", cfg.log_level);
}
