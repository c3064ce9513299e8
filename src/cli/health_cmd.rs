// Copyright 2024-2026 VOX-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Health CLI subcommand.
//!
//! A self-check: builds a runtime from the current configuration, optionally
//! warms one variant through it, and prints the resulting health report.
//! There is no long-running server to query, so without `--warm` the report
//! only confirms the configuration and registry load. Exits 0 when healthy
//! and the warm-up (if any) succeeded.

use crate::config::{self, EnvConfig};
use crate::health::{HealthReport, HealthState};

use super::{build_runtime, CliError, EXIT_FAILURE, EXIT_OK};

/// Result of one self-check run.
pub struct SelfCheck {
    pub report: HealthReport,
    /// Why the requested warm-up failed, if it did.
    pub warm_error: Option<CliError>,
}

/// Build a runtime, warm `warm` if given, and capture its health report.
///
/// The report is taken before the runtime shuts down, so a warmed variant
/// shows up as resident.
pub async fn self_check(env: &EnvConfig, warm: Option<&str>) -> Result<SelfCheck, CliError> {
    let runtime = build_runtime(env)?;
    let warm_error = match warm {
        Some(variant) => runtime.warm(variant).await.err().map(CliError::from),
        None => None,
    };
    let report = runtime.health();
    runtime.shutdown().await;
    Ok(SelfCheck { report, warm_error })
}

pub async fn run_health(json: bool, warm: Option<&str>) -> i32 {
    let env = config::load();
    let check = match self_check(&env, warm).await {
        Ok(check) => check,
        Err(e) => {
            eprintln!("Error: {e}");
            return e.exit_code();
        }
    };

    if json {
        match serde_json::to_string_pretty(&check.report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error encoding health report: {e}");
                return EXIT_FAILURE;
            }
        }
    } else {
        print_report(&check.report);
    }

    match check.warm_error {
        Some(e) => {
            eprintln!("Warm-up failed: {e}");
            e.exit_code()
        }
        None => exit_code(&check.report),
    }
}

pub fn exit_code(report: &HealthReport) -> i32 {
    match report.state {
        HealthState::Healthy => EXIT_OK,
        HealthState::Degraded | HealthState::Unhealthy => EXIT_FAILURE,
    }
}

pub fn print_report(report: &HealthReport) {
    println!("state:              {:?}", report.state);
    println!("ready:              {}", report.ready);
    println!("accepting requests: {}", report.accepting_requests);
    if let Some(fault) = &report.device_fault {
        println!("device fault:       {fault}");
    }
    println!(
        "resident models:    {}",
        if report.resident_models.is_empty() {
            "-".to_string()
        } else {
            report.resident_models.join(", ")
        }
    );
    println!("outstanding leases: {}", report.outstanding_leases);
    println!("gate waiting:       {}", report.gate_waiting);
    for slot in &report.slots {
        println!(
            "slot {:<8} {:?} {}",
            slot.slot,
            slot.state,
            slot.variant.as_deref().unwrap_or("-")
        );
    }
    println!("uptime:             {}s", report.uptime_secs);
}
