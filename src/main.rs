// Copyright 2024-2026 VOX-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! vox-core operator CLI entry point.
//!
//! ## CLI Subcommands
//!
//! - `vox-core-cli models list [--json]` - Show the variant catalog
//! - `vox-core-cli models verify` - Check weights for every variant
//! - `vox-core-cli warm <variant>` - Load a variant once and report
//! - `vox-core-cli health [--json] [--warm <variant>]` - Self-check report (exit 0/1)
//! - `vox-core-cli config show|defaults|validate`

use std::process::ExitCode;

use vox_core::cli::{config_cmd, health_cmd, models_cmd, EXIT_CONFIG};
use vox_core::config;
use vox_core::telemetry::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let json_output = args.iter().skip(2).any(|a| a == "--json");

    if matches!(command, "warm" | "health") {
        let env = config::load();
        if let Err(e) = init_logging(&env.log) {
            eprintln!("Logging disabled: {e}");
        }
    }

    let code = match command {
        "models" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("list");
            match subcommand {
                "list" | "--json" => models_cmd::run_list(json_output),
                "verify" => models_cmd::run_verify(),
                _ => {
                    eprintln!("Unknown models subcommand: {subcommand}");
                    print_command_help("models");
                    EXIT_CONFIG
                }
            }
        }
        "warm" => match args.get(2) {
            Some(variant) => models_cmd::run_warm(variant).await,
            None => {
                eprintln!("Missing variant id");
                print_command_help("warm");
                EXIT_CONFIG
            }
        },
        "health" => {
            let warm = args
                .iter()
                .position(|a| a == "--warm")
                .and_then(|i| args.get(i + 1))
                .map(|s| s.as_str());
            health_cmd::run_health(json_output, warm).await
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    0
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    0
                }
                "validate" => config_cmd::run_validate(),
                _ => {
                    eprintln!("Unknown config subcommand: {subcommand}");
                    print_command_help("config");
                    EXIT_CONFIG
                }
            }
        }
        "help" | "--help" | "-h" => {
            match args.get(2) {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            0
        }
        "version" | "--version" | "-V" => {
            println!("vox-core {}", env!("CARGO_PKG_VERSION"));
            0
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage();
            EXIT_CONFIG
        }
    };

    ExitCode::from(code.clamp(0, 255) as u8)
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "vox-core - TTS model lifecycle manager v{version}

USAGE:
    vox-core-cli <COMMAND> [OPTIONS]

COMMANDS:
    models       Inspect the variant catalog (list, verify)
    warm         Load a variant onto the device and report its handle
    health       Self-check report, optionally warming a variant
    config       Manage configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

OPTIONS:
    -h, --help     Show help for command
    -V, --version  Show version information
    --json         JSON output (models list, health)

EXAMPLES:
    vox-core-cli models list --json
    vox-core-cli models verify
    vox-core-cli warm 1.7b-clone
    vox-core-cli health --warm 0.6b-clone
    vox-core-cli config validate

ENVIRONMENT:
    VOX_CORE_MODELS_DIR    Base directory containing models/ (default: .)
    VOX_CORE_REGISTRY      TOML catalog replacing the built-in variants
    VOX_CORE_LOG_LEVEL     Log filter (default: info)
    See `vox-core-cli config defaults` for the full list.

EXIT CODES:
    0  Success / Healthy
    1  Failure / Unhealthy
    2  Configuration or usage error
    4  Device failure"
    );
}

fn print_command_help(command: &str) {
    match command {
        "models" => eprintln!(
            "vox-core-cli models <list|verify> [--json]

    list     Print every registered variant
    verify   Check that each variant's weights exist and match their sha256"
        ),
        "warm" => eprintln!(
            "vox-core-cli warm <variant>

    Loads the variant through the lifecycle manager, prints the handle,
    then shuts down and unloads it. Useful to check a deployment."
        ),
        "health" => eprintln!(
            "vox-core-cli health [--json] [--warm <variant>]

    Self-check: builds a runtime from the current configuration and prints
    its slot states, leases and gate backlog. With --warm the variant is
    loaded first, so the report covers the weights and the device budget.
    Exit 0 when healthy and the warm-up succeeded."
        ),
        "config" => eprintln!(
            "vox-core-cli config <show|defaults|validate>

    show      Effective values after environment overrides
    defaults  Built-in defaults
    validate  Check for misconfiguration (exit 2 on problems)"
        ),
        _ => print_usage(),
    }
}
