// Copyright 2024-2026 VOX-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Models CLI subcommands: list, verify, warm.

use crate::config;
use crate::models::{MappedBackend, ModelRegistry};

use super::{build_runtime, mapped_backend, CliError, EXIT_CONFIG, EXIT_FAILURE, EXIT_OK};

/// Run `models list`. Returns exit code: 0 on success, 2 on a bad catalog.
pub fn run_list(json: bool) -> i32 {
    let registry = match config::load().load_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error loading registry: {e}");
            return EXIT_CONFIG;
        }
    };

    if json {
        let variants: Vec<_> = registry.variants().map(|v| v.as_ref()).collect();
        match serde_json::to_string_pretty(&variants) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error encoding registry: {e}");
                return EXIT_FAILURE;
            }
        }
    } else {
        print_variants(&registry);
    }
    EXIT_OK
}

/// Format and print the variant catalog to stdout.
pub fn print_variants(registry: &ModelRegistry) {
    if registry.is_empty() {
        println!("No model variants registered.");
        return;
    }

    println!(
        "{:<16} {:<40} {:<10} {:<13} {:<8}",
        "ID", "SOURCE", "FOOTPRINT", "MODE", "PINNED"
    );
    println!("{}", "-".repeat(91));

    for v in registry.variants() {
        println!(
            "{:<16} {:<40} {:<10} {:<13} {:<8}",
            truncate(&v.id, 15),
            truncate(&v.source, 39),
            v.footprint.as_str(),
            v.mode.as_str(),
            if v.sha256.is_some() { "sha256" } else { "-" },
        );
    }

    println!("{}", "-".repeat(91));
    println!("{} variant(s)", registry.len());
}

/// Run `models verify`: check every variant's weights on disk.
///
/// Returns 0 if all verify, 1 if any fail, 2 on a bad catalog.
pub fn run_verify() -> i32 {
    let env = config::load();
    let registry = match env.load_registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error loading registry: {e}");
            return EXIT_CONFIG;
        }
    };
    let backend = mapped_backend(&env);
    if verify_all(&registry, &backend) == 0 {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

/// Print one line per variant and return the number that failed.
pub fn verify_all(registry: &ModelRegistry, backend: &MappedBackend) -> usize {
    let mut failed = 0;
    for v in registry.variants() {
        match backend.verify(v) {
            Ok(bytes) => println!("OK    {:<16} {} MB", v.id, bytes / (1024 * 1024)),
            Err(e) => {
                println!("FAIL  {:<16} {e}", v.id);
                failed += 1;
            }
        }
    }
    failed
}

/// Run `warm <variant>`: load the variant, report its handle, then unload.
pub async fn run_warm(variant_id: &str) -> i32 {
    match warm(variant_id).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

async fn warm(variant_id: &str) -> Result<(), CliError> {
    let env = config::load();
    let runtime = build_runtime(&env)?;
    let result = runtime.warm(variant_id).await;
    if let Ok(handle) = &result {
        let memory = runtime.manager().backend().gpu().allocated();
        println!("{variant_id} ready as {handle} ({} MB on device)", memory / (1024 * 1024));
    }
    runtime.shutdown().await;
    result.map(|_| ()).map_err(CliError::from)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{GpuMemory, GpuMemoryConfig};
    use crate::models::WEIGHTS_FILE;
    use tempfile::TempDir;

    #[test]
    fn test_print_variants_builtin() {
        // Smoke-test: must not panic.
        print_variants(&ModelRegistry::builtin());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
        assert_eq!(truncate("hello world", 5), "hello");
    }

    #[test]
    fn test_verify_all_counts_missing_weights() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::from_toml(
            r#"
            [[variant]]
            id = "present"
            source = "acme/present"
            footprint = "small"
            mode = "clone"

            [[variant]]
            id = "absent"
            source = "acme/absent"
            footprint = "large"
            mode = "design"
            "#,
        )
        .unwrap();
        let weights = dir.path().join("models/acme/present");
        std::fs::create_dir_all(&weights).unwrap();
        std::fs::write(weights.join(WEIGHTS_FILE), b"weights").unwrap();

        let backend = MappedBackend::new(
            dir.path().to_path_buf(),
            GpuMemory::new(GpuMemoryConfig { max_bytes: 1024 }),
        );
        assert_eq!(verify_all(&registry, &backend), 1);
        assert_eq!(backend.gpu().allocated(), 0);
    }
}
