//! Fuzz target for registry catalog parsing.
//!
//! Arbitrary input must parse or be rejected, never panic. A catalog that
//! parses must resolve every variant it lists.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vox_core::models::ModelRegistry;

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(registry) = ModelRegistry::from_toml(content) {
        for variant in registry.variants() {
            assert!(registry.resolve(&variant.id).is_ok());
        }
    }
});
