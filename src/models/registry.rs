//! Static catalog of loadable model variants.
//!
//! The registry is built once at startup (built-in catalog or a TOML file)
//! and is read-only afterwards. Lookups hand out shared `Arc<ModelVariant>`
//! values so slots and leases can hold on to the variant cheaply.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown model variant: {0}")]
    NotFound(String),

    #[error("Duplicate model variant: {0}")]
    Duplicate(String),

    #[error("Invalid variant {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("Invalid registry catalog: {0}")]
    Parse(String),

    #[error("Failed to read registry catalog: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse memory-size bucket used to decide how many handles may coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FootprintClass {
    Small,
    Large,
}

impl FootprintClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for FootprintClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which synthesis endpoint a variant serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Voice cloning from a reference clip (base checkpoints).
    Clone,
    /// Voice design from a natural-language instruction.
    Design,
    /// Preset speakers.
    CustomVoice,
}

impl SynthesisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Design => "design",
            Self::CustomVoice => "custom_voice",
        }
    }
}

/// A named, loadable model configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVariant {
    /// Unique identifier (e.g. "1.7b-clone").
    pub id: String,
    /// Opaque source reference, usually a HuggingFace repository id.
    pub source: String,
    pub footprint: FootprintClass,
    pub mode: SynthesisMode,
    /// SHA-256 of the weights file, verified at load time when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ModelVariant {
    pub fn new(id: &str, source: &str, footprint: FootprintClass, mode: SynthesisMode) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            footprint,
            mode,
            sha256: None,
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id cannot be empty"));
        }
        if self.source.trim().is_empty() {
            return Err(invalid("source cannot be empty"));
        }
        if let Some(hash) = &self.sha256 {
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid("sha256 must be 64 hex characters"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default, rename = "variant")]
    variants: Vec<ModelVariant>,
}

/// Read-only registry of model variants.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    by_id: HashMap<String, Arc<ModelVariant>>,
    order: Vec<Arc<ModelVariant>>,
}

impl ModelRegistry {
    /// Build a registry from a list of variants, rejecting invalid or duplicate entries.
    pub fn new(variants: Vec<ModelVariant>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::with_capacity(variants.len());
        let mut order = Vec::with_capacity(variants.len());

        for variant in variants {
            variant.validate()?;
            if by_id.contains_key(&variant.id) {
                return Err(RegistryError::Duplicate(variant.id));
            }
            let variant = Arc::new(variant);
            by_id.insert(variant.id.clone(), variant.clone());
            order.push(variant);
        }

        Ok(Self { by_id, order })
    }

    /// The Qwen3-TTS checkpoints served out of the box.
    pub fn builtin() -> Self {
        use FootprintClass::{Large, Small};
        use SynthesisMode as Mode;

        let variants = vec![
            ModelVariant::new("0.6b-clone", "Qwen/Qwen3-TTS-12Hz-0.6B-Base", Small, Mode::Clone),
            ModelVariant::new("0.6b-custom", "Qwen/Qwen3-TTS-12Hz-0.6B-CustomVoice", Small, Mode::CustomVoice),
            ModelVariant::new("1.7b-clone", "Qwen/Qwen3-TTS-12Hz-1.7B-Base", Large, Mode::Clone),
            ModelVariant::new("1.7b-design", "Qwen/Qwen3-TTS-12Hz-1.7B-VoiceDesign", Large, Mode::Design),
            ModelVariant::new("1.7b-custom", "Qwen/Qwen3-TTS-12Hz-1.7B-CustomVoice", Large, Mode::CustomVoice),
        ];

        let order: Vec<Arc<ModelVariant>> = variants.into_iter().map(Arc::new).collect();
        let by_id = order.iter().map(|v| (v.id.clone(), v.clone())).collect();
        Self { by_id, order }
    }

    /// Parse a TOML catalog made of `[[variant]]` tables.
    pub fn from_toml(content: &str) -> Result<Self, RegistryError> {
        let catalog: Catalog =
            toml::from_str(content).map_err(|e| RegistryError::Parse(e.to_string()))?;
        if catalog.variants.is_empty() {
            return Err(RegistryError::Parse("catalog declares no variants".into()));
        }
        Self::new(catalog.variants)
    }

    /// Load a TOML catalog from disk.
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Resolve a variant identifier.
    pub fn resolve(&self, variant_id: &str) -> Result<Arc<ModelVariant>, RegistryError> {
        self.by_id
            .get(variant_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(variant_id.to_string()))
    }

    pub fn contains(&self, variant_id: &str) -> bool {
        self.by_id.contains_key(variant_id)
    }

    /// Variants in registration order.
    pub fn variants(&self) -> impl Iterator<Item = &Arc<ModelVariant>> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
