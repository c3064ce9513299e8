//! Model management for the synthesis runtime.
//!
//! Handles the variant registry, on-demand loading, swap between variants,
//! idle eviction and the leases that pin a resident model while in use.

mod backend;
mod error;
mod handle;
mod lease;
mod loader;
mod manager;
mod registry;
mod slot;
mod swap;
mod sweep;

pub use backend::{LoadError, ModelBackend};
pub use error::LifecycleError;
pub use handle::{EvictionReason, HandleId, HandleState};
pub use lease::{Lease, LeaseId};
pub(crate) use lease::Checkout;
pub use loader::{LoadedWeights, MappedBackend, MappedModel, ModelPath, WEIGHTS_FILE};
pub use manager::{LifecycleConfig, LifecycleManager, LifecycleStats, SlotStatus};
pub use registry::{FootprintClass, ModelRegistry, ModelVariant, RegistryError, SynthesisMode};
pub use slot::{SlotKey, SlotPolicy};
pub(crate) use slot::deadline_after;
