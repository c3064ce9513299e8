//! Device memory accounting for VOX-CORE.
//!
//! Tracks how much of the device budget resident model weights occupy.

mod gpu;

pub use gpu::{GpuMemory, GpuMemoryConfig, GpuMemoryError, GpuReservation};
