//! Request scheduling onto the device.
//!
//! Serializes synthesis calls so only one runs on the device at a time.

mod gate;

pub use gate::InferenceGate;
