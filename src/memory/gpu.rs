//! GPU memory budget tracking.
//!
//! Reservations are RAII: the bytes return to the budget when the
//! `GpuReservation` is dropped, which happens when a model payload is unloaded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuMemoryError {
    #[error("GPU memory exhausted: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },
}

/// Configuration for GPU memory management.
#[derive(Debug, Clone)]
pub struct GpuMemoryConfig {
    pub max_bytes: usize,
}

impl Default for GpuMemoryConfig {
    fn default() -> Self {
        Self {
            max_bytes: 8 * 1024 * 1024 * 1024, // 8 GB default
        }
    }
}

struct Budget {
    allocated: AtomicUsize,
    max_bytes: usize,
}

/// Tracks GPU memory allocation against a fixed device budget.
#[derive(Clone)]
pub struct GpuMemory {
    budget: Arc<Budget>,
}

impl GpuMemory {
    pub fn new(config: GpuMemoryConfig) -> Self {
        Self {
            budget: Arc::new(Budget {
                allocated: AtomicUsize::new(0),
                max_bytes: config.max_bytes,
            }),
        }
    }

    /// Reserve GPU memory. Returns error if insufficient.
    pub fn reserve(&self, bytes: usize) -> Result<GpuReservation, GpuMemoryError> {
        let budget = &self.budget;
        let mut current = budget.allocated.load(Ordering::SeqCst);
        loop {
            let new_total = current.saturating_add(bytes);
            if new_total > budget.max_bytes {
                return Err(GpuMemoryError::OutOfMemory {
                    requested: bytes,
                    available: budget.max_bytes.saturating_sub(current),
                });
            }
            match budget.allocated.compare_exchange_weak(
                current,
                new_total,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        Ok(GpuReservation {
            bytes,
            budget: self.budget.clone(),
        })
    }

    pub fn allocated(&self) -> usize {
        self.budget.allocated.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.budget.max_bytes.saturating_sub(self.allocated())
    }

    pub fn capacity(&self) -> usize {
        self.budget.max_bytes
    }
}

/// Handle representing reserved GPU memory.
pub struct GpuReservation {
    bytes: usize,
    budget: Arc<Budget>,
}

impl GpuReservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for GpuReservation {
    fn drop(&mut self) {
        self.budget.allocated.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for GpuReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuReservation").field("bytes", &self.bytes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_bytes: usize) -> GpuMemory {
        GpuMemory::new(GpuMemoryConfig { max_bytes })
    }

    #[test]
    fn test_reserve_and_drop_returns_bytes() {
        let gpu = budget(1000);
        let reservation = gpu.reserve(400).unwrap();
        assert_eq!(gpu.allocated(), 400);
        assert_eq!(gpu.available(), 600);

        drop(reservation);
        assert_eq!(gpu.allocated(), 0);
    }

    #[test]
    fn test_reserve_over_budget_fails_without_leaking() {
        let gpu = budget(1000);
        let _held = gpu.reserve(800).unwrap();

        let err = gpu.reserve(300).unwrap_err();
        assert_eq!(err, GpuMemoryError::OutOfMemory { requested: 300, available: 200 });
        assert_eq!(gpu.allocated(), 800);
    }

    #[test]
    fn test_exact_fit_succeeds() {
        let gpu = budget(1000);
        let reservation = gpu.reserve(1000).unwrap();
        assert_eq!(reservation.bytes(), 1000);
        assert_eq!(gpu.available(), 0);
    }
}
