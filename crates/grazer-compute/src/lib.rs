//! # Grazer Compute
//!
//! Execution backends and the run driver for the Grazer ray tracer. This
//! crate provides a [`ComputeBackend`](backend::ComputeBackend) trait that
//! isolates how propagation rounds are scheduled from the physics, and the
//! [`RunDriver`](driver::RunDriver) that repeats, retries and merges them.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | Serial | always | Implemented |
//! | CPU (Rayon) | `cpu` (default) | Implemented |

pub mod backend;
pub mod driver;
pub mod serial;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, RoundTask};
pub use driver::{round_seed, BatchStatistics, Progress, RunDriver, RunError, RunReport};
pub use serial::SerialBackend;

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;
