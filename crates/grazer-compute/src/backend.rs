//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait decides *where* propagation rounds execute
//! (current thread or a thread pool) so that the run driver and the physics
//! in `grazer-core` stay execution-agnostic.

use grazer_core::{TallySet, TraceError};
use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Device error: {0}")]
    DeviceError(String),
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Serial,
    Cpu,
}

/// One propagation round to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTask {
    /// Round number, `0..repeats`.
    pub index: u64,
    /// 0 for the first try, 1 for the retry.
    pub attempt: u32,
    /// Seed of the round's private generator.
    pub seed: u64,
}

/// Work executed for a single round.
pub type RoundFn<'a> = dyn Fn(RoundTask) -> Result<TallySet, TraceError> + Send + Sync + 'a;

/// Abstraction over execution backends.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Number of rounds that can run at the same time.
    fn workers(&self) -> usize;

    /// Execute every task, returning the per-round results in task order.
    ///
    /// A failing round does not stop the others; the outer `Err` is reserved
    /// for the backend itself failing.
    fn run_rounds(
        &self,
        tasks: &[RoundTask],
        round_fn: &RoundFn<'_>,
    ) -> Result<Vec<Result<TallySet, TraceError>>, ComputeError>;
}
