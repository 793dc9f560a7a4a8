//! Single-threaded backend.

use grazer_core::{TallySet, TraceError};

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, RoundFn, RoundTask};

/// Runs every round on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialBackend;

impl ComputeBackend for SerialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Serial (current thread)".into(),
            backend_type: BackendType::Serial,
            compute_units: Some(1),
        }
    }

    fn workers(&self) -> usize {
        1
    }

    fn run_rounds(
        &self,
        tasks: &[RoundTask],
        round_fn: &RoundFn<'_>,
    ) -> Result<Vec<Result<TallySet, TraceError>>, ComputeError> {
        Ok(tasks.iter().map(|&task| round_fn(task)).collect())
    }
}
