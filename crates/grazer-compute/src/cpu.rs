//! CPU compute backend using Rayon for shared-memory parallelism.

use grazer_core::{TallySet, TraceError};
use rayon::prelude::*;

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, RoundFn, RoundTask};

/// CPU backend that spreads rounds across threads via Rayon.
pub struct CpuBackend {
    num_threads: usize,
    /// Dedicated pool; `None` uses Rayon's global pool.
    pool: Option<rayon::ThreadPool>,
}

impl CpuBackend {
    /// Create a new CPU backend on the global pool, using all its threads.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            pool: None,
        }
    }

    /// Create a CPU backend with its own pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("grazer-worker-{}", i))
            .build()
            .map_err(|e| ComputeError::DeviceError(e.to_string()))?;
        Ok(Self {
            num_threads: pool.current_num_threads(),
            pool: Some(pool),
        })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn workers(&self) -> usize {
        self.num_threads
    }

    fn run_rounds(
        &self,
        tasks: &[RoundTask],
        round_fn: &RoundFn<'_>,
    ) -> Result<Vec<Result<TallySet, TraceError>>, ComputeError> {
        let run = || tasks.par_iter().map(|&task| round_fn(task)).collect::<Vec<_>>();
        Ok(match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        })
    }
}
