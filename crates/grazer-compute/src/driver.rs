//! Repeated propagation rounds, merged into one tally set.
//!
//! A run is `repeats` rounds of `nrays` rays. Round `i` draws from its own
//! generator seeded by [`round_seed`]`(seed, i, attempt)`, so its result
//! depends on nothing but the round number. Rounds are dispatched in waves
//! of `processes` and the wave results are merged in round order; the
//! merged tallies are therefore bit-identical for any worker count.
//!
//! While some histogram still waits for automatic limits the first wave holds
//! a single round. Later waves are full; a round that fixed its own limits
//! for a histogram the merge has meanwhile fixed differently is binned again
//! from its seed on the merged grid, so the result matches a one-worker run.
//!
//! After each wave the driver reports a [`Progress`] (to the log and to an
//! optional observer) including the mean and standard error of the accepted
//! fraction per round, and checks the cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use grazer_core::{Beamline, ConfigError, HistogramError, SimulationConfig, TallySet, TraceError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{ComputeBackend, ComputeError, RoundTask};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("Round {round} failed twice: {source}")]
    RoundFailed {
        round: u64,
        #[source]
        source: TraceError,
    },

    #[error("Merging round results failed: {0}")]
    Merge(#[from] HistogramError),
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Seed of round `round`, try `attempt`, under master seed `master`.
pub fn round_seed(master: u64, round: u64, attempt: u32) -> u64 {
    splitmix64(master ^ splitmix64(round ^ ((attempt as u64) << 56)))
}

/// Running statistics of a per-round score (mean, sample standard
/// deviation, standard error of the mean and relative error).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub rounds: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub std_error: f64,
    pub rel_error: f64,
}

impl BatchStatistics {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
        let std_dev = variance.sqrt();
        let std_error = std_dev / n.sqrt();
        Self {
            rounds: samples.len() as u64,
            mean,
            std_dev,
            std_error,
            rel_error: if mean > 0.0 { std_error / mean } else { 0.0 },
        }
    }
}

/// Snapshot handed to the observer after every wave.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub rounds_done: u64,
    pub rounds_total: u64,
    pub rays_traced: u64,
    pub accepted: u64,
    /// Accepted fraction per round.
    pub acceptance: BatchStatistics,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tallies: TallySet,
    pub rounds_completed: u64,
    pub rays_traced: u64,
    pub cancelled: bool,
    pub retries: u64,
    pub acceptance: BatchStatistics,
}

type Observer = Box<dyn Fn(&Progress) + Send + Sync>;

/// Executes a beamline repeatedly on a compute backend.
pub struct RunDriver {
    beamline: Arc<Beamline>,
    config: SimulationConfig,
    backend: Arc<dyn ComputeBackend>,
    cancel: Arc<AtomicBool>,
    observer: Option<Observer>,
}

impl RunDriver {
    pub fn new(
        beamline: Arc<Beamline>,
        config: SimulationConfig,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self, RunError> {
        config.validate()?;
        Ok(Self {
            beamline,
            config,
            backend,
            cancel: Arc::new(AtomicBool::new(false)),
            observer: None,
        })
    }

    pub fn with_observer(mut self, observer: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Flag checked between waves; set it to stop the run early.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run every round and merge the results into a copy of `template`.
    pub fn run(&self, template: &TallySet) -> Result<RunReport, RunError> {
        let total = self.config.repeats as u64;
        let processes = self.config.processes.max(1);
        log::info!(
            "running {} round(s) of {} rays on {} ({} per wave)",
            total,
            self.config.nrays,
            self.backend.device_info().name,
            processes
        );

        let mut merged = template.empty_like();
        let mut acceptance = Vec::with_capacity(self.config.repeats);
        let mut retries = 0u64;
        let mut next = 0u64;
        let mut cancelled = false;

        while next < total {
            if self.cancel.load(Ordering::Relaxed) {
                log::info!("run cancelled after {} round(s)", next);
                cancelled = true;
                break;
            }

            let wave_size = if next == 0 && merged.needs_limits() { 1 } else { processes as u64 };
            let wave_end = (next + wave_size).min(total);
            let mut tasks: Vec<RoundTask> = (next..wave_end).map(|i| self.task(i, 0)).collect();

            let wave_template = merged.empty_like();
            let round_fn = |task: RoundTask| {
                let mut rng = StdRng::seed_from_u64(task.seed);
                self.beamline.tally(&self.config, &wave_template, &mut rng)
            };

            let mut results = self.backend.run_rounds(&tasks, &round_fn)?;
            let failed: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_err())
                .map(|(i, _)| i)
                .collect();
            if !failed.is_empty() {
                for &i in &failed {
                    if let Err(e) = &results[i] {
                        log::warn!("round {} failed ({}); retrying with a fresh seed", tasks[i].index, e);
                    }
                }
                let retry_tasks: Vec<RoundTask> = failed.iter().map(|&i| self.task(tasks[i].index, 1)).collect();
                let retried = self.backend.run_rounds(&retry_tasks, &round_fn)?;
                retries += retry_tasks.len() as u64;
                for ((&i, task), result) in failed.iter().zip(retry_tasks).zip(retried) {
                    results[i] = result;
                    tasks[i] = task;
                }
            }

            for (task, result) in tasks.iter().zip(results) {
                let mut set = result.map_err(|source| RunError::RoundFailed { round: task.index, source })?;
                if merged.grid_conflicts(&set) {
                    log::debug!("round {} binned again on the merged plot limits", task.index);
                    let mut rng = StdRng::seed_from_u64(task.seed);
                    set = self
                        .beamline
                        .tally(&self.config, &merged.empty_like(), &mut rng)
                        .map_err(|source| RunError::RoundFailed { round: task.index, source })?;
                }
                acceptance.push(set.accepted as f64 / self.config.nrays as f64);
                merged.merge(&set)?;
            }
            next = wave_end;

            let progress = Progress {
                rounds_done: next,
                rounds_total: total,
                rays_traced: merged.rays_shone,
                accepted: merged.accepted,
                acceptance: BatchStatistics::from_samples(&acceptance),
            };
            log::debug!(
                "{}/{} rounds, {} rays, acceptance {:.4e} +- {:.2e}",
                progress.rounds_done,
                progress.rounds_total,
                progress.rays_traced,
                progress.acceptance.mean,
                progress.acceptance.std_error
            );
            if let Some(observer) = &self.observer {
                observer(&progress);
            }
        }

        let report = RunReport {
            rounds_completed: next,
            rays_traced: merged.rays_shone,
            cancelled,
            retries,
            acceptance: BatchStatistics::from_samples(&acceptance),
            tallies: merged,
        };
        log::info!(
            "finished {} round(s): {} rays traced, {} accepted",
            report.rounds_completed,
            report.rays_traced,
            report.tallies.accepted
        );
        Ok(report)
    }

    fn task(&self, index: u64, attempt: u32) -> RoundTask {
        RoundTask {
            index,
            attempt,
            seed: round_seed(self.config.seed, index, attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_seeds_are_distinct() {
        let seeds: std::collections::HashSet<u64> = (0..1000)
            .flat_map(|i| [round_seed(7, i, 0), round_seed(7, i, 1)])
            .collect();
        assert_eq!(seeds.len(), 2000);
        assert_eq!(round_seed(7, 3, 0), round_seed(7, 3, 0));
        assert_ne!(round_seed(7, 3, 0), round_seed(8, 3, 0));
    }

    #[test]
    fn test_batch_statistics() {
        let stats = BatchStatistics::from_samples(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(stats.rounds, 4);
        assert_relative_eq!(stats.mean, 0.25, epsilon = 1e-12);
        assert_relative_eq!(stats.std_dev, (0.05_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(stats.std_error, stats.std_dev / 2.0, epsilon = 1e-12);
        assert_eq!(BatchStatistics::from_samples(&[]), BatchStatistics::default());
    }
}
