//! Run-level settings and configuration errors.
//!
//! [`SimulationConfig`] is built once, validated, and passed by reference to
//! every constructor and run; nothing in the crate keeps global state.

use grazer_geometry::GeometryError;
use grazer_materials::MaterialError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors detected before any ray is traced. All are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown distribution kind '{0}' (expected flat, normal, annulus or lines)")]
    UnknownDistribution(String),

    #[error("Invalid distribution for {what}: {reason}")]
    InvalidDistribution { what: String, reason: String },

    #[error("Invalid run settings: {0}")]
    InvalidRun(String),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Material error: {0}")]
    Material(#[from] MaterialError),

    #[error("Duplicate beam name '{0}'")]
    DuplicateName(String),

    #[error("Unknown beam '{0}'")]
    UnknownBeam(String),

    #[error("Invalid plot '{plot}': {reason}")]
    InvalidPlot { plot: String, reason: String },
}

/// How wall reflectivity is applied to a ray.
///
/// `Weight` multiplies the ray intensity by $R$ at each bounce and never
/// loses rays. `Stochastic` keeps unit weights and absorbs a ray with
/// probability $1 - R$; it reproduces the same mean at higher variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectivityPolicy {
    #[default]
    Weight,
    Stochastic,
}

/// Immutable settings of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Rays generated per propagation round.
    #[serde(default = "default_nrays")]
    pub nrays: usize,
    /// Number of independent rounds.
    #[serde(default = "default_repeats")]
    pub repeats: usize,
    /// Worker count.
    #[serde(default = "default_processes")]
    pub processes: usize,
    /// Master seed; each round derives its own stream from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub policy: ReflectivityPolicy,
}

fn default_nrays() -> usize {
    1000
}
fn default_repeats() -> usize {
    1
}
fn default_processes() -> usize {
    1
}
fn default_seed() -> u64 {
    0x5EED
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nrays: default_nrays(),
            repeats: default_repeats(),
            processes: default_processes(),
            seed: default_seed(),
            policy: ReflectivityPolicy::default(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nrays == 0 {
            return Err(ConfigError::InvalidRun("nrays must be at least 1".into()));
        }
        if self.repeats == 0 {
            return Err(ConfigError::InvalidRun("repeats must be at least 1".into()));
        }
        if self.processes == 0 {
            return Err(ConfigError::InvalidRun("processes must be at least 1".into()));
        }
        if self.processes > self.repeats {
            return Err(ConfigError::InvalidRun(format!(
                "processes ({}) exceeds repeats ({}); workers would idle",
                self.processes, self.repeats
            )));
        }
        Ok(())
    }

    /// Total rays traced by a complete run.
    pub fn total_rays(&self) -> u64 {
        self.nrays as u64 * self.repeats as u64
    }
}
