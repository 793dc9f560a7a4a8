//! Reflectivity provider trait.
//!
//! All wall materials implement [`ReflectivityProvider`], which returns the
//! complex Fresnel reflection amplitudes at a grazing angle and energy. The
//! ray tracer reduces those to a single [`Reflectivity`] for a ray's
//! polarisation state.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from material providers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MaterialError {
    #[error("Energy {energy_ev} eV is outside the data range [{min}, {max}] eV")]
    OutOfRange { energy_ev: f64, min: f64, max: f64 },

    #[error("Material not found: {0}")]
    NotFound(String),

    #[error("Data error: {0}")]
    DataError(String),
}

/// Complex Fresnel reflection amplitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FresnelAmplitudes {
    pub rs: Complex64,
    pub rp: Complex64,
}

/// Reflectivity seen by one ray at one bounce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reflectivity {
    /// Field amplitude $\sqrt{R}$; the intensity factor is `amplitude²`.
    pub amplitude: f64,
    /// Phase shift on reflection (rad).
    pub phase: f64,
}

impl Reflectivity {
    /// Intensity reflectance $R$.
    pub fn intensity(&self) -> f64 {
        self.amplitude * self.amplitude
    }
}

/// Provides grazing-incidence reflection amplitudes.
///
/// Implementations must be `Send + Sync`: a single provider instance is
/// shared by every worker during a run.
pub trait ReflectivityProvider: Send + Sync {
    /// Human-readable name of this material.
    fn name(&self) -> &str;

    /// Energy range over which data is available (eV).
    fn energy_range(&self) -> (f64, f64);

    /// Fresnel amplitudes at grazing angle `theta` (rad) and `energy_ev`.
    fn fresnel(&self, theta: f64, energy_ev: f64) -> Result<FresnelAmplitudes, MaterialError>;

    /// Reflectivity for a ray whose field is a fraction `s_fraction` s-polarised
    /// (by intensity).
    ///
    /// The reflectance mixes incoherently,
    /// $R = f_s \lvert r_s \rvert^2 + (1 - f_s) \lvert r_p \rvert^2$,
    /// and the phase is the same intensity-weighted mix of the two phases.
    fn reflectivity(
        &self,
        theta: f64,
        energy_ev: f64,
        s_fraction: f64,
    ) -> Result<Reflectivity, MaterialError> {
        let amps = self.fresnel(theta, energy_ev)?;
        let fs = s_fraction.clamp(0.0, 1.0);
        let r = fs * amps.rs.norm_sqr() + (1.0 - fs) * amps.rp.norm_sqr();
        Ok(Reflectivity {
            amplitude: r.max(0.0).sqrt(),
            phase: fs * amps.rs.arg() + (1.0 - fs) * amps.rp.arg(),
        })
    }
}

/// A lossless mirror: $r_s = r_p = 1$ at every angle and energy.
#[derive(Debug, Clone, Default)]
pub struct IdealMirror;

impl ReflectivityProvider for IdealMirror {
    fn name(&self) -> &str {
        "ideal"
    }

    fn energy_range(&self) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }

    fn fresnel(&self, _theta: f64, _energy_ev: f64) -> Result<FresnelAmplitudes, MaterialError> {
        let one = Complex64::new(1.0, 0.0);
        Ok(FresnelAmplitudes { rs: one, rp: one })
    }
}
