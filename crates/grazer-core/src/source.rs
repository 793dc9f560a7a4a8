//! Geometric X-ray source.
//!
//! Every ray is sampled independently: a transverse offset `(x, z)` around
//! the source centre, a divergence `(x', z')`, an energy and a fixed
//! polarisation. The direction is built so that $\arctan(d_x / d_y) = x'$
//! and $\arctan(d_z / d_y) = z'$ exactly:
//!
//! $$\hat{d} = \frac{(\tan x',\ 1,\ \tan z')}{\lVert(\tan x',\ 1,\ \tan z')\rVert}$$
//!
//! An `annulus` on `distx` couples `x` and `z` (radius uniform in area); an
//! `annulus` on `distxprime` couples `x'` and `z'` into a cone shell with the
//! polar angle uniform in solid angle. Annuli on the `z` axes are rejected.

use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::distributions::{sample_annulus_angles, sample_annulus_area, Distribution};
use crate::rays::{Polarization, Ray, RayBatch, RayStatus};

/// Default photon energy (eV).
pub const DEFAULT_ENERGY_EV: f64 = 9000.0;

/// A source that shines rays from sampled positions, angles and energies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometricSource {
    /// Source centre (mm).
    #[serde(default)]
    pub center: [f64; 3],
    #[serde(default)]
    pub distx: Distribution,
    #[serde(default)]
    pub distz: Distribution,
    #[serde(default)]
    pub distxprime: Distribution,
    #[serde(default)]
    pub distzprime: Distribution,
    #[serde(default = "default_energies")]
    pub energies: Distribution,
    #[serde(default)]
    pub polarization: Polarization,
}

fn default_energies() -> Distribution {
    Distribution::Lines { values: vec![DEFAULT_ENERGY_EV] }
}

impl Default for GeometricSource {
    fn default() -> Self {
        Self {
            center: [0.0; 3],
            distx: Distribution::default(),
            distz: Distribution::default(),
            distxprime: Distribution::default(),
            distzprime: Distribution::default(),
            energies: default_energies(),
            polarization: Polarization::default(),
        }
    }
}

impl GeometricSource {
    /// Check every distribution and the annulus placement rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.distx.validate("distx")?;
        self.distz.validate("distz")?;
        self.distxprime.validate("distxprime")?;
        self.distzprime.validate("distzprime")?;
        self.energies.validate("energies")?;

        let misplaced = |what: &str| ConfigError::InvalidDistribution {
            what: what.to_string(),
            reason: "annulus couples two axes and is only allowed on the x axis".into(),
        };
        if self.distz.is_annulus() {
            return Err(misplaced("distz"));
        }
        if self.distzprime.is_annulus() {
            return Err(misplaced("distzprime"));
        }
        if self.energies.is_annulus() {
            return Err(ConfigError::InvalidDistribution {
                what: "energies".into(),
                reason: "annulus is not an energy distribution".into(),
            });
        }
        if let Distribution::Annulus { outer, .. } = self.distxprime {
            if outer >= std::f64::consts::FRAC_PI_2 {
                return Err(ConfigError::InvalidDistribution {
                    what: "distxprime".into(),
                    reason: format!("annulus half-angle {} rad leaves the forward hemisphere", outer),
                });
            }
        }
        for (what, dist) in [("distxprime", &self.distxprime), ("distzprime", &self.distzprime)] {
            if let Distribution::Flat { min, max } = dist {
                if min.abs() >= std::f64::consts::FRAC_PI_2 || max.abs() >= std::f64::consts::FRAC_PI_2 {
                    return Err(ConfigError::InvalidDistribution {
                        what: what.into(),
                        reason: "divergence must stay below pi/2".into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Generate `n` fresh rays.
    ///
    /// Rays with a non-positive energy or a direction that fails to normalise
    /// are returned with status `Invalid`.
    pub fn shine<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<RayBatch, ConfigError> {
        let (xs, zs): (Vec<f64>, Vec<f64>) = match self.distx {
            Distribution::Annulus { inner, outer } => sample_annulus_area(inner, outer, rng, n)
                .into_iter()
                .map(|(r, psi)| (r * psi.cos(), r * psi.sin()))
                .unzip(),
            _ => (self.distx.sample(rng, n)?, self.distz.sample(rng, n)?),
        };

        let directions: Vec<Vector3<f64>> = match self.distxprime {
            Distribution::Annulus { inner, outer } => sample_annulus_angles(inner, outer, rng, n)
                .into_iter()
                .map(|(theta, psi)| {
                    let (sin_t, cos_t) = theta.sin_cos();
                    Vector3::new(sin_t * psi.cos(), cos_t, sin_t * psi.sin())
                })
                .collect(),
            _ => {
                let xp = self.distxprime.sample(rng, n)?;
                let zp = self.distzprime.sample(rng, n)?;
                xp.iter()
                    .zip(&zp)
                    .map(|(xp, zp)| Vector3::new(xp.tan(), 1.0, zp.tan()))
                    .collect()
            }
        };

        let energies = self.energies.sample(rng, n)?;
        let center = Vector3::new(self.center[0], self.center[1], self.center[2]);

        let mut batch = RayBatch::with_capacity(n);
        for i in 0..n {
            let raw = directions[i];
            let norm = raw.norm();
            let position = center + Vector3::new(xs[i], 0.0, zs[i]);
            let mut ray = Ray::new(position, raw / norm, energies[i], self.polarization);
            if !norm.is_finite() || norm == 0.0 || !(energies[i] > 0.0) {
                log::trace!("source ray {} invalid (|d| = {}, E = {})", i, norm, energies[i]);
                ray.direction = Vector3::y();
                ray.status = RayStatus::Invalid;
            }
            batch.push(ray);
        }
        Ok(batch)
    }
}
