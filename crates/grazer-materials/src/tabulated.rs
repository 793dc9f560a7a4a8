//! Tabulated X-ray optical constants.
//!
//! Each material stores $\delta(E)$ and $\beta(E)$ at a reference density,
//! splined in log-log space. Both constants are proportional to the electron
//! (and atom) density, so [`TabulatedMaterial::with_density`] rescales them
//! linearly.
//!
//! ## Available materials
//!
//! | Identifier | Constructor | Density (g/cm³) | Energy range |
//! |-----------|-------------|-----------------|--------------|
//! | `SiO2` | [`TabulatedMaterial::fused_silica()`] | 2.2 | 2–30 keV |
//! | `Pt` | [`TabulatedMaterial::platinum()`] | 21.45 | 4–11 keV |
//!
//! Values are power-law fits through the Henke atomic scattering factors at
//! Cu Kα and 9 keV, valid between absorption edges. The platinum table
//! stops below the L₃ edge (11.56 keV).

use num_complex::Complex64;

use crate::fresnel::{critical_angle, fresnel_amplitudes, refractive_index};
use crate::provider::{FresnelAmplitudes, MaterialError, ReflectivityProvider};
use crate::spline::CubicSpline;

/// Identifiers and descriptions of the built-in materials.
pub const BUILTIN_MATERIALS: &[(&str, &str)] = &[
    ("SiO2", "Fused silica (glass capillaries), rho = 2.2 g/cm3, 2-30 keV"),
    ("Pt", "Platinum (mirror coatings), rho = 21.45 g/cm3, 4-11 keV"),
];

/// Material with spline-interpolated optical constants.
#[derive(Debug, Clone)]
pub struct TabulatedMaterial {
    name: String,
    reference_density: f64,
    density: f64,
    energy_range: (f64, f64),
    spline_delta: CubicSpline,
    spline_beta: CubicSpline,
}

impl TabulatedMaterial {
    /// Construct from tabulated data.
    ///
    /// # Arguments
    /// * `name` - Material identifier string.
    /// * `density` - Density (g/cm³) at which the table was computed.
    /// * `data` - `(E/eV, delta, beta)` rows with strictly increasing energy.
    pub fn new(
        name: impl Into<String>,
        density: f64,
        data: &[(f64, f64, f64)],
    ) -> Result<Self, MaterialError> {
        if !(density > 0.0) {
            return Err(MaterialError::DataError(format!(
                "density must be positive, got {}",
                density
            )));
        }
        let energies: Vec<f64> = data.iter().map(|&(e, _, _)| e).collect();
        let deltas: Vec<f64> = data.iter().map(|&(_, d, _)| d).collect();
        let betas: Vec<f64> = data.iter().map(|&(_, _, b)| b).collect();
        let spline_delta = CubicSpline::log_log(&energies, &deltas)?;
        let spline_beta = CubicSpline::log_log(&energies, &betas)?;
        Ok(Self {
            name: name.into(),
            reference_density: density,
            density,
            energy_range: (energies[0], energies[energies.len() - 1]),
            spline_delta,
            spline_beta,
        })
    }

    /// Fused silica SiO₂ at 2.2 g/cm³.
    pub fn fused_silica() -> Result<Self, MaterialError> {
        // (E/eV, delta, beta)
        let data: &[(f64, f64, f64)] = &[
            (2000.0, 1.154e-04, 1.845e-05),
            (3000.0, 5.130e-05, 3.953e-06),
            (4000.0, 2.886e-05, 1.325e-06),
            (5000.0, 1.847e-05, 5.675e-07),
            (6000.0, 1.283e-05, 2.838e-07),
            (7000.0, 9.422e-06, 1.580e-07),
            (8000.0, 7.214e-06, 9.512e-08),
            (9000.0, 5.700e-06, 6.080e-08),
            (10000.0, 4.617e-06, 4.074e-08),
            (12000.0, 3.206e-06, 2.038e-08),
            (15000.0, 2.052e-06, 8.727e-09),
            (20000.0, 1.154e-06, 2.925e-09),
            (25000.0, 7.387e-07, 1.253e-09),
            (30000.0, 5.130e-07, 6.266e-10),
        ];
        Self::new("SiO2", 2.2, data)
    }

    /// Platinum at 21.45 g/cm³.
    pub fn platinum() -> Result<Self, MaterialError> {
        let data: &[(f64, f64, f64)] = &[
            (4000.0, 1.943e-04, 3.258e-05),
            (5000.0, 1.244e-04, 1.744e-05),
            (6000.0, 8.636e-05, 1.047e-05),
            (7000.0, 6.345e-05, 6.798e-06),
            (8000.0, 4.858e-05, 4.678e-06),
            (9000.0, 3.838e-05, 3.364e-06),
            (10000.0, 3.109e-05, 2.504e-06),
            (11000.0, 2.569e-05, 1.918e-06),
        ];
        Self::new("Pt", 21.45, data)
    }

    /// Look up a built-in material by identifier (case-insensitive).
    pub fn builtin(id: &str) -> Result<Self, MaterialError> {
        match id.to_ascii_lowercase().as_str() {
            "sio2" | "fused_silica" | "glass" => Self::fused_silica(),
            "pt" | "platinum" => Self::platinum(),
            _ => Err(MaterialError::NotFound(format!(
                "'{}' (available: {})",
                id,
                BUILTIN_MATERIALS
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Rescale the optical constants to a different density.
    pub fn with_density(mut self, density: f64) -> Result<Self, MaterialError> {
        if !(density > 0.0) || !density.is_finite() {
            return Err(MaterialError::DataError(format!(
                "density must be positive, got {}",
                density
            )));
        }
        self.density = density;
        Ok(self)
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    /// $(\delta, \beta)$ at `energy_ev`.
    pub fn optical_constants(&self, energy_ev: f64) -> Result<(f64, f64), MaterialError> {
        let (lo, hi) = self.energy_range;
        if !(energy_ev >= lo && energy_ev <= hi) {
            return Err(MaterialError::OutOfRange { energy_ev, min: lo, max: hi });
        }
        let scale = self.density / self.reference_density;
        Ok((
            scale * self.spline_delta.evaluate_log_log(energy_ev),
            scale * self.spline_beta.evaluate_log_log(energy_ev),
        ))
    }

    /// Complex refractive index $n = 1 - \delta + i\beta$.
    pub fn refractive_index(&self, energy_ev: f64) -> Result<Complex64, MaterialError> {
        let (delta, beta) = self.optical_constants(energy_ev)?;
        Ok(refractive_index(delta, beta))
    }

    /// Critical angle $\theta_c \approx \sqrt{2\delta}$ (rad).
    pub fn critical_angle(&self, energy_ev: f64) -> Result<f64, MaterialError> {
        let (delta, _) = self.optical_constants(energy_ev)?;
        Ok(critical_angle(delta))
    }
}

impl ReflectivityProvider for TabulatedMaterial {
    fn name(&self) -> &str {
        &self.name
    }

    fn energy_range(&self) -> (f64, f64) {
        self.energy_range
    }

    fn fresnel(&self, theta: f64, energy_ev: f64) -> Result<FresnelAmplitudes, MaterialError> {
        let n = self.refractive_index(energy_ev)?;
        Ok(fresnel_amplitudes(n, theta))
    }
}
