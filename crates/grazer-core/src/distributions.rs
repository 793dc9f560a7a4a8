//! Scalar random distributions used by ray sources.
//!
//! | Kind | Parameters (config form) | Sample |
//! |------|--------------------------|--------|
//! | `flat` | `w` or `(min, max)` | uniform on `[-w/2, w/2]` or `[min, max]` |
//! | `normal` | `sigma` or `(mean, sigma)` | Gaussian |
//! | `annulus` | `outer` or `(inner, outer)` | magnitude between two bounds, with azimuth |
//! | `lines` | `(v1, v2, ...)` | uniform choice among the values |
//!
//! The annulus couples two orthogonal components. For angles the polar
//! angle is uniform in solid angle ($\cos\theta$ uniform); for positions the
//! radius is uniform in area. The azimuth is uniform in both cases.
//!
//! All sampling is driven by the caller's generator, so a fixed seed and
//! call sequence reproduce the output bit for bit.

use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// A scalar distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    Flat { min: f64, max: f64 },
    Normal { mean: f64, sigma: f64 },
    Annulus { inner: f64, outer: f64 },
    Lines { values: Vec<f64> },
}

impl Default for Distribution {
    fn default() -> Self {
        Self::fixed(0.0)
    }
}

impl Distribution {
    /// Zero-width distribution.
    pub fn fixed(value: f64) -> Self {
        Distribution::Flat { min: value, max: value }
    }

    /// Build from a kind name and its parameter list (see the module table).
    ///
    /// `what` names the quantity in error messages.
    pub fn from_kind(kind: &str, params: &[f64], what: &str) -> Result<Self, ConfigError> {
        let bad = |reason: &str| ConfigError::InvalidDistribution {
            what: what.to_string(),
            reason: reason.to_string(),
        };
        let dist = match (kind.to_ascii_lowercase().as_str(), params) {
            ("flat", [w]) => Distribution::Flat { min: -0.5 * w, max: 0.5 * w },
            ("flat", [min, max]) => Distribution::Flat { min: *min, max: *max },
            ("flat", _) => return Err(bad("flat takes a width or (min, max)")),
            ("normal", [sigma]) => Distribution::Normal { mean: 0.0, sigma: *sigma },
            ("normal", [mean, sigma]) => Distribution::Normal { mean: *mean, sigma: *sigma },
            ("normal", _) => return Err(bad("normal takes sigma or (mean, sigma)")),
            ("annulus", [outer]) => Distribution::Annulus { inner: 0.0, outer: *outer },
            ("annulus", [inner, outer]) => Distribution::Annulus { inner: *inner, outer: *outer },
            ("annulus", _) => return Err(bad("annulus takes outer or (inner, outer)")),
            ("lines", values) => Distribution::Lines { values: values.to_vec() },
            (other, _) => return Err(ConfigError::UnknownDistribution(other.to_string())),
        };
        dist.validate(what)?;
        Ok(dist)
    }

    /// Check parameter consistency.
    pub fn validate(&self, what: &str) -> Result<(), ConfigError> {
        let bad = |reason: String| {
            Err(ConfigError::InvalidDistribution { what: what.to_string(), reason })
        };
        match self {
            Distribution::Flat { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return bad("flat bounds must be finite".into());
                }
                if min > max {
                    return bad(format!("flat min {} exceeds max {}", min, max));
                }
            }
            Distribution::Normal { mean, sigma } => {
                if !mean.is_finite() || !sigma.is_finite() || *sigma < 0.0 {
                    return bad(format!("normal needs finite mean and sigma >= 0, got ({}, {})", mean, sigma));
                }
            }
            Distribution::Annulus { inner, outer } => {
                if !inner.is_finite() || !outer.is_finite() || *inner < 0.0 {
                    return bad("annulus bounds must be finite and non-negative".into());
                }
                if inner >= outer {
                    return bad(format!("annulus inner bound {} must be below outer {}", inner, outer));
                }
            }
            Distribution::Lines { values } => {
                if values.is_empty() {
                    return bad("lines needs at least one value".into());
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return bad("lines values must be finite".into());
                }
            }
        }
        Ok(())
    }

    pub fn is_annulus(&self) -> bool {
        matches!(self, Distribution::Annulus { .. })
    }

    /// Representative values: every line, both flat edges, the normal mean
    /// or the annulus bounds.
    pub fn nominal_values(&self) -> Vec<f64> {
        match self {
            Distribution::Flat { min, max } => vec![*min, *max],
            Distribution::Normal { mean, .. } => vec![*mean],
            Distribution::Annulus { inner, outer } => vec![*inner, *outer],
            Distribution::Lines { values } => values.clone(),
        }
    }

    /// Draw `n` scalar samples.
    ///
    /// For `annulus` this is the polar magnitude (uniform in solid angle);
    /// use [`sample_annulus_angles`] or [`sample_annulus_area`] when the
    /// azimuth is needed as well.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Result<Vec<f64>, ConfigError> {
        let out = match self {
            Distribution::Flat { min, max } => {
                let (lo, width) = (*min, max - min);
                (0..n).map(|_| lo + width * rng.gen::<f64>()).collect()
            }
            Distribution::Normal { mean, sigma } => {
                let normal = Normal::new(*mean, *sigma).map_err(|e| {
                    ConfigError::InvalidDistribution { what: "normal".into(), reason: e.to_string() }
                })?;
                (0..n).map(|_| rng.sample(normal)).collect()
            }
            Distribution::Annulus { inner, outer } => sample_annulus_angles(*inner, *outer, rng, n)
                .into_iter()
                .map(|(theta, _)| theta)
                .collect(),
            Distribution::Lines { values } => {
                (0..n).map(|_| values[rng.gen_range(0..values.len())]).collect()
            }
        };
        Ok(out)
    }
}

/// `(theta, psi)` pairs: polar angle with $\cos\theta$ uniform on
/// $[\cos\theta_{out}, \cos\theta_{in}]$ and uniform azimuth $\psi$.
pub fn sample_annulus_angles<R: Rng + ?Sized>(
    inner: f64,
    outer: f64,
    rng: &mut R,
    n: usize,
) -> Vec<(f64, f64)> {
    let (c_in, c_out) = (inner.cos(), outer.cos());
    (0..n)
        .map(|_| {
            let cos_t = c_out + (c_in - c_out) * rng.gen::<f64>();
            let psi = std::f64::consts::TAU * rng.gen::<f64>();
            (cos_t.clamp(-1.0, 1.0).acos(), psi)
        })
        .collect()
}

/// `(r, psi)` pairs with the radius uniform in area between the bounds.
pub fn sample_annulus_area<R: Rng + ?Sized>(
    inner: f64,
    outer: f64,
    rng: &mut R,
    n: usize,
) -> Vec<(f64, f64)> {
    let (a_in, a_out) = (inner * inner, outer * outer);
    (0..n)
        .map(|_| {
            let r = (a_in + (a_out - a_in) * rng.gen::<f64>()).sqrt();
            let psi = std::f64::consts::TAU * rng.gen::<f64>();
            (r, psi)
        })
        .collect()
}
