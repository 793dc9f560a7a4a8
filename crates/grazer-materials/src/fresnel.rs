//! Fresnel coefficients at grazing incidence.
//!
//! In the X-ray range the refractive index is written
//! $n = 1 - \delta + i\beta$ with $\delta, \beta \ll 1$. For a grazing angle
//! $\theta$ (measured from the surface) the normal wave-vector components are
//!
//! $$k_{i,z} = \sin\theta, \qquad k_{t,z} = \sqrt{n^2 - \cos^2\theta}$$
//!
//! in units of the vacuum wavenumber, and
//!
//! $$r_s = \frac{k_{i,z} - k_{t,z}}{k_{i,z} + k_{t,z}}, \qquad
//!   r_p = \frac{n^2 k_{i,z} - k_{t,z}}{n^2 k_{i,z} + k_{t,z}}$$
//!
//! Below the critical angle $\theta_c \approx \sqrt{2\delta}$ the reflection
//! is total apart from absorption losses.

use num_complex::Complex64;

use crate::provider::FresnelAmplitudes;

/// Complex refractive index from the optical constants.
pub fn refractive_index(delta: f64, beta: f64) -> Complex64 {
    Complex64::new(1.0 - delta, beta)
}

/// Critical angle for total external reflection (rad).
pub fn critical_angle(delta: f64) -> f64 {
    (2.0 * delta).max(0.0).sqrt()
}

/// Fresnel amplitudes for a vacuum/medium interface at grazing angle `theta`.
pub fn fresnel_amplitudes(n: Complex64, theta: f64) -> FresnelAmplitudes {
    let (sin_t, cos_t) = theta.sin_cos();
    let kiz = Complex64::new(sin_t, 0.0);
    let n2 = n * n;
    let ktz = (n2 - Complex64::new(cos_t * cos_t, 0.0)).sqrt();

    let rs = (kiz - ktz) / (kiz + ktz);
    let rp = (n2 * kiz - ktz) / (n2 * kiz + ktz);
    FresnelAmplitudes { rs, rp }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DELTA: f64 = 5.7e-6;

    #[test]
    fn test_total_reflection_below_critical_angle() {
        let n = refractive_index(DELTA, 0.0);
        let theta_c = critical_angle(DELTA);
        for &frac in &[0.1, 0.5, 0.9] {
            let amps = fresnel_amplitudes(n, frac * theta_c);
            assert_relative_eq!(amps.rs.norm(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(amps.rp.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_reflectance_falls_above_critical_angle() {
        let n = refractive_index(DELTA, 6e-8);
        let theta_c = critical_angle(DELTA);
        let below = fresnel_amplitudes(n, 0.5 * theta_c).rs.norm_sqr();
        let above = fresnel_amplitudes(n, 2.0 * theta_c).rs.norm_sqr();
        let far = fresnel_amplitudes(n, 5.0 * theta_c).rs.norm_sqr();
        assert!(below > 0.9, "R below critical = {}", below);
        assert!(above < 0.1, "R at 2 theta_c = {}", above);
        assert!(far < above, "R must keep falling: {} vs {}", far, above);
    }

    #[test]
    fn test_absorption_reduces_reflectance() {
        let theta = 0.5 * critical_angle(DELTA);
        let lossless = fresnel_amplitudes(refractive_index(DELTA, 0.0), theta).rs.norm_sqr();
        let lossy = fresnel_amplitudes(refractive_index(DELTA, 1e-6), theta).rs.norm_sqr();
        assert!(lossy < lossless);
    }

    #[test]
    fn test_s_and_p_nearly_equal_at_grazing_incidence() {
        let n = refractive_index(DELTA, 6e-8);
        let amps = fresnel_amplitudes(n, 0.003);
        assert_relative_eq!(amps.rs.norm_sqr(), amps.rp.norm_sqr(), max_relative = 1e-3);
    }
}
