//! Straight capillary with a linear radius profile.
//!
//! The capillary points its entrance at a sample located at the local origin,
//! a distance `r_sample` upstream, and ends at the focal plane `y = f`. With
//! $s = f - y$ and $s_0 = f - R_{\text{sample}} \cos\alpha$:
//!
//! | Quantity | Value |
//! |----------|-------|
//! | axis $x_0(s)$ | `axis_offset` (constant) |
//! | radius $r_0(s)$ | $-a_r (s - s_0) + r_{\text{in}}$, $a_r = (r_{\text{out}} - r_{\text{in}}) / s_0$ |
//! | valid $y$ | `lim_phys_y`, default $[R_{\text{sample}} \cos\alpha,\ f]$ |
//!
//! So the bore radius is `r_in` at the entrance ($s = s_0$) and `r_out` at the
//! focal end ($s = 0$). Because the profile is linear in $y$ the wall equation
//! is a quadratic in the ray parameter and is solved in closed form.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::surface::{Intersection, LocalCoords, MissReason, ParametricSurface, SurfaceHit, MIN_TRAVEL};
use crate::GeometryError;

/// User-facing capillary parameters (mm, rad).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapillaryParams {
    /// Distance from the sample (source) to the capillary entrance.
    pub r_sample: f64,
    /// Position of the focal end along `y`.
    pub f: f64,
    /// Bore radius at the entrance.
    pub r_in: f64,
    /// Bore radius at the focal end.
    pub r_out: f64,
    /// Angle between the capillary and the sample direction.
    pub entrance_alpha: f64,
    /// Constant displacement of the axis along `x`.
    #[serde(default)]
    pub axis_offset: f64,
    /// Physical limits along `y`; defaults to the entrance and focal planes.
    #[serde(default)]
    pub lim_phys_y: Option<[f64; 2]>,
}

/// A straight, possibly tapered, capillary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CapillaryParams", into = "CapillaryParams")]
pub struct StraightCapillary {
    params: CapillaryParams,
    s0: f64,
    ar: f64,
    br: f64,
    s_min: f64,
    s_max: f64,
}

impl StraightCapillary {
    /// Build and validate a capillary.
    pub fn new(params: CapillaryParams) -> Result<Self, GeometryError> {
        let p = &params;
        for (name, value) in [("r_in", p.r_in), ("r_out", p.r_out)] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(GeometryError::NonPositiveRadius { name, value });
            }
        }
        if !(0.0..std::f64::consts::FRAC_PI_2).contains(&p.entrance_alpha) {
            return Err(GeometryError::InvalidLength(format!(
                "entrance_alpha must lie in [0, pi/2), got {}",
                p.entrance_alpha
            )));
        }
        if !(p.r_sample > 0.0) {
            return Err(GeometryError::InvalidLength(format!(
                "r_sample must be positive, got {}",
                p.r_sample
            )));
        }

        let s0 = p.f - p.r_sample * p.entrance_alpha.cos();
        if !(s0 > 0.0) {
            return Err(GeometryError::InvalidLength(format!(
                "capillary length s0 = f - r_sample*cos(alpha) must be positive, got {}",
                s0
            )));
        }
        let ar = (p.r_out - p.r_in) / s0;
        let br = p.r_in;

        let [y_lo, y_hi] = p
            .lim_phys_y
            .unwrap_or([p.r_sample * p.entrance_alpha.cos(), p.f]);
        let (s_min, s_max) = (p.f - y_hi, p.f - y_lo);
        if !(s_max > s_min) {
            return Err(GeometryError::InvalidRange { min: s_min, max: s_max });
        }

        let capillary = Self { params, s0, ar, br, s_min, s_max };
        for s in [s_min, s_max] {
            let r = capillary.local_radius(s);
            if !(r > 0.0) {
                return Err(GeometryError::NonPositiveRadius { name: "r0(s)", value: r });
            }
        }
        Ok(capillary)
    }

    pub fn params(&self) -> &CapillaryParams {
        &self.params
    }

    /// Length parameter $s_0$ of the full capillary.
    pub fn s0(&self) -> f64 {
        self.s0
    }

    /// Local `y` of the entrance plane (`s = s_max`).
    pub fn entrance_y(&self) -> f64 {
        self.params.f - self.s_max
    }

    /// Local `y` of the exit plane (`s = s_min`).
    pub fn exit_y(&self) -> f64 {
        self.params.f - self.s_min
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        Self::new(self.params.clone()).map(|_| ())
    }
}

impl TryFrom<CapillaryParams> for StraightCapillary {
    type Error = GeometryError;

    fn try_from(params: CapillaryParams) -> Result<Self, Self::Error> {
        Self::new(params)
    }
}

impl From<StraightCapillary> for CapillaryParams {
    fn from(c: StraightCapillary) -> Self {
        c.params
    }
}

impl ParametricSurface for StraightCapillary {
    fn axis(&self, _s: f64) -> f64 {
        self.params.axis_offset
    }

    fn axis_slope(&self, _s: f64) -> f64 {
        0.0
    }

    fn local_radius(&self, s: f64) -> f64 {
        -self.ar * (s - self.s0) + self.br
    }

    fn local_radius_slope(&self, _s: f64) -> f64 {
        -self.ar
    }

    fn s_range(&self) -> (f64, f64) {
        (self.s_min, self.s_max)
    }

    fn s_origin(&self) -> f64 {
        self.params.f
    }

    /// Closed-form wall crossing.
    ///
    /// With $r_0 = A + B y$ the condition
    /// $(p_x + t d_x - x_0)^2 + (p_z + t d_z)^2 = (A + B p_y + t B d_y)^2$
    /// is a quadratic $a t^2 + b t + c = 0$. The smallest root beyond
    /// [`MIN_TRAVEL`] with a positive radius and `s` in range wins.
    fn find_intersection(&self, origin: &Vector3<f64>, direction: &Vector3<f64>) -> Intersection {
        let slope = self.ar;
        let intercept = self.br - self.ar * (self.params.f - self.s0);
        let px = origin.x - self.params.axis_offset;
        let pz = origin.z;
        let c0 = intercept + slope * origin.y;
        let c1 = slope * direction.y;

        let a = direction.x * direction.x + direction.z * direction.z - c1 * c1;
        let b = 2.0 * (px * direction.x + pz * direction.z - c0 * c1);
        let c = px * px + pz * pz - c0 * c0;

        let roots: [f64; 2] = if a == 0.0 {
            if b == 0.0 {
                return Intersection::Miss(MissReason::Parallel);
            }
            let t = -c / b;
            [t, t]
        } else {
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                return Intersection::Miss(MissReason::NoRoot);
            }
            // Numerically stable pair; avoids cancellation for rays starting on the wall.
            let q = -0.5 * (b + b.signum() * disc.sqrt());
            if q == 0.0 {
                [0.0, 0.0]
            } else {
                [q / a, c / q]
            }
        };

        let mut best: Option<f64> = None;
        let mut saw_forward_root = false;
        for t in roots {
            if !t.is_finite() || t <= MIN_TRAVEL {
                continue;
            }
            if c0 + c1 * t <= 0.0 {
                continue;
            }
            saw_forward_root = true;
            let y = origin.y + t * direction.y;
            if !self.contains_s(self.params.f - y) {
                continue;
            }
            best = Some(best.map_or(t, |b: f64| b.min(t)));
        }

        match best {
            Some(t) => {
                let point = origin + direction * t;
                let coords: LocalCoords = self.xyz_to_param(&point);
                Intersection::Hit(SurfaceHit { t, point, coords })
            }
            None if saw_forward_root => Intersection::Miss(MissReason::OutsideRange),
            None => Intersection::Miss(MissReason::Behind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{march_intersection, MARCH_STEPS};
    use approx::assert_relative_eq;

    fn mono_params() -> CapillaryParams {
        CapillaryParams {
            r_sample: 10_000.0,
            f: 10_350.0,
            r_in: 0.03,
            r_out: 0.03,
            entrance_alpha: 0.0005,
            axis_offset: 0.0,
            lim_phys_y: None,
        }
    }

    fn tapered() -> StraightCapillary {
        StraightCapillary::new(CapillaryParams {
            r_sample: 100.0,
            f: 200.0,
            r_in: 0.5,
            r_out: 0.2,
            entrance_alpha: 0.0,
            axis_offset: 0.0,
            lim_phys_y: None,
        })
        .unwrap()
    }

    #[test]
    fn test_radius_profile_matches_end_radii() {
        let cap = tapered();
        let (s_min, s_max) = cap.s_range();
        assert_relative_eq!(s_min, 0.0, epsilon = 1e-12);
        assert_relative_eq!(s_max, 100.0, epsilon = 1e-12);
        assert_relative_eq!(cap.local_radius(s_max), 0.5, epsilon = 1e-12);
        assert_relative_eq!(cap.local_radius(s_min), 0.2, epsilon = 1e-12);
        assert_relative_eq!(cap.entrance_y(), 100.0, epsilon = 1e-12);
        assert_relative_eq!(cap.exit_y(), 200.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let mut p = mono_params();
        p.r_in = -0.01;
        assert!(matches!(
            StraightCapillary::new(p),
            Err(GeometryError::NonPositiveRadius { name: "r_in", .. })
        ));

        let mut p = mono_params();
        p.f = 9_000.0;
        assert!(matches!(StraightCapillary::new(p), Err(GeometryError::InvalidLength(_))));

        let mut p = mono_params();
        p.lim_phys_y = Some([10_300.0, 10_100.0]);
        assert!(matches!(StraightCapillary::new(p), Err(GeometryError::InvalidRange { .. })));

        // Taper that closes before the exit plane.
        let mut p = mono_params();
        p.r_out = 0.01;
        p.lim_phys_y = Some([10_000.0, 10_550.0]);
        assert!(StraightCapillary::new(p).is_err());
    }

    #[test]
    fn test_deserialise_validates() {
        let ok: Result<StraightCapillary, _> = serde_json::from_str(
            r#"{"r_sample": 10000.0, "f": 10350.0, "r_in": 0.03, "r_out": 0.03, "entrance_alpha": 0.0005}"#,
        );
        assert!(ok.is_ok());
        let bad: Result<StraightCapillary, _> = serde_json::from_str(
            r#"{"r_sample": 10000.0, "f": 10350.0, "r_in": 0.0, "r_out": 0.03, "entrance_alpha": 0.0005}"#,
        );
        assert!(bad.is_err(), "zero entrance radius must be rejected");
    }

    #[test]
    fn test_parallel_ray_in_straight_bore_misses() {
        let cap = StraightCapillary::new(mono_params()).unwrap();
        let origin = Vector3::new(0.01, cap.entrance_y(), -0.015);
        let direction = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(
            cap.find_intersection(&origin, &direction),
            Intersection::Miss(MissReason::Parallel)
        );
    }

    #[test]
    fn test_tilted_ray_hits_at_expected_distance() {
        let cap = StraightCapillary::new(mono_params()).unwrap();
        let theta: f64 = 1e-4;
        let origin = Vector3::new(0.0, cap.entrance_y(), 0.0);
        let direction = Vector3::new(0.0, theta.cos(), theta.sin());
        let hit = cap.find_intersection(&origin, &direction).hit().unwrap();
        assert_relative_eq!(hit.t, 0.03 / theta.sin(), max_relative = 1e-9);
        assert_relative_eq!(hit.coords.r, 0.03, max_relative = 1e-9);
        assert_relative_eq!(hit.coords.phi, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_restart_on_wall_finds_next_hit_not_itself() {
        let cap = tapered();
        let origin = Vector3::new(0.0, cap.entrance_y(), 0.0);
        let direction = Vector3::new(0.0, 1.0, 0.01).normalize();
        let first = cap.find_intersection(&origin, &direction).hit().unwrap();

        let n = cap.normal_at(first.coords.s, first.coords.phi);
        let reflected = direction - 2.0 * direction.dot(&n) * n;
        match cap.find_intersection(&first.point, &reflected) {
            Intersection::Hit(second) => assert!(second.t > 1e-3, "second hit too close: {}", second.t),
            Intersection::Miss(_) => {}
        }
    }

    #[test]
    fn test_closed_form_agrees_with_march() {
        let cap = tapered();
        let origin = Vector3::new(0.1, cap.entrance_y(), -0.05);
        let direction = Vector3::new(0.002, 1.0, 0.004).normalize();
        let exact = cap.find_intersection(&origin, &direction).hit().unwrap();
        let marched = march_intersection(&cap, &origin, &direction, MARCH_STEPS)
            .hit()
            .unwrap();
        assert_relative_eq!(exact.t, marched.t, max_relative = 1e-9);
        assert_relative_eq!(exact.point, marched.point, epsilon = 1e-9);
    }
}
