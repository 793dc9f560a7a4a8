//! Parametric surfaces of revolution.
//!
//! An element surface is described in its local frame by a parametric
//! coordinate $s$ running *against* the beam ($y = y_0 - s$, with $y_0$ the
//! reference plane returned by [`ParametricSurface::s_origin`]) and a polar
//! angle $\phi$ measured from the $+z$ direction towards $+x$:
//!
//! $$x = x_0(s) + r \sin\phi, \qquad y = y_0 - s, \qquad z = r \cos\phi$$
//!
//! Implementors supply the axis $x_0(s)$, the axial radius $r_0(s)$ and their
//! slopes; the trait derives the radius at any $\phi$, the inward unit normal,
//! the coordinate conversions and a generic ray intersection. Elements with a
//! closed-form intersection override [`ParametricSurface::find_intersection`].

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::capillary::StraightCapillary;
use crate::GeometryError;

/// Minimum travel before a surface crossing counts as a new hit (mm).
///
/// Rays restarting on the wall after a reflection would otherwise re-detect
/// the point they are leaving.
pub const MIN_TRAVEL: f64 = 1e-6;

/// Number of march steps used by [`march_intersection`] across the valid range.
pub const MARCH_STEPS: usize = 4096;

const BISECTION_ITERATIONS: usize = 200;

/// Why a ray failed to intersect a surface or plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissReason {
    /// The ray runs parallel to the surface (or plane) and never meets it.
    Parallel,
    /// The governing equation has no real root ahead of the ray.
    NoRoot,
    /// A root exists but lies outside the valid parametric range.
    OutsideRange,
    /// The only crossing lies behind the ray origin.
    Behind,
}

/// Per-ray result of an intersection query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intersection<H = SurfaceHit> {
    Hit(H),
    Miss(MissReason),
}

impl<H> Intersection<H> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Intersection::Hit(_))
    }

    /// Convert into an `Option`, discarding the miss reason.
    pub fn hit(self) -> Option<H> {
        match self {
            Intersection::Hit(h) => Some(h),
            Intersection::Miss(_) => None,
        }
    }
}

/// Cylinder-like local coordinates $(s, \phi, r)$ of a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalCoords {
    pub s: f64,
    pub phi: f64,
    pub r: f64,
}

/// A ray-surface hit in the element's local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Distance travelled along the (unit) ray direction.
    pub t: f64,
    /// Hit point (mm).
    pub point: Vector3<f64>,
    /// Parametric coordinates of the hit point.
    pub coords: LocalCoords,
}

/// Geometry of a surface of revolution around a (possibly bent) axis.
///
/// All methods are pure; implementations must be `Send + Sync` so a built
/// beamline can be shared between worker threads.
pub trait ParametricSurface: Send + Sync {
    /// Axis displacement $x_0(s)$.
    fn axis(&self, s: f64) -> f64;

    /// Axis slope $x_0'(s)$.
    fn axis_slope(&self, s: f64) -> f64;

    /// Axial radius $r_0(s)$.
    fn local_radius(&self, s: f64) -> f64;

    /// Radius slope $r_0'(s)$.
    fn local_radius_slope(&self, s: f64) -> f64;

    /// Valid parametric range `(s_min, s_max)`. The beam enters at `s_max`.
    fn s_range(&self) -> (f64, f64);

    /// Local `y` of the plane `s = 0`.
    fn s_origin(&self) -> f64;

    /// Radius at azimuth `phi`, corrected for the axis tilt:
    ///
    /// $$r(s, \phi) = \frac{r_0(s)}{\cos^2\phi / \cos^2(\arctan x_0'(s)) + \sin^2\phi}$$
    fn radius_at(&self, s: f64, phi: f64) -> f64 {
        let den = self.axis_slope(s).atan().cos().powi(2);
        let (sin_phi, cos_phi) = phi.sin_cos();
        self.local_radius(s) / (cos_phi * cos_phi / den + sin_phi * sin_phi)
    }

    /// Unit surface normal at $(s, \phi)$, pointing towards the axis.
    fn normal_at(&self, s: f64, phi: f64) -> Vector3<f64> {
        let (sin_phi, cos_phi) = phi.sin_cos();
        Vector3::new(
            -sin_phi,
            -sin_phi * self.axis_slope(s) - self.local_radius_slope(s),
            -cos_phi,
        )
        .normalize()
    }

    /// Local Cartesian point to $(s, \phi, r)$.
    fn xyz_to_param(&self, point: &Vector3<f64>) -> LocalCoords {
        let s = self.s_origin() - point.y;
        let dx = point.x - self.axis(s);
        LocalCoords {
            s,
            phi: dx.atan2(point.z),
            r: dx.hypot(point.z),
        }
    }

    /// $(s, \phi, r)$ to a local Cartesian point.
    fn param_to_xyz(&self, coords: &LocalCoords) -> Vector3<f64> {
        let (sin_phi, cos_phi) = coords.phi.sin_cos();
        Vector3::new(
            self.axis(coords.s) + coords.r * sin_phi,
            self.s_origin() - coords.s,
            coords.r * cos_phi,
        )
    }

    /// Whether `s` lies inside the valid range (inclusive).
    fn contains_s(&self, s: f64) -> bool {
        let (lo, hi) = self.s_range();
        let tol = 1e-9 * (hi - lo).abs().max(1.0);
        s >= lo - tol && s <= hi + tol
    }

    /// First crossing of the ray `origin + t * direction` with the wall,
    /// `t > MIN_TRAVEL`, restricted to the valid range.
    fn find_intersection(&self, origin: &Vector3<f64>, direction: &Vector3<f64>) -> Intersection {
        march_intersection(self, origin, direction, MARCH_STEPS)
    }
}

/// Generic intersection by marching along the ray and bisecting the first
/// sign change of $g(t) = r(t) - r(s(t), \phi(t))$.
///
/// Only the stretch of the ray inside the valid `s` slab is searched.
pub fn march_intersection<S: ParametricSurface + ?Sized>(
    surface: &S,
    origin: &Vector3<f64>,
    direction: &Vector3<f64>,
    steps: usize,
) -> Intersection {
    let (s_min, s_max) = surface.s_range();
    let y0 = surface.s_origin();
    if direction.y.abs() < 1e-15 {
        return Intersection::Miss(MissReason::Parallel);
    }
    let t_a = (y0 - s_max - origin.y) / direction.y;
    let t_b = (y0 - s_min - origin.y) / direction.y;
    let t_start = t_a.min(t_b).max(MIN_TRAVEL);
    let t_end = t_a.max(t_b);
    if t_end <= t_start {
        return Intersection::Miss(MissReason::OutsideRange);
    }

    let gap = |t: f64| {
        let p = origin + direction * t;
        let c = surface.xyz_to_param(&p);
        c.r - surface.radius_at(c.s, c.phi)
    };

    let dt = (t_end - t_start) / steps.max(1) as f64;
    let mut t0 = t_start;
    let mut g0 = gap(t0);
    for i in 1..=steps.max(1) {
        let t1 = t_start + dt * i as f64;
        let g1 = gap(t1);
        if g0 == 0.0 || g0.signum() != g1.signum() {
            let (mut lo, mut hi, mut g_lo) = (t0, t1, g0);
            for _ in 0..BISECTION_ITERATIONS {
                if hi - lo <= 1e-13 * hi.abs().max(1.0) {
                    break;
                }
                let mid = 0.5 * (lo + hi);
                let g_mid = gap(mid);
                if g_mid.signum() == g_lo.signum() && g_mid != 0.0 {
                    lo = mid;
                    g_lo = g_mid;
                } else {
                    hi = mid;
                }
            }
            let t = 0.5 * (lo + hi);
            let point = origin + direction * t;
            return Intersection::Hit(SurfaceHit {
                t,
                point,
                coords: surface.xyz_to_param(&point),
            });
        }
        t0 = t1;
        g0 = g1;
    }
    Intersection::Miss(MissReason::NoRoot)
}

/// Element surface, selected by its `type` tag at beamline-build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Surface {
    Capillary(StraightCapillary),
}

impl Surface {
    /// Borrow the surface as a trait object.
    pub fn as_parametric(&self) -> &dyn ParametricSurface {
        match self {
            Surface::Capillary(c) => c,
        }
    }

    /// Short type name used in logs and output metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Surface::Capillary(_) => "capillary",
        }
    }

    /// Re-check construction invariants.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Surface::Capillary(c) => c.validate(),
        }
    }
}
