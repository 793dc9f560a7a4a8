//! Per-ray specular tracing inside one element, in the element frame.

use grazer_geometry::{Intersection, ParametricSurface};
use grazer_materials::{MaterialError, ReflectivityProvider};
use nalgebra::Vector3;
use rand::Rng;

use crate::config::ReflectivityPolicy;
use crate::rays::{Polarization, Ray, RayStatus};

/// Relative slack on the entrance aperture test.
const APERTURE_TOLERANCE: f64 = 1e-9;

/// Largest accepted deviation of a reflected direction from unit norm.
const NORM_TOLERANCE: f64 = 1e-6;

/// What happens once a ray has used its reflection allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exhaustion {
    /// A further wall hit ends the ray as `OutOfRange`.
    Terminate,
    /// Stop at the last hit point and leave the status untouched.
    Pause,
}

pub(crate) struct Tracer<'a> {
    pub surface: &'a dyn ParametricSurface,
    pub material: &'a dyn ReflectivityProvider,
    pub policy: ReflectivityPolicy,
}

impl Tracer<'_> {
    fn aperture_planes(&self) -> (f64, f64) {
        let (s_min, s_max) = self.surface.s_range();
        let y0 = self.surface.s_origin();
        (y0 - s_max, y0 - s_min)
    }

    fn inside_bore(&self, p: &Vector3<f64>) -> bool {
        let c = self.surface.xyz_to_param(p);
        c.r <= self.surface.radius_at(c.s, c.phi) * (1.0 + APERTURE_TOLERANCE)
    }

    /// Trace one in-flight ray. Only material failures other than a missing
    /// energy range are returned as errors.
    pub fn trace<R: Rng + ?Sized>(
        &self,
        ray: &mut Ray,
        mut field: Option<Vector3<f64>>,
        max_bounces: u32,
        exhaustion: Exhaustion,
        rng: &mut R,
    ) -> Result<(), MaterialError> {
        if max_bounces == 0 {
            ray.status = RayStatus::OutOfRange;
            return Ok(());
        }

        let (y_entr, y_exit) = self.aperture_planes();
        let start = ray.position;
        let mut p = ray.position;
        let mut d = ray.direction;

        if p.y > y_exit {
            ray.status = RayStatus::OutOfRange;
            return Ok(());
        }
        if p.y < y_entr {
            if d.y <= 0.0 {
                ray.status = RayStatus::OutOfRange;
                return Ok(());
            }
            p += d * ((y_entr - p.y) / d.y);
        }
        if !self.inside_bore(&p) {
            ray.position = start;
            ray.status = RayStatus::OutOfRange;
            return Ok(());
        }

        let mut done = 0u32;
        loop {
            let t_plane = if d.y > 0.0 {
                (y_exit - p.y) / d.y
            } else if d.y < 0.0 {
                (y_entr - p.y) / d.y
            } else {
                f64::INFINITY
            };

            let hit = match self.surface.find_intersection(&p, &d) {
                Intersection::Hit(h) if h.t <= t_plane => h,
                _ => {
                    if d.y > 0.0 {
                        p += d * t_plane;
                        ray.status = RayStatus::Escaped;
                    } else if d.y < 0.0 {
                        p += d * t_plane;
                        ray.status = RayStatus::OutOfRange;
                    } else {
                        ray.status = RayStatus::OutOfRange;
                    }
                    break;
                }
            };

            if done == max_bounces {
                match exhaustion {
                    Exhaustion::Terminate => {
                        p = hit.point;
                        ray.status = RayStatus::OutOfRange;
                    }
                    Exhaustion::Pause => {}
                }
                break;
            }

            let n = self.surface.normal_at(hit.coords.s, hit.coords.phi);
            let cos_in = d.dot(&n);
            if !(cos_in < 0.0) {
                log::trace!("ray leaves the wall from outside at s={}", hit.coords.s);
                p = hit.point;
                ray.status = RayStatus::Invalid;
                break;
            }
            let theta = (-cos_in).min(1.0).asin();
            let fs = Polarization::s_fraction(field, &d, &n);

            let refl = match self.material.reflectivity(theta, ray.energy, fs) {
                Ok(r) => r,
                Err(MaterialError::OutOfRange { energy_ev, .. }) => {
                    log::trace!("no reflectivity data at {} eV", energy_ev);
                    p = hit.point;
                    ray.status = RayStatus::Invalid;
                    break;
                }
                Err(e) => return Err(e),
            };

            match self.policy {
                ReflectivityPolicy::Weight => {
                    ray.intensity *= refl.intensity();
                    ray.phase += refl.phase;
                }
                ReflectivityPolicy::Stochastic => {
                    if rng.gen::<f64>() >= refl.intensity() {
                        p = hit.point;
                        ray.status = RayStatus::Absorbed;
                        break;
                    }
                    ray.phase += refl.phase;
                }
            }

            let reflected = d - n * (2.0 * cos_in);
            let norm = reflected.norm();
            if !norm.is_finite() || (norm - 1.0).abs() > NORM_TOLERANCE {
                p = hit.point;
                ray.status = RayStatus::Invalid;
                break;
            }
            d = reflected / norm;
            field = field.map(|e| e - n * (2.0 * e.dot(&n)));
            p = hit.point;
            ray.bounces += 1;
            done += 1;

            if exhaustion == Exhaustion::Pause && done == max_bounces {
                break;
            }
        }

        ray.position = p;
        ray.direction = d;
        Ok(())
    }
}
