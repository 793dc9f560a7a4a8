//! Detector screens.
//!
//! A [`Screen`] is a stateless plane. Exposing a batch intersects the line of
//! every in-flight ray with the plane and returns the hit coordinates in the
//! screen basis together with the ray attributes needed for plotting. Rays
//! running parallel to the plane or pointing away from it are counted as
//! missed and left out.

use grazer_geometry::{Intersection, Plane};
use nalgebra::Vector3;

use crate::config::ConfigError;
use crate::rays::{Polarization, RayBatch, RayStatus};

/// Hits recorded by one exposure, in the screen frame.
///
/// `a`, `b` and `c` are the direction cosines along the screen x axis, the
/// normal and the screen z axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExposedBatch {
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
    pub energy: Vec<f64>,
    pub intensity: Vec<f64>,
    pub phase: Vec<f64>,
    pub bounces: Vec<u32>,
    pub polarization: Vec<Polarization>,
    pub status: Vec<RayStatus>,
    /// In-flight rays that did not reach the plane.
    pub missed: u64,
}

impl ExposedBatch {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    name: String,
    plane: Plane,
}

impl Screen {
    /// Screen perpendicular to the beam axis through `center`.
    pub fn new(name: impl Into<String>, center: [f64; 3]) -> Self {
        Self {
            name: name.into(),
            plane: Plane::perpendicular_to_y(Vector3::from(center)),
        }
    }

    /// Screen with an explicit normal and in-plane x axis.
    pub fn oriented(
        name: impl Into<String>,
        center: [f64; 3],
        normal: [f64; 3],
        x_axis: [f64; 3],
    ) -> Result<Self, ConfigError> {
        let plane = Plane::new(Vector3::from(center), Vector3::from(normal), Vector3::from(x_axis))?;
        Ok(Self { name: name.into(), plane })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    /// Project every in-flight ray of `batch` onto the screen.
    pub fn expose(&self, batch: &RayBatch) -> ExposedBatch {
        let mut out = ExposedBatch::default();
        for ray in batch.iter().filter(|r| r.status.in_flight()) {
            let hit = match self.plane.intersect(&ray.position, &ray.direction) {
                Intersection::Hit(h) => h,
                Intersection::Miss(_) => {
                    out.missed += 1;
                    continue;
                }
            };
            let [a, b, c] = self.plane.direction_components(&ray.direction);
            out.x.push(hit.u);
            out.z.push(hit.v);
            out.a.push(a);
            out.b.push(b);
            out.c.push(c);
            out.energy.push(ray.energy);
            out.intensity.push(ray.intensity);
            out.phase.push(ray.phase);
            out.bounces.push(ray.bounces);
            out.polarization.push(ray.polarization);
            out.status.push(ray.status);
        }
        log::trace!("{}: {} hits, {} missed", self.name, out.len(), out.missed);
        out
    }
}
