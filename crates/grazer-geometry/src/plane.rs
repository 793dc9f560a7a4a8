//! Flat detector planes.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::surface::{Intersection, MissReason};
use crate::GeometryError;

/// An oriented plane with an in-plane `(x, z)` basis.
///
/// For the default orientation (normal along `+y`, in-plane x along global
/// `x`) the plane coordinates coincide with global `x` and `z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    anchor: Vector3<f64>,
    normal: Vector3<f64>,
    x_axis: Vector3<f64>,
    z_axis: Vector3<f64>,
}

/// Where a ray crosses a plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneHit {
    pub t: f64,
    pub point: Vector3<f64>,
    /// In-plane coordinate along the plane's x axis.
    pub u: f64,
    /// In-plane coordinate along the plane's z axis.
    pub v: f64,
}

impl Plane {
    /// Build a plane through `anchor`. `x_axis` is projected onto the plane.
    pub fn new(
        anchor: Vector3<f64>,
        normal: Vector3<f64>,
        x_axis: Vector3<f64>,
    ) -> Result<Self, GeometryError> {
        let n_len = normal.norm();
        if !(n_len > 1e-12) || !n_len.is_finite() {
            return Err(GeometryError::DegenerateOrientation(
                "plane normal has zero length".into(),
            ));
        }
        let normal = normal / n_len;
        let projected = x_axis - normal * x_axis.dot(&normal);
        let x_len = projected.norm();
        if !(x_len > 1e-9) {
            return Err(GeometryError::DegenerateOrientation(
                "plane x axis is parallel to its normal".into(),
            ));
        }
        let x_axis = projected / x_len;
        let z_axis = x_axis.cross(&normal);
        Ok(Self { anchor, normal, x_axis, z_axis })
    }

    /// Plane perpendicular to the beam axis at `anchor`.
    pub fn perpendicular_to_y(anchor: Vector3<f64>) -> Self {
        Self {
            anchor,
            normal: Vector3::y(),
            x_axis: Vector3::x(),
            z_axis: Vector3::z(),
        }
    }

    pub fn anchor(&self) -> &Vector3<f64> {
        &self.anchor
    }

    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    /// Intersect the ray `origin + t * direction`, `t >= 0`.
    pub fn intersect(&self, origin: &Vector3<f64>, direction: &Vector3<f64>) -> Intersection<PlaneHit> {
        let denom = direction.dot(&self.normal);
        if denom.abs() < 1e-15 {
            return Intersection::Miss(MissReason::Parallel);
        }
        let t = (self.anchor - origin).dot(&self.normal) / denom;
        if !t.is_finite() {
            return Intersection::Miss(MissReason::Parallel);
        }
        if t < 0.0 {
            return Intersection::Miss(MissReason::Behind);
        }
        let point = origin + direction * t;
        let rel = point - self.anchor;
        Intersection::Hit(PlaneHit {
            t,
            point,
            u: rel.dot(&self.x_axis),
            v: rel.dot(&self.z_axis),
        })
    }

    /// Express a direction in the plane basis as `(along x, along normal, along z)`.
    pub fn direction_components(&self, d: &Vector3<f64>) -> [f64; 3] {
        [d.dot(&self.x_axis), d.dot(&self.normal), d.dot(&self.z_axis)]
    }
}
