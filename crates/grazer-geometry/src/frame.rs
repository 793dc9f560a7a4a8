//! Rigid placement of an element in the beamline.
//!
//! A [`Frame`] maps between an element's local coordinates (where its
//! surface equations are written) and the global beamline frame. Points
//! transform with rotation and translation; directions with rotation only.

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Local-to-global rigid transform: `global = matrix * local + translation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// 3x3 rotation matrix (orthonormal).
    pub matrix: Matrix3<f64>,
    /// Position of the local origin in global coordinates (mm).
    pub translation: Vector3<f64>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

impl Frame {
    /// Element centred at `center`, rolled by `roll` radians about the beam axis (`y`).
    pub fn placed(center: [f64; 3], roll: f64) -> Self {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), roll);
        Self {
            matrix: *rotation.matrix(),
            translation: Vector3::new(center[0], center[1], center[2]),
        }
    }

    pub fn to_local_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.matrix.transpose() * (p - self.translation)
    }

    pub fn to_global_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * p + self.translation
    }

    pub fn to_local_direction(&self, d: &Vector3<f64>) -> Vector3<f64> {
        self.matrix.transpose() * d
    }

    pub fn to_global_direction(&self, d: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * d
    }
}
