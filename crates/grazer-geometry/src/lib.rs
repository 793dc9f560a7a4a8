//! # Grazer Geometry
//!
//! Geometric building blocks for the Grazer ray tracer. Optical elements are
//! described as parametric surfaces of revolution, detectors as planes, and
//! each element is placed in the beamline through a rigid [`frame::Frame`].
//!
//! ## Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`surface`] | [`ParametricSurface`](surface::ParametricSurface) trait, [`Surface`](surface::Surface) variant, intersection results |
//! | [`capillary`] | Straight (optionally tapered) capillary |
//! | [`plane`] | Ray-plane intersection for screens |
//! | [`frame`] | Global/local coordinate transforms |
//!
//! All lengths are millimetres. The nominal beam direction is `+y`.

pub mod capillary;
pub mod frame;
pub mod plane;
pub mod surface;

use thiserror::Error;

pub use capillary::StraightCapillary;
pub use frame::Frame;
pub use plane::{Plane, PlaneHit};
pub use surface::{Intersection, LocalCoords, MissReason, ParametricSurface, Surface, SurfaceHit};

/// Errors raised while constructing geometry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Radius must be strictly positive, got {name} = {value}")]
    NonPositiveRadius { name: &'static str, value: f64 },

    #[error("Invalid length: {0}")]
    InvalidLength(String),

    #[error("Invalid parametric range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },

    #[error("Degenerate orientation: {0}")]
    DegenerateOrientation(String),
}
