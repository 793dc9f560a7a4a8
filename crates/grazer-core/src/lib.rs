//! # Grazer Core
//!
//! Monte Carlo propagation of X-ray rays through grazing-incidence optics.
//! A round shines a batch of rays from a [`source::GeometricSource`], traces
//! them through each [`optics::OpticalElement`] in turn, records them on
//! [`screen::Screen`]s and bins the requested quantities into a
//! [`histogram::TallySet`].
//!
//! ## Architecture
//!
//! Geometry lives in `grazer-geometry` (the [`ParametricSurface`] trait and
//! the capillary) and wall reflectivity in `grazer-materials`. This crate
//! owns the ray model and the per-round pipeline; distributing rounds over
//! workers is the job of `grazer-compute`.
//!
//! ## Modules
//!
//! - [`config`]: run settings, reflectivity policy, configuration errors.
//! - [`distributions`]: flat, normal, annulus and line samplers.
//! - [`rays`]: ray state and the structure-of-arrays batch.
//! - [`source`]: geometric source.
//! - [`optics`]: reflective elements and the multi-bounce tracer.
//! - [`screen`]: detector planes.
//! - [`histogram`]: 2D accumulators and tally sets.
//! - [`beamline`]: stage composition and single-round propagation.
//!
//! [`ParametricSurface`]: grazer_geometry::ParametricSurface

pub mod beamline;
pub mod config;
pub mod distributions;
pub mod histogram;
pub mod optics;
pub mod rays;
pub mod screen;
pub mod source;

pub use beamline::{Beam, BeamKind, Beamline, Propagation, Stage};
pub use config::{ConfigError, ReflectivityPolicy, SimulationConfig};
pub use histogram::{HistogramError, HistogramSnapshot, PlotSpec, TallySet};
pub use optics::{OpticalElement, TraceError};
pub use rays::{Polarization, Ray, RayBatch, RayStatus, StatusCounts};
