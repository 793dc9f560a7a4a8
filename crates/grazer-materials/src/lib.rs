//! # Grazer Materials
//!
//! X-ray reflectivity providers for the Grazer ray tracer. Every wall
//! material implements [`ReflectivityProvider`](provider::ReflectivityProvider),
//! which returns the complex Fresnel amplitudes for s- and p-polarised light
//! at a grazing angle and photon energy.
//!
//! ## Available data sources
//!
//! | Source | Module | Notes |
//! |--------|--------|-------|
//! | Tabulated $\delta$, $\beta$ (SiO₂, Pt) | [`tabulated`] | Density-scalable |
//! | Ideal mirror | [`provider`] | $\lvert r \rvert = 1$, for validation |
//!
//! ## Interpolation
//!
//! Optical constants vary over orders of magnitude across the X-ray range,
//! so tables are interpolated with natural cubic splines
//! ([`spline::CubicSpline`]) in $\log E$ / $\log \delta$ space.

pub mod fresnel;
pub mod provider;
pub mod spline;
pub mod tabulated;

pub use provider::{FresnelAmplitudes, IdealMirror, MaterialError, Reflectivity, ReflectivityProvider};
pub use tabulated::TabulatedMaterial;
