//! Reflective optical elements.
//!
//! An [`OpticalElement`] couples a [`Surface`] placed by a [`Frame`] with a
//! wall material. Incoming rays are carried into the element frame, traced
//! through up to `max_bounces` specular reflections, and carried back.
//!
//! ## Ray fates
//!
//! | Outcome | Status | Position afterwards |
//! |---------|--------|---------------------|
//! | Leaves through the exit aperture | `Escaped` | on the exit plane |
//! | Misses the entrance, or leaves back through it | `OutOfRange` | unchanged / entrance plane |
//! | Needs more than `max_bounces` reflections | `OutOfRange` | at the first disallowed hit |
//! | Absorbed by the wall (stochastic policy) | `Absorbed` | at the hit |
//! | Numerical failure | `Invalid` | at the last valid point |
//!
//! With `max_bounces = 0` no ray is given a reflection opportunity: every
//! ray is returned unmoved and `OutOfRange`.

mod bounce;

use std::fmt;
use std::sync::Arc;

use grazer_geometry::{Frame, ParametricSurface, Surface};
use grazer_materials::{MaterialError, ReflectivityProvider};
use rand::Rng;
use thiserror::Error;

use crate::config::{ConfigError, ReflectivityPolicy};
use crate::distributions::Distribution;
use crate::histogram::HistogramError;
use crate::rays::{RayBatch, RayStatus};

use bounce::{Exhaustion, Tracer};

/// Errors that abort a propagation round.
///
/// Per-ray problems never surface here; they are recorded in the ray status.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Material '{material}' failed: {source}")]
    Material {
        material: String,
        #[source]
        source: MaterialError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Histogram(#[from] HistogramError),
}

/// Rays in an element's local frame together with their final
/// parametric coordinates. `phi` is stored divided by $\pi$.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalBatch {
    pub rays: RayBatch,
    pub s: Vec<f64>,
    pub phi: Vec<f64>,
    pub r: Vec<f64>,
}

impl LocalBatch {
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }
}

/// Output of [`OpticalElement::multiple_reflect`].
#[derive(Debug, Clone)]
pub struct ReflectionResult {
    /// Every input ray in global coordinates, with its final status.
    pub exit: RayBatch,
    /// The same rays in the element frame.
    pub local: LocalBatch,
}

/// A reflective element.
#[derive(Clone)]
pub struct OpticalElement {
    name: String,
    surface: Surface,
    frame: Frame,
    material: Arc<dyn ReflectivityProvider>,
    max_reflections: u32,
    accept: Vec<RayStatus>,
}

impl fmt::Debug for OpticalElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpticalElement")
            .field("name", &self.name)
            .field("surface", &self.surface)
            .field("frame", &self.frame)
            .field("material", &self.material.name())
            .field("max_reflections", &self.max_reflections)
            .field("accept", &self.accept)
            .finish()
    }
}

impl OpticalElement {
    /// Build an element with an identity frame, 4 allowed reflections and
    /// an exit mask accepting only `Escaped` rays.
    pub fn new(
        name: impl Into<String>,
        surface: Surface,
        material: Arc<dyn ReflectivityProvider>,
    ) -> Result<Self, ConfigError> {
        surface.validate()?;
        Ok(Self {
            name: name.into(),
            surface,
            frame: Frame::default(),
            material,
            max_reflections: 4,
            accept: vec![RayStatus::Escaped],
        })
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_max_reflections(mut self, max_reflections: u32) -> Self {
        self.max_reflections = max_reflections;
        self
    }

    /// Statuses copied into the exit beam handed to the next stage.
    pub fn with_accept(mut self, accept: Vec<RayStatus>) -> Result<Self, ConfigError> {
        if accept.is_empty() {
            return Err(ConfigError::InvalidRun(format!(
                "element '{}' accepts no ray status",
                self.name
            )));
        }
        self.accept = accept;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn material_name(&self) -> &str {
        self.material.name()
    }

    pub fn max_reflections(&self) -> u32 {
        self.max_reflections
    }

    pub fn accept(&self) -> &[RayStatus] {
        &self.accept
    }

    /// Rays of `batch` whose status is in the accept mask.
    pub fn accepted(&self, batch: &RayBatch) -> RayBatch {
        let mut out = RayBatch::default();
        self.accumulate_exit(&mut out, batch);
        out
    }

    /// Append the accepted rays of one invocation's `exit` to `total`.
    pub fn accumulate_exit(&self, total: &mut RayBatch, exit: &RayBatch) {
        total.extend_matching(exit, |s| self.accept.contains(&s));
    }

    /// Energies covered by the wall material data, in eV.
    pub fn energy_range(&self) -> (f64, f64) {
        self.material.energy_range()
    }

    /// Fail when a nominal source energy lies outside the material data.
    pub fn check_energies(&self, energies: &Distribution) -> Result<(), ConfigError> {
        let (min, max) = self.energy_range();
        match energies.nominal_values().into_iter().find(|e| !(*e >= min && *e <= max)) {
            Some(energy_ev) => {
                log::error!(
                    "element '{}': {} eV is outside the '{}' data range",
                    self.name(),
                    energy_ev,
                    self.material_name()
                );
                Err(MaterialError::OutOfRange { energy_ev, min, max }.into())
            }
            None => Ok(()),
        }
    }

    fn tracer(&self, policy: ReflectivityPolicy) -> Tracer<'_> {
        Tracer {
            surface: self.surface.as_parametric(),
            material: self.material.as_ref(),
            policy,
        }
    }

    /// Trace every in-flight ray through up to `max_bounces` reflections.
    pub fn multiple_reflect<R: Rng + ?Sized>(
        &self,
        batch: RayBatch,
        max_bounces: u32,
        policy: ReflectivityPolicy,
        rng: &mut R,
    ) -> Result<ReflectionResult, TraceError> {
        self.trace_batch(batch, max_bounces, Exhaustion::Terminate, policy, rng)
    }

    /// One wall interaction per in-flight ray.
    ///
    /// Reflected rays stay in flight at the hit point with their new
    /// direction; rays that reach an aperture first end as in
    /// [`multiple_reflect`](Self::multiple_reflect).
    pub fn reflect<R: Rng + ?Sized>(
        &self,
        batch: RayBatch,
        policy: ReflectivityPolicy,
        rng: &mut R,
    ) -> Result<RayBatch, TraceError> {
        Ok(self.trace_batch(batch, 1, Exhaustion::Pause, policy, rng)?.exit)
    }

    fn trace_batch<R: Rng + ?Sized>(
        &self,
        mut batch: RayBatch,
        max_bounces: u32,
        exhaustion: Exhaustion,
        policy: ReflectivityPolicy,
        rng: &mut R,
    ) -> Result<ReflectionResult, TraceError> {
        let tracer = self.tracer(policy);
        let surface = self.surface.as_parametric();
        let mut local = LocalBatch {
            rays: RayBatch::with_capacity(batch.len()),
            s: Vec::with_capacity(batch.len()),
            phi: Vec::with_capacity(batch.len()),
            r: Vec::with_capacity(batch.len()),
        };

        for i in 0..batch.len() {
            let global = batch.get(i);
            let mut ray = global;
            ray.position = self.frame.to_local_point(&global.position);
            ray.direction = self.frame.to_local_direction(&global.direction);

            if global.status.in_flight() {
                let field = global
                    .polarization
                    .field_vector()
                    .map(|e| self.frame.to_local_direction(&e));
                tracer
                    .trace(&mut ray, field, max_bounces, exhaustion, rng)
                    .map_err(|source| TraceError::Material {
                        material: self.material.name().to_string(),
                        source,
                    })?;
            }

            let coords = surface.xyz_to_param(&ray.position);
            local.s.push(coords.s);
            local.phi.push(coords.phi / std::f64::consts::PI);
            local.r.push(coords.r);
            local.rays.push(ray);

            let mut out = ray;
            out.position = self.frame.to_global_point(&ray.position);
            out.direction = self.frame.to_global_direction(&ray.direction);
            batch.update(i, out);
        }

        if log::log_enabled!(log::Level::Debug) {
            let counts = batch.status_counts();
            log::debug!(
                "{}: {} rays, escaped={} out_of_range={} absorbed={} invalid={}",
                self.name,
                batch.len(),
                counts.get(RayStatus::Escaped),
                counts.get(RayStatus::OutOfRange),
                counts.get(RayStatus::Absorbed),
                counts.get(RayStatus::Invalid),
            );
        }

        Ok(ReflectionResult { exit: batch, local })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use grazer_geometry::capillary::{CapillaryParams, StraightCapillary};
    use grazer_materials::{IdealMirror, TabulatedMaterial};
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::rays::{Polarization, Ray};

    fn capillary(r_in: f64, r_out: f64) -> Surface {
        Surface::Capillary(
            StraightCapillary::new(CapillaryParams {
                r_sample: 100.0,
                f: 300.0,
                r_in,
                r_out,
                entrance_alpha: 0.0,
                axis_offset: 0.0,
                lim_phys_y: None,
            })
            .unwrap(),
        )
    }

    fn ray_towards(x: f64, z: f64, tilt_z: f64) -> Ray {
        Ray::new(
            Vector3::new(x, 100.0, z),
            Vector3::new(0.0, 1.0, tilt_z).normalize(),
            9000.0,
            Polarization::Horizontal,
        )
    }

    fn element(surface: Surface) -> OpticalElement {
        OpticalElement::new("cap", surface, Arc::new(IdealMirror)).unwrap()
    }

    #[test]
    fn test_zero_bounces_leaves_rays_unmoved_and_out_of_range() {
        let el = element(capillary(0.1, 0.1));
        let batch: RayBatch = (0..5).map(|i| ray_towards(0.01 * i as f64, 0.0, 1e-4)).collect();
        let before = batch.clone();
        let res = el
            .multiple_reflect(batch, 0, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(0))
            .unwrap();
        for i in 0..before.len() {
            assert_eq!(res.exit.status(i), RayStatus::OutOfRange);
            assert_eq!(res.exit.position(i), before.position(i));
            assert_eq!(res.exit.direction(i), before.direction(i));
        }
    }

    #[test]
    fn test_bounce_count_and_exit() {
        // Bore radius 0.1 over 200 mm; tilt 1.2e-3 reaches the wall after ~83 mm.
        let el = element(capillary(0.1, 0.1));
        let batch: RayBatch = [ray_towards(0.0, 0.0, 1.2e-3)].into_iter().collect();
        let res = el
            .multiple_reflect(batch, 10, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(0))
            .unwrap();
        let ray = res.exit.get(0);
        assert_eq!(ray.status, RayStatus::Escaped);
        assert_eq!(ray.bounces, 1);
        assert_relative_eq!(ray.position.y, 300.0, epsilon = 1e-9);
        assert_relative_eq!(ray.direction.norm(), 1.0, epsilon = 1e-12);
        assert!(ray.direction.z < 0.0, "reflection must turn the ray back towards the axis");
        assert_relative_eq!(res.local.s[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_exceeding_max_bounces_is_out_of_range() {
        let el = element(capillary(0.1, 0.1));
        let batch: RayBatch = [ray_towards(0.0, 0.0, 6e-3)].into_iter().collect();
        let res = el
            .multiple_reflect(batch, 2, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(0))
            .unwrap();
        let ray = res.exit.get(0);
        assert_eq!(ray.status, RayStatus::OutOfRange);
        assert_eq!(ray.bounces, 2);
        assert_relative_eq!(ray.position.x.hypot(ray.position.z), 0.1, max_relative = 1e-9);
    }

    #[test]
    fn test_rays_outside_entrance_are_rejected() {
        let el = element(capillary(0.1, 0.1));
        let batch: RayBatch = [ray_towards(0.2, 0.0, 0.0)].into_iter().collect();
        let res = el
            .multiple_reflect(batch, 4, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(res.exit.status(0), RayStatus::OutOfRange);
        assert_eq!(res.exit.position(0), Vector3::new(0.2, 100.0, 0.0));
        assert!(el.accepted(&res.exit).is_empty());
    }

    #[test]
    fn test_exit_total_keeps_accepted_rays_across_calls() {
        let el = element(capillary(0.1, 0.1));
        let mut total = RayBatch::default();
        let mut rng = StdRng::seed_from_u64(0);
        for x in [0.02, -0.03] {
            // Second ray of each call starts outside the entrance.
            let batch: RayBatch = [ray_towards(x, 0.0, 1.2e-3), ray_towards(0.2, 0.0, 0.0)].into_iter().collect();
            let res = el.multiple_reflect(batch, 10, ReflectivityPolicy::Weight, &mut rng).unwrap();
            assert_eq!(res.exit.status(1), RayStatus::OutOfRange);
            el.accumulate_exit(&mut total, &res.exit);
        }
        assert_eq!(total.len(), 2);
        assert!(total.statuses().iter().all(|&s| s == RayStatus::Escaped));
        for i in 0..2 {
            assert_eq!(total.bounces()[i], 1);
            assert_eq!(total.energies()[i], 9000.0);
            assert_relative_eq!(total.position(i).y, 300.0, epsilon = 1e-9);
        }
        assert!(total.position(0).x != total.position(1).x);
    }

    #[test]
    fn test_energies_outside_material_data_are_rejected() {
        let glass = Arc::new(TabulatedMaterial::fused_silica().unwrap());
        let el = OpticalElement::new("cap", capillary(0.1, 0.1), glass).unwrap();
        let (lo, hi) = el.energy_range();
        assert!(lo < 9000.0 && hi > 9000.0);
        assert!(el.check_energies(&Distribution::Normal { mean: 9000.0, sigma: 20.0 }).is_ok());
        assert!(matches!(
            el.check_energies(&Distribution::Lines { values: vec![8000.0, 50_000.0] }),
            Err(ConfigError::Material(MaterialError::OutOfRange { energy_ev, .. })) if energy_ev == 50_000.0
        ));
        assert!(element(capillary(0.1, 0.1)).check_energies(&Distribution::fixed(1e6)).is_ok());
    }

    #[test]
    fn test_reflect_performs_a_single_interaction() {
        let el = element(capillary(0.1, 0.1));
        let batch: RayBatch = [ray_towards(0.0, 0.0, 6e-3)].into_iter().collect();
        let out = el
            .reflect(batch, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(0))
            .unwrap();
        let ray = out.get(0);
        assert_eq!(ray.status, RayStatus::Alive);
        assert_eq!(ray.bounces, 1);
        assert_relative_eq!(ray.position.x.hypot(ray.position.z), 0.1, max_relative = 1e-9);
    }

    #[test]
    fn test_weight_policy_attenuates_intensity() {
        let glass = Arc::new(TabulatedMaterial::fused_silica().unwrap());
        let el = OpticalElement::new("cap", capillary(0.1, 0.1), glass).unwrap();
        let batch: RayBatch = [ray_towards(0.0, 0.0, 2e-3)].into_iter().collect();
        let res = el
            .multiple_reflect(batch, 4, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(0))
            .unwrap();
        let ray = res.exit.get(0);
        assert_eq!(ray.status, RayStatus::Escaped);
        assert!(ray.bounces >= 1);
        assert!(ray.intensity < 1.0 && ray.intensity > 0.5, "intensity {}", ray.intensity);
    }

    #[test]
    fn test_roll_does_not_change_an_axisymmetric_result() {
        let plain = element(capillary(0.1, 0.08));
        let rolled = element(capillary(0.1, 0.08)).with_frame(Frame::placed([0.0; 3], 0.7));
        let batch: RayBatch = [ray_towards(0.02, -0.01, 1e-3)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(0);
        let a = plain
            .multiple_reflect(batch.clone(), 8, ReflectivityPolicy::Weight, &mut rng)
            .unwrap();
        let b = rolled
            .multiple_reflect(batch, 8, ReflectivityPolicy::Weight, &mut rng)
            .unwrap();
        assert_eq!(a.exit.status(0), b.exit.status(0));
        assert_eq!(a.exit.bounces()[0], b.exit.bounces()[0]);
        assert_relative_eq!(a.exit.position(0), b.exit.position(0), epsilon = 1e-9);
    }
}
