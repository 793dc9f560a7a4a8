//! Beamline composition and single-round propagation.
//!
//! A [`Beamline`] is one [`GeometricSource`] followed by an ordered list of
//! stages. Elements transform the current beam; screens record it without
//! changing it. Every round produces a map of named beams:
//!
//! | Beam | Produced by | Contents |
//! |------|-------------|----------|
//! | `source` | the source | every generated ray |
//! | `<element>_global` | an element | rays passing the element's accept mask, global frame |
//! | `<element>_local` | an element | every ray in the element frame, with `s`, `phi`, `r` |
//! | `<screen>` | a screen | hits on the screen plane |
//!
//! Plots refer to beams by these names.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;

use crate::config::{ConfigError, ReflectivityPolicy, SimulationConfig};
use crate::histogram::{PlotSpec, Quantity, TallySet};
use crate::optics::{LocalBatch, OpticalElement, TraceError};
use crate::rays::{RayBatch, RayStatus, StatusCounts};
use crate::screen::{ExposedBatch, Screen};
use crate::source::GeometricSource;

/// Name of the beam leaving the source.
pub const SOURCE_BEAM: &str = "source";

#[derive(Debug, Clone)]
pub enum Stage {
    Element(OpticalElement),
    Screen(Screen),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Element(e) => e.name(),
            Stage::Screen(s) => s.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamKind {
    Rays,
    Local,
    Screen,
}

impl BeamKind {
    pub fn supports(self, q: Quantity) -> bool {
        !q.is_local() || self == BeamKind::Local
    }
}

/// One named beam of a round.
#[derive(Debug, Clone)]
pub enum Beam {
    Rays(RayBatch),
    Local(LocalBatch),
    Screen(ExposedBatch),
}

pub type BeamMap = BTreeMap<String, Beam>;

fn ray_value(rays: &RayBatch, q: Quantity, i: usize) -> Option<f64> {
    Some(match q {
        Quantity::X => rays.x()[i],
        Quantity::Z => rays.z()[i],
        Quantity::XPrime => (rays.a()[i] / rays.b()[i]).atan(),
        Quantity::ZPrime => (rays.c()[i] / rays.b()[i]).atan(),
        Quantity::Energy => rays.energies()[i],
        Quantity::Reflections => rays.bounces()[i] as f64,
        Quantity::Intensity => rays.intensities()[i],
        Quantity::S | Quantity::Phi | Quantity::R => return None,
    })
}

impl Beam {
    pub fn kind(&self) -> BeamKind {
        match self {
            Beam::Rays(_) => BeamKind::Rays,
            Beam::Local(_) => BeamKind::Local,
            Beam::Screen(_) => BeamKind::Screen,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Beam::Rays(b) => b.len(),
            Beam::Local(b) => b.len(),
            Beam::Screen(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of `q` for entry `i`; angles are `atan` of the direction
    /// cosine ratios, so they are exact for sampled divergences.
    pub fn value(&self, q: Quantity, i: usize) -> Option<f64> {
        match self {
            Beam::Rays(b) => ray_value(b, q, i),
            Beam::Local(b) => match q {
                Quantity::S => Some(b.s[i]),
                Quantity::Phi => Some(b.phi[i]),
                Quantity::R => Some(b.r[i]),
                _ => ray_value(&b.rays, q, i),
            },
            Beam::Screen(b) => Some(match q {
                Quantity::X => b.x[i],
                Quantity::Z => b.z[i],
                Quantity::XPrime => (b.a[i] / b.b[i]).atan(),
                Quantity::ZPrime => (b.c[i] / b.b[i]).atan(),
                Quantity::Energy => b.energy[i],
                Quantity::Reflections => b.bounces[i] as f64,
                Quantity::Intensity => b.intensity[i],
                Quantity::S | Quantity::Phi | Quantity::R => return None,
            }),
        }
    }

    pub fn weight(&self, i: usize) -> f64 {
        match self {
            Beam::Rays(b) => b.intensities()[i],
            Beam::Local(b) => b.rays.intensities()[i],
            Beam::Screen(b) => b.intensity[i],
        }
    }

    /// Whether entry `i` takes part in plots. Invalid rays never do.
    pub fn include(&self, i: usize) -> bool {
        match self {
            Beam::Rays(b) => b.status(i) != RayStatus::Invalid,
            Beam::Local(b) => b.rays.status(i) != RayStatus::Invalid,
            Beam::Screen(_) => true,
        }
    }
}

/// Everything one round produced.
#[derive(Debug, Clone)]
pub struct Propagation {
    pub beams: BeamMap,
    /// Status counts of the source batch and of every element exit.
    pub status: BTreeMap<String, StatusCounts>,
    /// In-flight rays at the end of the beamline.
    pub accepted: u64,
}

#[derive(Debug, Clone)]
pub struct Beamline {
    source: GeometricSource,
    stages: Vec<Stage>,
}

impl Beamline {
    pub fn new(source: GeometricSource, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        source.validate()?;
        for stage in &stages {
            if let Stage::Element(element) = stage {
                element.check_energies(&source.energies)?;
            }
        }
        let line = Self { source, stages };
        let mut seen = HashSet::new();
        for (name, _) in line.beam_names() {
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateName(name));
            }
        }
        let mut stage_names = HashSet::new();
        for stage in &line.stages {
            if !stage_names.insert(stage.name()) {
                return Err(ConfigError::DuplicateName(stage.name().to_string()));
            }
        }
        log::debug!(
            "beamline with {} stage(s): {}",
            line.stages.len(),
            line.stages.iter().map(Stage::name).collect::<Vec<_>>().join(" -> ")
        );
        Ok(line)
    }

    pub fn source(&self) -> &GeometricSource {
        &self.source
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Every beam a round will produce, in production order.
    pub fn beam_names(&self) -> Vec<(String, BeamKind)> {
        let mut names = vec![(SOURCE_BEAM.to_string(), BeamKind::Rays)];
        for stage in &self.stages {
            match stage {
                Stage::Element(e) => {
                    names.push((format!("{}_global", e.name()), BeamKind::Rays));
                    names.push((format!("{}_local", e.name()), BeamKind::Local));
                }
                Stage::Screen(s) => names.push((s.name().to_string(), BeamKind::Screen)),
            }
        }
        names
    }

    /// Shine `nrays` and push them through every stage.
    pub fn propagate<R: Rng + ?Sized>(
        &self,
        nrays: usize,
        policy: ReflectivityPolicy,
        rng: &mut R,
    ) -> Result<Propagation, TraceError> {
        let mut beams = BeamMap::new();
        let mut status = BTreeMap::new();

        let mut current = self.source.shine(nrays, rng)?;
        status.insert(SOURCE_BEAM.to_string(), current.status_counts());
        beams.insert(SOURCE_BEAM.to_string(), Beam::Rays(current.clone()));

        for stage in &self.stages {
            match stage {
                Stage::Element(element) => {
                    let result = element.multiple_reflect(current, element.max_reflections(), policy, rng)?;
                    status.insert(element.name().to_string(), result.exit.status_counts());
                    current = element.accepted(&result.exit);
                    beams.insert(format!("{}_global", element.name()), Beam::Rays(current.clone()));
                    beams.insert(format!("{}_local", element.name()), Beam::Local(result.local));
                }
                Stage::Screen(screen) => {
                    beams.insert(screen.name().to_string(), Beam::Screen(screen.expose(&current)));
                }
            }
        }

        let accepted = current.statuses().iter().filter(|s| s.in_flight()).count() as u64;
        Ok(Propagation { beams, status, accepted })
    }

    /// Empty tallies for `plots`, checking beam names and axis quantities.
    pub fn tally_template(&self, plots: &[PlotSpec]) -> Result<TallySet, ConfigError> {
        let beams = self.beam_names();
        let mut names = HashSet::new();
        for plot in plots {
            let invalid = |reason: String| ConfigError::InvalidPlot { plot: plot.name.clone(), reason };
            if !names.insert(plot.name.as_str()) {
                return Err(ConfigError::DuplicateName(plot.name.clone()));
            }
            let kind = beams
                .iter()
                .find(|(name, _)| *name == plot.beam)
                .map(|(_, kind)| *kind)
                .ok_or_else(|| ConfigError::UnknownBeam(plot.beam.clone()))?;
            let axes = [Some(&plot.x), Some(&plot.y), plot.c.as_ref()];
            for axis in axes.into_iter().flatten() {
                if !kind.supports(axis.quantity) {
                    return Err(invalid(format!(
                        "'{}' is only available on element-local beams, not '{}'",
                        axis.quantity.label(),
                        plot.beam
                    )));
                }
            }
        }
        TallySet::new(plots).map_err(|e| ConfigError::InvalidPlot {
            plot: "<tally>".into(),
            reason: e.to_string(),
        })
    }

    /// Run one round and bin it into a copy of `template`.
    pub fn tally<R: Rng + ?Sized>(
        &self,
        config: &SimulationConfig,
        template: &TallySet,
        rng: &mut R,
    ) -> Result<TallySet, TraceError> {
        let round = self.propagate(config.nrays, config.policy, rng)?;
        let mut set = template.empty_like();

        for hist in set.histograms.iter_mut() {
            let spec = hist.spec().clone();
            let Some(beam) = round.beams.get(&spec.beam) else {
                continue;
            };
            let n = beam.len();
            let mut xs = Vec::with_capacity(n);
            let mut ys = Vec::with_capacity(n);
            let mut ws = Vec::with_capacity(n);
            let mut cs = Vec::with_capacity(if spec.c.is_some() { n } else { 0 });
            for i in (0..n).filter(|&i| beam.include(i)) {
                let (Some(x), Some(y)) = (beam.value(spec.x.quantity, i), beam.value(spec.y.quantity, i))
                else {
                    continue;
                };
                if let Some(c_axis) = &spec.c {
                    let Some(c) = beam.value(c_axis.quantity, i) else {
                        continue;
                    };
                    cs.push(c);
                }
                xs.push(x);
                ys.push(y);
                ws.push(beam.weight(i));
            }
            let cs = spec.c.as_ref().map(|_| cs.as_slice());
            hist.add(&xs, &ys, &ws, cs)?;
        }

        set.status = round.status;
        set.rays_shone = config.nrays as u64;
        set.accepted = round.accepted;
        set.rounds = 1;
        Ok(set)
    }
}
