//! End-to-end propagation through a source, a capillary and screens.

use std::sync::Arc;

use approx::assert_relative_eq;
use grazer_core::beamline::{Beam, Beamline, Stage};
use grazer_core::distributions::Distribution;
use grazer_core::histogram::{AxisSpec, Binning, Normalization, PlotSpec, Quantity};
use grazer_core::optics::OpticalElement;
use grazer_core::screen::Screen;
use grazer_core::source::GeometricSource;
use grazer_core::{RayStatus, ReflectivityPolicy, SimulationConfig};
use grazer_geometry::capillary::{CapillaryParams, StraightCapillary};
use grazer_geometry::Surface;
use grazer_materials::{IdealMirror, TabulatedMaterial};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Capillary from y = 100 to y = 300.
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

fn xz_plot(beam: &str, bins: usize, limits: Option<[f64; 2]>) -> PlotSpec {
    PlotSpec {
        name: format!("{}_xz", beam),
        beam: beam.into(),
        x: AxisSpec::new(Quantity::X, bins, limits),
        y: AxisSpec::new(Quantity::Z, bins, limits),
        c: None,
        binning: Binning::Nearest,
        normalization: Normalization::None,
    }
}

#[test]
fn test_pencil_beam_lands_in_single_bin() {
    let line = Beamline::new(
        GeometricSource::default(),
        vec![Stage::Screen(Screen::new("fsm", [0.0, 50.0, 0.0]))],
    )
    .unwrap();
    let plots = [xz_plot("fsm", 9, Some([-1.0, 1.0])), xz_plot("fsm", 256, None)];
    let plots = [plots[0].clone(), PlotSpec { name: "auto".into(), ..plots[1].clone() }];
    let template = line.tally_template(&plots).unwrap();
    let config = SimulationConfig { nrays: 100, ..Default::default() };
    let set = line.tally(&config, &template, &mut StdRng::seed_from_u64(1)).unwrap();

    for hist in &set.histograms {
        let counts = hist.counts();
        let filled: Vec<_> = counts.indexed_iter().filter(|(_, v)| **v > 0.0).collect();
        assert_eq!(filled.len(), 1, "{}: expected a single filled bin", hist.name());
        assert_eq!(*filled[0].1, 100.0);
        let snap = hist.finalize(set.rays_shone);
        let (ix, iy) = filled[0].0;
        assert!(snap.x_edges[ix] <= 0.0 && 0.0 <= snap.x_edges[ix + 1]);
        assert!(snap.y_edges[iy] <= 0.0 && 0.0 <= snap.y_edges[iy + 1]);
    }
}

#[test]
fn test_axis_parallel_rays_never_reflect_in_straight_bore() {
    let source = GeometricSource {
        distx: Distribution::Flat { min: -0.05, max: 0.05 },
        distz: Distribution::Flat { min: -0.05, max: 0.05 },
        ..Default::default()
    };
    let element = OpticalElement::new("cap", capillary(0.1, 0.1), Arc::new(IdealMirror)).unwrap();
    let line = Beamline::new(source, vec![Stage::Element(element)]).unwrap();
    let round = line
        .propagate(500, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(2))
        .unwrap();
    let Some(Beam::Rays(exit)) = round.beams.get("cap_global") else {
        panic!("missing exit beam");
    };
    assert_eq!(exit.len(), 500);
    assert!(exit.bounces().iter().all(|&b| b == 0));
    assert!(exit.statuses().iter().all(|&s| s == RayStatus::Escaped));
    assert_eq!(round.accepted, 500);
}

#[test]
fn test_directions_stay_unit_through_reflections() {
    let source = GeometricSource {
        distxprime: Distribution::Annulus { inner: 0.0, outer: 2e-3 },
        energies: Distribution::Lines { values: vec![8000.0, 9000.0] },
        ..Default::default()
    };
    let glass = Arc::new(TabulatedMaterial::fused_silica().unwrap());
    let element = OpticalElement::new("cap", capillary(0.1, 0.06), glass)
        .unwrap()
        .with_max_reflections(50);
    let line = Beamline::new(source, vec![Stage::Element(element)]).unwrap();
    let round = line
        .propagate(400, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(3))
        .unwrap();
    let Some(Beam::Local(local)) = round.beams.get("cap_local") else {
        panic!("missing local beam");
    };
    let mut reflected = 0;
    for ray in local.rays.iter() {
        assert_relative_eq!(ray.direction.norm(), 1.0, epsilon = 1e-9);
        if ray.bounces > 0 {
            reflected += 1;
            assert!(ray.intensity <= 1.0);
        }
    }
    assert!(reflected > 0, "a 2 mrad cone must touch the wall");
}

#[test]
fn test_zero_max_bounces_returns_rays_unmoved() {
    let source = GeometricSource {
        distx: Distribution::Flat { min: -0.05, max: 0.05 },
        ..Default::default()
    };
    let element = OpticalElement::new("cap", capillary(0.1, 0.1), Arc::new(IdealMirror))
        .unwrap()
        .with_max_reflections(0)
        .with_accept(vec![RayStatus::OutOfRange])
        .unwrap();
    let line = Beamline::new(source, vec![Stage::Element(element)]).unwrap();
    let round = line
        .propagate(50, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(4))
        .unwrap();
    let (Some(Beam::Rays(before)), Some(Beam::Rays(after))) =
        (round.beams.get("source"), round.beams.get("cap_global"))
    else {
        panic!("missing beams");
    };
    assert_eq!(after.len(), before.len());
    for i in 0..before.len() {
        assert_eq!(after.position(i), before.position(i));
        assert_eq!(after.direction(i), before.direction(i));
        assert_eq!(after.status(i), RayStatus::OutOfRange);
    }
    assert_eq!(round.accepted, 0);
}

#[test]
fn test_screen_hits_equal_alive_count() {
    let source = GeometricSource {
        distxprime: Distribution::Normal { mean: 0.0, sigma: 1e-3 },
        distzprime: Distribution::Normal { mean: 0.0, sigma: 1e-3 },
        ..Default::default()
    };
    let line = Beamline::new(source, vec![Stage::Screen(Screen::new("fsm", [0.0, 10.0, 0.0]))]).unwrap();
    let round = line
        .propagate(300, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(5))
        .unwrap();
    let Some(Beam::Screen(hits)) = round.beams.get("fsm") else {
        panic!("missing screen beam");
    };
    let alive = round.status["source"].get(RayStatus::Alive);
    assert_eq!(hits.len() as u64, alive);
    assert_eq!(hits.missed, 0);
}

#[test]
fn test_round_tallies_merge_in_any_order() {
    let source = GeometricSource {
        distx: Distribution::Flat { min: -0.5, max: 0.5 },
        distz: Distribution::Flat { min: -0.5, max: 0.5 },
        ..Default::default()
    };
    let line = Beamline::new(source, vec![Stage::Screen(Screen::new("fsm", [0.0, 1.0, 0.0]))]).unwrap();
    let template = line.tally_template(&[xz_plot("fsm", 16, Some([-0.5, 0.5]))]).unwrap();
    let config = SimulationConfig { nrays: 200, ..Default::default() };
    let rounds: Vec<_> = (0..3)
        .map(|seed| line.tally(&config, &template, &mut StdRng::seed_from_u64(seed)).unwrap())
        .collect();

    let mut forward = template.empty_like();
    for r in &rounds {
        forward.merge(r).unwrap();
    }
    let mut backward = template.empty_like();
    for r in rounds.iter().rev() {
        backward.merge(r).unwrap();
    }
    assert_eq!(forward, backward);
    assert_eq!(forward.rays_shone, 600);
    assert_eq!(forward.histograms[0].counts().sum(), 600.0);
}

/// Wide cone entering the bore directly, so most rays meet the glass wall.
fn glass_line() -> Beamline {
    let source = GeometricSource {
        center: [0.0, 100.0, 0.0],
        distxprime: Distribution::Annulus { inner: 0.0, outer: 4e-3 },
        ..Default::default()
    };
    let glass = Arc::new(TabulatedMaterial::fused_silica().unwrap());
    let element = OpticalElement::new("cap", capillary(0.1, 0.1), glass)
        .unwrap()
        .with_max_reflections(10);
    Beamline::new(source, vec![Stage::Element(element)]).unwrap()
}

#[test]
fn test_stochastic_survival_matches_mean_weight() {
    let n = 20_000;
    let line = glass_line();
    let weighted = line
        .propagate(n, ReflectivityPolicy::Weight, &mut StdRng::seed_from_u64(11))
        .unwrap();
    let stochastic = line
        .propagate(n, ReflectivityPolicy::Stochastic, &mut StdRng::seed_from_u64(11))
        .unwrap();

    let Some(Beam::Rays(exit)) = weighted.beams.get("cap_global") else {
        panic!("missing exit beam");
    };
    let mean_weight = exit.intensities().iter().sum::<f64>() / n as f64;
    let survival = stochastic.status["cap"].get(RayStatus::Escaped) as f64 / n as f64;

    assert!(mean_weight > 0.05 && mean_weight < 0.95, "mean weight {}", mean_weight);
    assert_eq!(weighted.status["cap"].get(RayStatus::Absorbed), 0);
    assert!(stochastic.status["cap"].get(RayStatus::Absorbed) > 0);
    // Binomial standard error is below 0.004 at this n.
    assert!((survival - mean_weight).abs() < 0.02, "survival {} vs weight {}", survival, mean_weight);
}

#[test]
fn test_stochastic_policy_is_reproducible() {
    let line = glass_line();
    let run = |seed: u64| {
        line.propagate(2000, ReflectivityPolicy::Stochastic, &mut StdRng::seed_from_u64(seed))
            .unwrap()
    };
    let (a, b) = (run(21), run(21));
    let (Some(Beam::Rays(exit_a)), Some(Beam::Rays(exit_b))) = (a.beams.get("cap_global"), b.beams.get("cap_global"))
    else {
        panic!("missing exit beams");
    };
    assert_eq!(exit_a, exit_b);
    assert_eq!(a.status, b.status);
    assert_eq!(a.accepted, b.accepted);
    let Some(Beam::Local(local)) = a.beams.get("cap_local") else {
        panic!("missing local beam");
    };
    let Some(Beam::Local(local_b)) = b.beams.get("cap_local") else {
        panic!("missing local beam");
    };
    assert_eq!(local.rays.statuses(), local_b.rays.statuses());
}
