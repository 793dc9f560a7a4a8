//! Run driver behaviour across backends.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use grazer_compute::{round_seed, ComputeBackend, CpuBackend, RunDriver, RunError, SerialBackend};
use grazer_core::beamline::{Beamline, Stage};
use grazer_core::distributions::Distribution;
use grazer_core::histogram::{AxisSpec, PlotSpec, Quantity};
use grazer_core::optics::OpticalElement;
use grazer_core::screen::Screen;
use grazer_core::source::GeometricSource;
use grazer_core::{RayStatus, SimulationConfig};
use grazer_geometry::capillary::{CapillaryParams, StraightCapillary};
use grazer_geometry::Surface;
use grazer_materials::{FresnelAmplitudes, MaterialError, ReflectivityProvider, TabulatedMaterial};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn capillary() -> Surface {
    Surface::Capillary(
        StraightCapillary::new(CapillaryParams {
            r_sample: 100.0,
            f: 300.0,
            r_in: 0.1,
            r_out: 0.05,
            entrance_alpha: 0.0,
            axis_offset: 0.0,
            lim_phys_y: None,
        })
        .unwrap(),
    )
}

fn beamline(material: Arc<dyn ReflectivityProvider>) -> Arc<Beamline> {
    let source = GeometricSource {
        distx: Distribution::Flat { min: -0.1, max: 0.1 },
        distz: Distribution::Flat { min: -0.1, max: 0.1 },
        distxprime: Distribution::Normal { mean: 0.0, sigma: 5e-4 },
        distzprime: Distribution::Normal { mean: 0.0, sigma: 5e-4 },
        energies: Distribution::Normal { mean: 9000.0, sigma: 20.0 },
        ..Default::default()
    };
    let element = OpticalElement::new("cap", capillary(), material).unwrap();
    Arc::new(
        Beamline::new(
            source,
            vec![
                Stage::Element(element),
                Stage::Screen(Screen::new("fsm", [0.0, 320.0, 0.0])),
            ],
        )
        .unwrap(),
    )
}

fn plots() -> Vec<PlotSpec> {
    vec![PlotSpec {
        name: "x_xprime".into(),
        beam: "fsm".into(),
        x: AxisSpec::new(Quantity::X, 64, None),
        y: AxisSpec { scale: 1e3, ..AxisSpec::new(Quantity::XPrime, 64, None) },
        c: Some(AxisSpec::new(Quantity::Reflections, 8, Some([0.0, 8.0]))),
        binning: Default::default(),
        normalization: Default::default(),
    }]
}

fn glass() -> Arc<dyn ReflectivityProvider> {
    Arc::new(TabulatedMaterial::fused_silica().unwrap())
}

#[test]
fn test_all_rays_accounted_for() {
    let line = beamline(glass());
    let config = SimulationConfig { nrays: 1000, repeats: 4, processes: 4, seed: 42, ..Default::default() };
    let backend: Arc<dyn ComputeBackend> = Arc::new(CpuBackend::with_threads(4).unwrap());
    let template = line.tally_template(&plots()).unwrap();
    let report = RunDriver::new(line, config, backend).unwrap().run(&template).unwrap();

    assert_eq!(report.rounds_completed, 4);
    assert_eq!(report.rays_traced, 4000);
    assert_eq!(report.tallies.rays_shone, 4000);
    let source = &report.tallies.status["source"];
    assert_eq!(source.total(), 4000);
    let cap = &report.tallies.status["cap"];
    assert_eq!(cap.total(), 4000);
    assert_eq!(cap.get(RayStatus::Alive), 0);
    assert_eq!(cap.get(RayStatus::Escaped), report.tallies.accepted);
    assert!(report.tallies.accepted > 0);

    let hist = report.tallies.get("x_xprime").unwrap();
    assert_eq!(hist.entries() + hist.dropped(), report.tallies.accepted);
    assert_eq!(report.acceptance.rounds, 4);
}

#[test]
fn test_worker_count_does_not_change_result() {
    let line = beamline(glass());
    let template = line.tally_template(&plots()).unwrap();
    let run = |processes: usize, backend: Arc<dyn ComputeBackend>| {
        let config = SimulationConfig { nrays: 500, repeats: 4, processes, seed: 7, ..Default::default() };
        RunDriver::new(Arc::clone(&line), config, backend)
            .unwrap()
            .run(&template)
            .unwrap()
            .tallies
    };
    let serial = run(1, Arc::new(SerialBackend));
    let parallel = run(4, Arc::new(CpuBackend::with_threads(4).unwrap()));
    assert_eq!(serial, parallel);
}

#[test]
fn test_observer_sees_every_wave() {
    let line = beamline(glass());
    let template = line.tally_template(&plots()).unwrap();
    let config = SimulationConfig { nrays: 200, repeats: 5, processes: 2, ..Default::default() };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let report = RunDriver::new(line, config, Arc::new(SerialBackend))
        .unwrap()
        .with_observer(move |p| sink.lock().unwrap().push(p.rounds_done))
        .run(&template)
        .unwrap();
    assert_eq!(report.rounds_completed, 5);
    // First wave is a single round: the plot limits are automatic.
    assert_eq!(*seen.lock().unwrap(), vec![1, 3, 5]);
}

#[test]
fn test_unlit_screen_keeps_waves_full() {
    let source = GeometricSource {
        distx: Distribution::Flat { min: -0.1, max: 0.1 },
        distz: Distribution::Flat { min: -0.1, max: 0.1 },
        ..Default::default()
    };
    // Rays travel towards +y and never reach the first screen.
    let line = Arc::new(
        Beamline::new(
            source,
            vec![
                Stage::Screen(Screen::new("behind", [0.0, -5.0, 0.0])),
                Stage::Screen(Screen::new("ahead", [0.0, 50.0, 0.0])),
            ],
        )
        .unwrap(),
    );
    let spot = |beam: &str| PlotSpec {
        name: format!("{}_xz", beam),
        beam: beam.into(),
        x: AxisSpec::new(Quantity::X, 16, None),
        y: AxisSpec::new(Quantity::Z, 16, None),
        c: None,
        binning: Default::default(),
        normalization: Default::default(),
    };
    let template = line.tally_template(&[spot("behind"), spot("ahead")]).unwrap();
    let config = SimulationConfig { nrays: 50, repeats: 7, processes: 3, ..Default::default() };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let report = RunDriver::new(line, config, Arc::new(SerialBackend))
        .unwrap()
        .with_observer(move |p| sink.lock().unwrap().push(p.rounds_done))
        .run(&template)
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 4, 7]);
    let behind = report.tallies.get("behind_xz").unwrap();
    assert!(behind.needs_limits());
    assert_eq!(behind.entries(), 0);
    let ahead = report.tallies.get("ahead_xz").unwrap();
    assert_eq!(ahead.entries() + ahead.dropped(), 350);
}

#[test]
fn test_limits_fixed_mid_wave_match_single_worker() {
    let line = beamline(glass());
    let template = line.tally_template(&plots()).unwrap();
    let config = |seed: u64, processes: usize| SimulationConfig { nrays: 1, repeats: 6, processes, seed, ..Default::default() };
    let lit = |seed: u64, round: u64| {
        let mut rng = StdRng::seed_from_u64(round_seed(seed, round, 0));
        let set = line.tally(&config(seed, 1), &template, &mut rng).unwrap();
        set.histograms[0].entries() > 0
    };
    // Round 0 leaves the plot blank, and several rounds of the next wave fix their own limits.
    let seed = (0..500u64)
        .find(|&seed| !lit(seed, 0) && (1..4).filter(|&r| lit(seed, r)).count() >= 2)
        .expect("no seed with a blank first round");

    let run = |processes: usize, backend: Arc<dyn ComputeBackend>| {
        RunDriver::new(Arc::clone(&line), config(seed, processes), backend)
            .unwrap()
            .run(&template)
            .unwrap()
            .tallies
    };
    let serial = run(1, Arc::new(SerialBackend));
    let parallel = run(3, Arc::new(CpuBackend::with_threads(3).unwrap()));
    assert!(serial.histograms[0].entries() >= 2);
    assert_eq!(serial, parallel);
}

#[test]
fn test_cancel_before_start_runs_nothing() {
    let line = beamline(glass());
    let template = line.tally_template(&plots()).unwrap();
    let config = SimulationConfig { nrays: 100, repeats: 3, ..Default::default() };
    let driver = RunDriver::new(line, config, Arc::new(SerialBackend)).unwrap();
    driver.cancel_flag().store(true, Ordering::Relaxed);
    let report = driver.run(&template).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.rounds_completed, 0);
    assert_eq!(report.tallies.rays_shone, 0);
}

/// Fails its first reflectivity query, then behaves as an ideal mirror.
struct FlakyMirror {
    failed: AtomicBool,
    calls: AtomicUsize,
}

impl ReflectivityProvider for FlakyMirror {
    fn name(&self) -> &str {
        "flaky"
    }

    fn energy_range(&self) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }

    fn fresnel(&self, _theta: f64, _energy_ev: f64) -> Result<FresnelAmplitudes, MaterialError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.failed.swap(true, Ordering::Relaxed) {
            return Err(MaterialError::DataError("transient read failure".into()));
        }
        let r = Complex64::new(-1.0, 0.0);
        Ok(FresnelAmplitudes { rs: r, rp: r })
    }
}

#[test]
fn test_failed_round_is_retried_once() {
    let flaky = Arc::new(FlakyMirror { failed: AtomicBool::new(false), calls: AtomicUsize::new(0) });
    let line = beamline(flaky.clone());
    let template = line.tally_template(&plots()).unwrap();
    let config = SimulationConfig { nrays: 300, repeats: 2, ..Default::default() };
    let report = RunDriver::new(line, config, Arc::new(SerialBackend))
        .unwrap()
        .run(&template)
        .unwrap();
    assert_eq!(report.retries, 1);
    assert_eq!(report.rounds_completed, 2);
    assert_eq!(report.tallies.rays_shone, 600);
    assert!(flaky.calls.load(Ordering::Relaxed) > 1);
}

struct BrokenMirror;

impl ReflectivityProvider for BrokenMirror {
    fn name(&self) -> &str {
        "broken"
    }

    fn energy_range(&self) -> (f64, f64) {
        (0.0, f64::INFINITY)
    }

    fn fresnel(&self, _theta: f64, _energy_ev: f64) -> Result<FresnelAmplitudes, MaterialError> {
        Err(MaterialError::DataError("unreadable table".into()))
    }
}

#[test]
fn test_second_failure_aborts_run() {
    let line = beamline(Arc::new(BrokenMirror));
    let template = line.tally_template(&plots()).unwrap();
    let config = SimulationConfig { nrays: 300, repeats: 2, ..Default::default() };
    let result = RunDriver::new(line, config, Arc::new(SerialBackend)).unwrap().run(&template);
    assert!(matches!(result, Err(RunError::RoundFailed { round: 0, .. })));
}
