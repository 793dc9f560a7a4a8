//! Simulation runner: ties together source, elements, screens and the driver.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use grazer_compute::{BatchStatistics, ComputeBackend, RunDriver, RunReport, SerialBackend};
use grazer_core::beamline::{Beamline, Stage};
use grazer_core::histogram::HistogramSnapshot;
use grazer_core::optics::OpticalElement;
use grazer_core::screen::Screen;
use grazer_core::{StatusCounts, TallySet};
use grazer_geometry::capillary::{CapillaryParams, StraightCapillary};
use grazer_geometry::{Frame, Surface};
use grazer_materials::{IdealMirror, ReflectivityProvider, TabulatedMaterial};

use crate::config::{ElementConfig, JobConfig, ScreenConfig};

/// Build the beamline described by a job, with screens slotted in after
/// the element they name.
pub fn build_beamline(job: &JobConfig) -> Result<Beamline> {
    let source = job.source.build().context("invalid [source] section")?;

    for screen in &job.screen {
        if let Some(after) = &screen.after {
            if !job.element.iter().any(|e| &e.name == after) {
                anyhow::bail!("screen '{}' follows unknown element '{}'", screen.name, after);
            }
        }
    }
    let screens_after = |element: Option<&str>| -> Result<Vec<Stage>> {
        job.screen
            .iter()
            .filter(|s| s.after.as_deref() == element)
            .map(|s| build_screen(s).map(Stage::Screen))
            .collect()
    };

    let mut stages = screens_after(None)?;
    for element in &job.element {
        stages.push(Stage::Element(build_element(element)?));
        stages.extend(screens_after(Some(&element.name))?);
    }
    Ok(Beamline::new(source, stages)?)
}

fn build_element(cfg: &ElementConfig) -> Result<OpticalElement> {
    if cfg.element_type != "capillary" {
        anyhow::bail!("element '{}': unknown type '{}' (expected capillary)", cfg.name, cfg.element_type);
    }
    let capillary = StraightCapillary::new(CapillaryParams {
        r_sample: cfg.r_sample,
        f: cfg.f,
        r_in: cfg.r_in,
        r_out: cfg.r_out,
        entrance_alpha: cfg.entrance_alpha,
        axis_offset: 0.0,
        lim_phys_y: cfg.lim_phys_y,
    })
    .with_context(|| format!("element '{}'", cfg.name))?;

    let material = resolve_material(&cfg.material, cfg.density)
        .with_context(|| format!("element '{}'", cfg.name))?;
    println!(
        "  Element '{}': capillary r_in={} r_out={} mm, material={}",
        cfg.name,
        cfg.r_in,
        cfg.r_out,
        material.name()
    );

    Ok(OpticalElement::new(cfg.name.clone(), Surface::Capillary(capillary), material)?
        .with_frame(Frame::placed(cfg.position, cfg.roll))
        .with_max_reflections(cfg.max_reflections)
        .with_accept(cfg.accept.clone())?)
}

fn build_screen(cfg: &ScreenConfig) -> Result<Screen> {
    let screen = match (cfg.normal, cfg.x_axis) {
        (None, None) => Screen::new(cfg.name.clone(), cfg.position),
        (normal, x_axis) => Screen::oriented(
            cfg.name.clone(),
            cfg.position,
            normal.unwrap_or([0.0, 1.0, 0.0]),
            x_axis.unwrap_or([1.0, 0.0, 0.0]),
        )
        .with_context(|| format!("screen '{}'", cfg.name))?,
    };
    Ok(screen)
}

/// Resolve a material identifier to a reflectivity provider.
fn resolve_material(id: &str, density: Option<f64>) -> Result<Arc<dyn ReflectivityProvider>> {
    if id.eq_ignore_ascii_case("ideal") {
        return Ok(Arc::new(IdealMirror));
    }
    let material = TabulatedMaterial::builtin(id)?;
    let material = match density {
        Some(rho) => material.with_density(rho)?,
        None => material,
    };
    Ok(Arc::new(material))
}

/// Create a compute backend based on the user's preference string.
///
/// - `"serial"`: run rounds on the current thread.
/// - `"cpu"`: Rayon pool with `processes` threads.
/// - `"auto"` (default): CPU when built with it and `processes > 1`, serial otherwise.
pub fn create_backend(preference: &str, processes: usize) -> Result<Arc<dyn ComputeBackend>> {
    let backend: Arc<dyn ComputeBackend> = match preference {
        "serial" => Arc::new(SerialBackend),
        "cpu" => {
            #[cfg(feature = "cpu")]
            {
                Arc::new(grazer_compute::CpuBackend::with_threads(processes)?)
            }
            #[cfg(not(feature = "cpu"))]
            {
                anyhow::bail!("CPU backend requested but binary was built without --features cpu");
            }
        }
        "auto" if cfg!(feature = "cpu") && processes > 1 => return create_backend("cpu", processes),
        "auto" => Arc::new(SerialBackend),
        other => anyhow::bail!("Unknown backend '{}' (expected auto, cpu or serial)", other),
    };
    println!("Backend: {}", backend.device_info().name);
    Ok(backend)
}

/// Build everything a run needs and check it, without tracing a ray.
pub fn prepare(job: &JobConfig) -> Result<(Arc<Beamline>, TallySet)> {
    job.run.simulation.validate().context("invalid [run] section")?;
    let beamline = build_beamline(job)?;
    let template = beamline.tally_template(&job.plot).context("invalid [[plot]] section")?;
    Ok((Arc::new(beamline), template))
}

/// Run a full simulation from a parsed job configuration.
pub fn run_simulation(job: &JobConfig) -> Result<RunReport> {
    let (beamline, template) = prepare(job)?;
    let config = job.run.simulation.clone();
    let backend = create_backend(&job.run.backend, config.processes)?;

    println!(
        "Tracing {} x {} rays ({} worker(s))",
        config.repeats, config.nrays, config.processes
    );
    let driver = RunDriver::new(beamline, config, backend)?.with_observer(|p| {
        println!(
            "  [{}/{}] {} rays, acceptance {:.4e} +- {:.1e}",
            p.rounds_done, p.rounds_total, p.rays_traced, p.acceptance.mean, p.acceptance.std_error
        );
    });
    let report = driver.run(&template)?;
    if report.retries > 0 {
        println!("  {} round(s) needed a retry", report.retries);
    }
    Ok(report)
}

/// Write one finalised plot to a CSV file with a metadata header.
pub fn write_plot_csv(snapshot: &HistogramSnapshot, path: &Path, job: &JobConfig) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(path)?;

    // Metadata header
    writeln!(file, "# Grazer ray tracer: plot '{}' of beam '{}'", snapshot.name, snapshot.beam)?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(
        file,
        "# nrays: {}, repeats: {}, seed: {}",
        job.run.simulation.nrays, job.run.simulation.repeats, job.run.simulation.seed
    )?;
    writeln!(
        file,
        "# entries: {}, dropped: {}, rays_shone: {}, normalization: {:?}",
        snapshot.entries, snapshot.dropped, snapshot.rays_shone, snapshot.normalization
    )?;
    writeln!(file, "# ppb: {}x{}", snapshot.ppb[0], snapshot.ppb[1])?;
    writeln!(file, "#")?;

    let has_c = snapshot.c_mean.is_some();
    let (x, y) = (&snapshot.x_label, &snapshot.y_label);
    if has_c {
        let c = snapshot.c_label.as_deref().unwrap_or("c");
        writeln!(file, "{x}_lo,{x}_hi,{y}_lo,{y}_hi,value,mean_{c}")?;
    } else {
        writeln!(file, "{x}_lo,{x}_hi,{y}_lo,{y}_hi,value")?;
    }

    for (iy, row) in snapshot.values.iter().enumerate() {
        for (ix, value) in row.iter().enumerate() {
            let edges = (
                snapshot.x_edges[ix],
                snapshot.x_edges[ix + 1],
                snapshot.y_edges[iy],
                snapshot.y_edges[iy + 1],
            );
            match &snapshot.c_mean {
                Some(c_mean) => writeln!(
                    file,
                    "{:.6e},{:.6e},{:.6e},{:.6e},{:.6e},{:.4}",
                    edges.0, edges.1, edges.2, edges.3, value, c_mean[iy][ix]
                )?,
                None => writeln!(
                    file,
                    "{:.6e},{:.6e},{:.6e},{:.6e},{:.6e}",
                    edges.0, edges.1, edges.2, edges.3, value
                )?,
            }
        }
    }

    println!("Plot written to: {}", path.display());
    Ok(())
}

/// Serialisable run summary.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub version: &'static str,
    pub rounds_completed: u64,
    pub rays_traced: u64,
    pub accepted: u64,
    pub retries: u64,
    pub cancelled: bool,
    pub acceptance: &'a BatchStatistics,
    pub status: &'a BTreeMap<String, StatusCounts>,
    pub plots: Vec<HistogramSnapshot>,
}

impl<'a> RunSummary<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            rounds_completed: report.rounds_completed,
            rays_traced: report.rays_traced,
            accepted: report.tallies.accepted,
            retries: report.retries,
            cancelled: report.cancelled,
            acceptance: &report.acceptance,
            status: &report.tallies.status,
            plots: report.tallies.snapshots(),
        }
    }
}

/// Write the run summary to a JSON file.
pub fn write_summary_json(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(&RunSummary::new(report))
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)?;

    println!("Summary (JSON) written to: {}", path.display());
    Ok(())
}
