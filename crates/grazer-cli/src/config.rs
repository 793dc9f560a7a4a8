//! TOML configuration deserialisation for simulation jobs.

use grazer_core::config::ConfigError;
use grazer_core::distributions::Distribution;
use grazer_core::histogram::PlotSpec;
use grazer_core::rays::{Polarization, RayStatus};
use grazer_core::source::{GeometricSource, DEFAULT_ENERGY_EV};
use grazer_core::SimulationConfig;
use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub element: Vec<ElementConfig>,
    #[serde(default)]
    pub screen: Vec<ScreenConfig>,
    #[serde(default)]
    pub plot: Vec<PlotSpec>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Run settings: the core [`SimulationConfig`] plus the backend choice.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(flatten)]
    pub simulation: SimulationConfig,
    /// Compute backend: "auto", "cpu", or "serial". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "auto".into()
}

/// A distribution parameter: one number or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Scalar(f64),
    List(Vec<f64>),
}

impl Params {
    fn as_slice(&self) -> &[f64] {
        match self {
            Params::Scalar(v) => std::slice::from_ref(v),
            Params::List(v) => v,
        }
    }
}

/// Source section. Each axis is a distribution kind plus its parameters,
/// e.g. `distx = "flat"`, `dx = 0.01` or `distxprime = "annulus"`,
/// `dxprime = [0.0, 1.5e-5]`. Parameters given without a kind are read as
/// `normal`; an axis with neither is fixed at zero.
#[derive(Debug, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub position: [f64; 3],
    pub distx: Option<String>,
    pub dx: Option<Params>,
    pub distz: Option<String>,
    pub dz: Option<Params>,
    pub distxprime: Option<String>,
    pub dxprime: Option<Params>,
    pub distzprime: Option<String>,
    pub dzprime: Option<Params>,
    #[serde(rename = "distE")]
    pub dist_e: Option<String>,
    pub energies: Option<Params>,
    #[serde(default)]
    pub polarization: Polarization,
}

fn axis_distribution(kind: &Option<String>, params: &Option<Params>, what: &str) -> Result<Distribution, ConfigError> {
    match (kind, params) {
        (None, None) => Ok(Distribution::default()),
        (kind, Some(p)) => Distribution::from_kind(kind.as_deref().unwrap_or("normal"), p.as_slice(), what),
        (Some(kind), None) => Err(ConfigError::InvalidDistribution {
            what: what.into(),
            reason: format!("'{}' given without parameters", kind),
        }),
    }
}

impl SourceConfig {
    pub fn build(&self) -> Result<GeometricSource, ConfigError> {
        let energies = match (&self.dist_e, &self.energies) {
            (None, None) => Distribution::Lines { values: vec![DEFAULT_ENERGY_EV] },
            (kind, Some(p)) => Distribution::from_kind(kind.as_deref().unwrap_or("lines"), p.as_slice(), "energies")?,
            (Some(kind), None) => {
                return Err(ConfigError::InvalidDistribution {
                    what: "energies".into(),
                    reason: format!("distE '{}' given without energies", kind),
                })
            }
        };
        let source = GeometricSource {
            center: self.position,
            distx: axis_distribution(&self.distx, &self.dx, "distx")?,
            distz: axis_distribution(&self.distz, &self.dz, "distz")?,
            distxprime: axis_distribution(&self.distxprime, &self.dxprime, "distxprime")?,
            distzprime: axis_distribution(&self.distzprime, &self.dzprime, "distzprime")?,
            energies,
            polarization: self.polarization,
        };
        source.validate()?;
        Ok(source)
    }
}

/// A reflective element.
#[derive(Debug, Deserialize)]
pub struct ElementConfig {
    pub name: String,
    /// Element type; only "capillary" exists.
    #[serde(rename = "type", default = "default_element_type")]
    pub element_type: String,
    /// Built-in material identifier, or "ideal" for a lossless wall.
    pub material: String,
    /// Density override (g/cm³).
    pub density: Option<f64>,
    pub r_sample: f64,
    pub f: f64,
    pub r_in: f64,
    pub r_out: f64,
    #[serde(default)]
    pub entrance_alpha: f64,
    #[serde(default = "default_max_reflections")]
    pub max_reflections: u32,
    pub lim_phys_y: Option<[f64; 2]>,
    /// Element origin in the beamline frame (mm).
    #[serde(default)]
    pub position: [f64; 3],
    /// Rotation about the beam axis (rad).
    #[serde(default)]
    pub roll: f64,
    #[serde(default = "default_accept")]
    pub accept: Vec<RayStatus>,
}

fn default_element_type() -> String {
    "capillary".into()
}
fn default_max_reflections() -> u32 {
    4
}
fn default_accept() -> Vec<RayStatus> {
    vec![RayStatus::Escaped]
}

/// A detector screen.
#[derive(Debug, Deserialize)]
pub struct ScreenConfig {
    pub name: String,
    pub position: [f64; 3],
    /// Element the screen follows; omitted means right after the source.
    pub after: Option<String>,
    pub normal: Option<[f64; 3]>,
    pub x_axis: Option<[f64; 3]>,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save each plot as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_csv: bool,
    /// Whether to also save a JSON run summary (default: false).
    #[serde(default)]
    pub save_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_csv: true,
            save_json: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<JobConfig> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: JobConfig = toml::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}
