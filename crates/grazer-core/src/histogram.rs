//! Two-dimensional accumulators.
//!
//! A [`Histogram2D`] bins `(x, y)` samples with per-sample weights into a
//! fixed grid. An optional third quantity `c` is tracked per bin as a
//! weighted sum (finalised to a per-bin mean) and as its own 1D marginal,
//! which is what colour-coded plots are drawn from.
//!
//! ## Binning
//!
//! | Mode | Rule |
//! |------|------|
//! | `nearest` | whole weight into the bin containing the sample |
//! | `linear` | weight shared bilinearly between the four nearest bin centres |
//!
//! Samples outside the limits (on any configured axis) are dropped and
//! counted. Limits left unset are fixed from the first non-empty batch and
//! never change afterwards, so partial histograms stay mergeable.
//!
//! Merging is bin-wise addition: associative and commutative, and exact
//! whenever the weights are exactly representable.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rays::StatusCounts;

/// Relative margin added around automatically chosen limits.
const AUTO_LIMIT_MARGIN: f64 = 0.05;

#[derive(Debug, Error)]
pub enum HistogramError {
    #[error("Histograms cannot be merged: {0}")]
    Mismatch(String),

    #[error("Sample arrays differ in length: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Histogram '{0}' has a category axis but no category values were given")]
    MissingCategory(String),

    #[error("Invalid axis: {0}")]
    InvalidAxis(String),
}

/// Quantity plotted on a histogram axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    #[serde(rename = "x")]
    X,
    #[serde(rename = "z")]
    Z,
    #[serde(rename = "x'", alias = "xprime")]
    XPrime,
    #[serde(rename = "z'", alias = "zprime")]
    ZPrime,
    #[serde(rename = "energy")]
    Energy,
    #[serde(rename = "reflections")]
    Reflections,
    #[serde(rename = "intensity")]
    Intensity,
    #[serde(rename = "s")]
    S,
    #[serde(rename = "phi")]
    Phi,
    #[serde(rename = "r")]
    R,
}

impl Quantity {
    pub fn label(self) -> &'static str {
        match self {
            Quantity::X => "x",
            Quantity::Z => "z",
            Quantity::XPrime => "x'",
            Quantity::ZPrime => "z'",
            Quantity::Energy => "energy",
            Quantity::Reflections => "reflections",
            Quantity::Intensity => "intensity",
            Quantity::S => "s",
            Quantity::Phi => "phi",
            Quantity::R => "r",
        }
    }

    /// Only defined on element-local beams.
    pub fn is_local(self) -> bool {
        matches!(self, Quantity::S | Quantity::Phi | Quantity::R)
    }
}

/// One histogram axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub quantity: Quantity,
    #[serde(default = "default_bins")]
    pub bins: usize,
    /// `[min, max]` in scaled units; `None` for automatic limits.
    #[serde(default)]
    pub limits: Option<[f64; 2]>,
    /// Pixels per bin used by [`HistogramSnapshot::upsampled`].
    #[serde(default = "default_ppb")]
    pub ppb: usize,
    /// Unit factor applied to raw values (1e3 turns rad into mrad).
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_bins() -> usize {
    256
}
fn default_ppb() -> usize {
    2
}
fn default_scale() -> f64 {
    1.0
}

impl AxisSpec {
    pub fn new(quantity: Quantity, bins: usize, limits: Option<[f64; 2]>) -> Self {
        Self { quantity, bins, limits, ppb: default_ppb(), scale: default_scale() }
    }

    pub fn validate(&self) -> Result<(), HistogramError> {
        let name = self.quantity.label();
        if self.bins == 0 {
            return Err(HistogramError::InvalidAxis(format!("{}: bins must be at least 1", name)));
        }
        if self.ppb == 0 {
            return Err(HistogramError::InvalidAxis(format!("{}: ppb must be at least 1", name)));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(HistogramError::InvalidAxis(format!("{}: scale must be finite and non-zero", name)));
        }
        if let Some([lo, hi]) = self.limits {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(HistogramError::InvalidAxis(format!(
                    "{}: limits [{}, {}] must be finite with min < max",
                    name, lo, hi
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binning {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    None,
    /// Divide by the number of rays shone.
    PerRay,
    /// Scale so the highest bin is 1.
    Max,
}

/// A requested plot: which beam, which axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    pub name: String,
    pub beam: String,
    pub x: AxisSpec,
    pub y: AxisSpec,
    #[serde(default)]
    pub c: Option<AxisSpec>,
    #[serde(default)]
    pub binning: Binning,
    #[serde(default)]
    pub normalization: Normalization,
}

#[derive(Debug, Clone, Copy)]
struct Axis {
    lo: f64,
    hi: f64,
    bins: usize,
}

impl Axis {
    fn width(&self) -> f64 {
        (self.hi - self.lo) / self.bins as f64
    }

    fn contains(&self, v: f64) -> bool {
        v >= self.lo && v <= self.hi
    }

    fn nearest(&self, v: f64) -> Option<usize> {
        if !self.contains(v) {
            return None;
        }
        let i = ((v - self.lo) / self.width()).floor() as usize;
        Some(i.min(self.bins - 1))
    }

    /// Lower neighbour index and weight fraction for the upper neighbour.
    fn linear(&self, v: f64) -> Option<(usize, usize, f64)> {
        if !self.contains(v) {
            return None;
        }
        let u = (v - self.lo) / self.width() - 0.5;
        let last = self.bins - 1;
        if u <= 0.0 {
            return Some((0, 0, 0.0));
        }
        if u >= last as f64 {
            return Some((last, last, 0.0));
        }
        let i0 = u.floor() as usize;
        Some((i0, (i0 + 1).min(last), u - i0 as f64))
    }

    fn edges(&self) -> Vec<f64> {
        let w = self.width();
        (0..=self.bins).map(|i| self.lo + w * i as f64).collect()
    }
}

fn auto_limits(values: impl Iterator<Item = f64>) -> Option<[f64; 2]> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return None;
    }
    let span = hi - lo;
    let pad = if span > 0.0 {
        AUTO_LIMIT_MARGIN * span
    } else {
        (AUTO_LIMIT_MARGIN * lo.abs()).max(0.5)
    };
    Some([lo - pad, hi + pad])
}

/// Weighted 2D histogram with an optional category axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    spec: PlotSpec,
    x_limits: Option<[f64; 2]>,
    y_limits: Option<[f64; 2]>,
    c_limits: Option<[f64; 2]>,
    /// Weight per bin, indexed `[ix, iy]`.
    counts: Array2<f64>,
    /// Weighted sum of the category value per bin.
    c_sum: Array2<f64>,
    x_total: Array1<f64>,
    y_total: Array1<f64>,
    c_total: Array1<f64>,
    entries: u64,
    dropped: u64,
    dropped_weight: f64,
}

impl Histogram2D {
    pub fn new(spec: PlotSpec) -> Result<Self, HistogramError> {
        spec.x.validate()?;
        spec.y.validate()?;
        if let Some(c) = &spec.c {
            c.validate()?;
        }
        let (nx, ny) = (spec.x.bins, spec.y.bins);
        let nc = spec.c.as_ref().map_or(0, |c| c.bins);
        Ok(Self {
            x_limits: spec.x.limits,
            y_limits: spec.y.limits,
            c_limits: spec.c.as_ref().and_then(|c| c.limits),
            counts: Array2::zeros((nx, ny)),
            c_sum: Array2::zeros((nx, ny)),
            x_total: Array1::zeros(nx),
            y_total: Array1::zeros(ny),
            c_total: Array1::zeros(nc),
            entries: 0,
            dropped: 0,
            dropped_weight: 0.0,
            spec,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &PlotSpec {
        &self.spec
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Total weight binned so far.
    pub fn total_weight(&self) -> f64 {
        self.counts.sum()
    }

    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    /// Resolved `(x, y)` limits, if fixed.
    pub fn limits(&self) -> (Option<[f64; 2]>, Option<[f64; 2]>) {
        (self.x_limits, self.y_limits)
    }

    /// Whether some axis still waits for automatic limits.
    pub fn needs_limits(&self) -> bool {
        self.x_limits.is_none() || self.y_limits.is_none() || (self.spec.c.is_some() && self.c_limits.is_none())
    }

    /// Same configuration and resolved limits, no content.
    pub fn empty_like(&self) -> Self {
        let mut h = self.clone();
        h.counts.fill(0.0);
        h.c_sum.fill(0.0);
        h.x_total.fill(0.0);
        h.y_total.fill(0.0);
        h.c_total.fill(0.0);
        h.entries = 0;
        h.dropped = 0;
        h.dropped_weight = 0.0;
        h
    }

    fn is_blank(&self) -> bool {
        self.entries == 0 && self.dropped == 0
    }

    /// Whether both histograms have resolved limits and the limits differ.
    pub fn grid_conflicts(&self, other: &Histogram2D) -> bool {
        !self.needs_limits()
            && !other.needs_limits()
            && (self.x_limits != other.x_limits || self.y_limits != other.y_limits || self.c_limits != other.c_limits)
    }

    /// Bin a batch of raw (unscaled) samples.
    pub fn add(
        &mut self,
        xs: &[f64],
        ys: &[f64],
        weights: &[f64],
        cs: Option<&[f64]>,
    ) -> Result<(), HistogramError> {
        let n = xs.len();
        for len in [ys.len(), weights.len()] {
            if len != n {
                return Err(HistogramError::LengthMismatch { expected: n, got: len });
            }
        }
        let cs = match (&self.spec.c, cs) {
            (Some(_), Some(cs)) if cs.len() != n => {
                return Err(HistogramError::LengthMismatch { expected: n, got: cs.len() })
            }
            (Some(_), None) => return Err(HistogramError::MissingCategory(self.spec.name.clone())),
            (Some(_), Some(cs)) => Some(cs),
            (None, _) => None,
        };
        if n == 0 {
            return Ok(());
        }

        let (sx, sy) = (self.spec.x.scale, self.spec.y.scale);
        let sc = self.spec.c.as_ref().map_or(1.0, |c| c.scale);
        if self.needs_limits() {
            let x = self.x_limits.or_else(|| auto_limits(xs.iter().map(|v| v * sx)));
            let y = self.y_limits.or_else(|| auto_limits(ys.iter().map(|v| v * sy)));
            let c = match cs {
                Some(cs) => self.c_limits.or_else(|| auto_limits(cs.iter().map(|v| v * sc))),
                None => None,
            };
            // Limits are fixed all at once, or not at all.
            if x.is_some() && y.is_some() && (cs.is_none() || c.is_some()) {
                self.x_limits = x;
                self.y_limits = y;
                self.c_limits = c;
            }
        }
        let (Some([xlo, xhi]), Some([ylo, yhi])) = (self.x_limits, self.y_limits) else {
            // Nothing finite to anchor the grid on.
            self.dropped += n as u64;
            self.dropped_weight += weights.iter().sum::<f64>();
            return Ok(());
        };
        let ax = Axis { lo: xlo, hi: xhi, bins: self.spec.x.bins };
        let ay = Axis { lo: ylo, hi: yhi, bins: self.spec.y.bins };
        let ac = match (&self.spec.c, self.c_limits) {
            (Some(c), Some([lo, hi])) => Some(Axis { lo, hi, bins: c.bins }),
            _ => None,
        };

        for i in 0..n {
            let (x, y, w) = (xs[i] * sx, ys[i] * sy, weights[i]);
            let c = cs.map(|cs| cs[i] * sc);
            let ic = match (c, ac) {
                (Some(c), Some(ac)) => match ac.nearest(c) {
                    Some(ic) => Some((ic, c)),
                    None => {
                        self.drop_sample(w);
                        continue;
                    }
                },
                (Some(_), None) => {
                    self.drop_sample(w);
                    continue;
                }
                _ => None,
            };

            let placed = match self.spec.binning {
                Binning::Nearest => match (ax.nearest(x), ay.nearest(y)) {
                    (Some(ix), Some(iy)) => {
                        self.deposit(ix, iy, w, c);
                        true
                    }
                    _ => false,
                },
                Binning::Linear => match (ax.linear(x), ay.linear(y)) {
                    (Some((x0, x1, fx)), Some((y0, y1, fy))) => {
                        self.deposit(x0, y0, w * (1.0 - fx) * (1.0 - fy), c);
                        self.deposit(x1, y0, w * fx * (1.0 - fy), c);
                        self.deposit(x0, y1, w * (1.0 - fx) * fy, c);
                        self.deposit(x1, y1, w * fx * fy, c);
                        true
                    }
                    _ => false,
                },
            };
            if !placed {
                self.drop_sample(w);
                continue;
            }
            if let Some((ic, _)) = ic {
                self.c_total[ic] += w;
            }
            self.entries += 1;
        }
        Ok(())
    }

    fn deposit(&mut self, ix: usize, iy: usize, w: f64, c: Option<f64>) {
        if w == 0.0 {
            return;
        }
        self.counts[[ix, iy]] += w;
        self.x_total[ix] += w;
        self.y_total[iy] += w;
        if let Some(c) = c {
            self.c_sum[[ix, iy]] += w * c;
        }
    }

    fn drop_sample(&mut self, w: f64) {
        self.dropped += 1;
        self.dropped_weight += w;
    }

    /// Add `other` bin for bin.
    ///
    /// A side that never saw a sample adopts the other's limits; otherwise
    /// shapes and limits must agree exactly.
    pub fn merge(&mut self, other: &Histogram2D) -> Result<(), HistogramError> {
        if self.spec.name != other.spec.name {
            return Err(HistogramError::Mismatch(format!(
                "'{}' vs '{}'",
                self.spec.name, other.spec.name
            )));
        }
        if other.is_blank() && other.needs_limits() {
            return Ok(());
        }
        if self.is_blank() && self.needs_limits() {
            *self = other.clone();
            return Ok(());
        }
        if self.counts.dim() != other.counts.dim() || self.c_total.len() != other.c_total.len() {
            return Err(HistogramError::Mismatch(format!("'{}': bin counts differ", self.spec.name)));
        }
        if self.x_limits != other.x_limits || self.y_limits != other.y_limits || self.c_limits != other.c_limits {
            return Err(HistogramError::Mismatch(format!("'{}': limits differ", self.spec.name)));
        }
        Zip::from(&mut self.counts).and(&other.counts).for_each(|a, &b| *a += b);
        Zip::from(&mut self.c_sum).and(&other.c_sum).for_each(|a, &b| *a += b);
        self.x_total += &other.x_total;
        self.y_total += &other.y_total;
        self.c_total += &other.c_total;
        self.entries += other.entries;
        self.dropped += other.dropped;
        self.dropped_weight += other.dropped_weight;
        Ok(())
    }

    /// Normalised, serialisable view of the accumulated grid.
    pub fn finalize(&self, rays_shone: u64) -> HistogramSnapshot {
        let ax = axis_or_unit(self.x_limits, self.spec.x.bins);
        let ay = axis_or_unit(self.y_limits, self.spec.y.bins);
        let factor = match self.spec.normalization {
            Normalization::None => 1.0,
            Normalization::PerRay if rays_shone > 0 => 1.0 / rays_shone as f64,
            Normalization::PerRay => 1.0,
            Normalization::Max => {
                let peak = self.counts.fold(0.0_f64, |m, &v| m.max(v));
                if peak > 0.0 {
                    1.0 / peak
                } else {
                    1.0
                }
            }
        };

        let (nx, ny) = self.counts.dim();
        let values = (0..ny)
            .map(|iy| (0..nx).map(|ix| self.counts[[ix, iy]] * factor).collect())
            .collect();
        let c_mean = self.spec.c.as_ref().map(|_| {
            (0..ny)
                .map(|iy| {
                    (0..nx)
                        .map(|ix| {
                            let w = self.counts[[ix, iy]];
                            if w > 0.0 {
                                self.c_sum[[ix, iy]] / w
                            } else {
                                f64::NAN
                            }
                        })
                        .collect()
                })
                .collect()
        });

        HistogramSnapshot {
            name: self.spec.name.clone(),
            beam: self.spec.beam.clone(),
            x_label: self.spec.x.quantity.label().to_string(),
            y_label: self.spec.y.quantity.label().to_string(),
            c_label: self.spec.c.as_ref().map(|c| c.quantity.label().to_string()),
            x_edges: ax.edges(),
            y_edges: ay.edges(),
            c_edges: match (&self.spec.c, self.c_limits) {
                (Some(c), limits) => Some(axis_or_unit(limits, c.bins).edges()),
                (None, _) => None,
            },
            values,
            c_mean,
            x_total: self.x_total.iter().map(|v| v * factor).collect(),
            y_total: self.y_total.iter().map(|v| v * factor).collect(),
            c_total: self.c_total.iter().map(|v| v * factor).collect(),
            entries: self.entries,
            dropped: self.dropped,
            dropped_weight: self.dropped_weight,
            rays_shone,
            normalization: self.spec.normalization,
            ppb: [self.spec.x.ppb, self.spec.y.ppb],
        }
    }
}

fn axis_or_unit(limits: Option<[f64; 2]>, bins: usize) -> Axis {
    let [lo, hi] = limits.unwrap_or([0.0, 1.0]);
    Axis { lo, hi, bins }
}

/// Finalised histogram. `values` and `c_mean` are indexed `[iy][ix]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub name: String,
    pub beam: String,
    pub x_label: String,
    pub y_label: String,
    pub c_label: Option<String>,
    pub x_edges: Vec<f64>,
    pub y_edges: Vec<f64>,
    pub c_edges: Option<Vec<f64>>,
    pub values: Vec<Vec<f64>>,
    /// Mean category value per bin (NaN where empty).
    pub c_mean: Option<Vec<Vec<f64>>>,
    pub x_total: Vec<f64>,
    pub y_total: Vec<f64>,
    pub c_total: Vec<f64>,
    pub entries: u64,
    pub dropped: u64,
    pub dropped_weight: f64,
    pub rays_shone: u64,
    pub normalization: Normalization,
    pub ppb: [usize; 2],
}

impl HistogramSnapshot {
    /// Values with every bin repeated `ppb` times along each axis.
    pub fn upsampled(&self) -> Vec<Vec<f64>> {
        let [px, py] = self.ppb;
        self.values
            .iter()
            .flat_map(|row| {
                let wide: Vec<f64> = row.iter().flat_map(|&v| std::iter::repeat(v).take(px)).collect();
                std::iter::repeat(wide).take(py)
            })
            .collect()
    }

    /// Sum over all bins.
    pub fn total(&self) -> f64 {
        self.values.iter().flatten().sum()
    }
}

/// The named histograms of one run plus per-beam status counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TallySet {
    pub histograms: Vec<Histogram2D>,
    /// Status counts of every element exit beam, keyed by element name.
    pub status: BTreeMap<String, StatusCounts>,
    pub rays_shone: u64,
    /// In-flight rays at the end of the beamline.
    pub accepted: u64,
    pub rounds: u64,
}

impl TallySet {
    pub fn new(plots: &[PlotSpec]) -> Result<Self, HistogramError> {
        let histograms = plots
            .iter()
            .cloned()
            .map(Histogram2D::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { histograms, ..Default::default() })
    }

    pub fn get(&self, name: &str) -> Option<&Histogram2D> {
        self.histograms.iter().find(|h| h.name() == name)
    }

    pub fn needs_limits(&self) -> bool {
        self.histograms.iter().any(Histogram2D::needs_limits)
    }

    /// Empty set sharing this set's histogram layout and resolved limits.
    pub fn empty_like(&self) -> Self {
        Self {
            histograms: self.histograms.iter().map(Histogram2D::empty_like).collect(),
            ..Default::default()
        }
    }

    /// Whether any histogram of `other` was binned on a different grid.
    pub fn grid_conflicts(&self, other: &TallySet) -> bool {
        self.histograms.iter().zip(&other.histograms).any(|(a, b)| a.grid_conflicts(b))
    }

    pub fn merge(&mut self, other: &TallySet) -> Result<(), HistogramError> {
        if self.histograms.len() != other.histograms.len() {
            return Err(HistogramError::Mismatch(format!(
                "{} vs {} histograms",
                self.histograms.len(),
                other.histograms.len()
            )));
        }
        for (a, b) in self.histograms.iter_mut().zip(&other.histograms) {
            a.merge(b)?;
        }
        for (name, counts) in &other.status {
            self.status.entry(name.clone()).or_default().merge(counts);
        }
        self.rays_shone += other.rays_shone;
        self.accepted += other.accepted;
        self.rounds += other.rounds;
        Ok(())
    }

    pub fn snapshots(&self) -> Vec<HistogramSnapshot> {
        self.histograms.iter().map(|h| h.finalize(self.rays_shone)).collect()
    }
}
