//! Ray state and the structure-of-arrays [`RayBatch`].
//!
//! A batch holds one generation of rays. It is owned by exactly one pipeline
//! stage at a time and handed on by value. Per-ray failures are recorded in
//! the status column rather than raised as errors.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Per-ray status. Once a ray leaves `Alive` it never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RayStatus {
    /// Generated and still propagating.
    Alive,
    /// Passed through an element and left by its exit aperture.
    Escaped,
    /// Lost to the wall (stochastic reflectivity policy only).
    Absorbed,
    /// Outside an element's acceptance, or ran out of allowed bounces.
    OutOfRange,
    /// Numerical failure (non-normalisable direction, NaN, missing material data).
    Invalid,
}

impl RayStatus {
    pub const ALL: [RayStatus; 5] = [
        RayStatus::Alive,
        RayStatus::Escaped,
        RayStatus::Absorbed,
        RayStatus::OutOfRange,
        RayStatus::Invalid,
    ];

    /// Rays that still travel in free space.
    pub fn in_flight(self) -> bool {
        matches!(self, RayStatus::Alive | RayStatus::Escaped)
    }

    pub fn name(self) -> &'static str {
        match self {
            RayStatus::Alive => "alive",
            RayStatus::Escaped => "escaped",
            RayStatus::Absorbed => "absorbed",
            RayStatus::OutOfRange => "out_of_range",
            RayStatus::Invalid => "invalid",
        }
    }
}

/// Polarisation tag carried by each ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarization {
    #[default]
    Horizontal,
    Vertical,
    Unpolarized,
}

impl Polarization {
    /// Global field direction, if the state is linear.
    pub fn field_vector(self) -> Option<Vector3<f64>> {
        match self {
            Polarization::Horizontal => Some(Vector3::x()),
            Polarization::Vertical => Some(Vector3::z()),
            Polarization::Unpolarized => None,
        }
    }

    /// Fraction of the intensity that is s-polarised for a ray travelling
    /// along `direction` onto a surface with normal `normal`.
    ///
    /// `field` is the field vector in the same frame as the other two.
    pub fn s_fraction(field: Option<Vector3<f64>>, direction: &Vector3<f64>, normal: &Vector3<f64>) -> f64 {
        let Some(field) = field else {
            return 0.5;
        };
        let s_axis = direction.cross(normal);
        let s_len = s_axis.norm();
        let transverse = field - direction * field.dot(direction);
        let t_len = transverse.norm();
        if s_len < 1e-15 || t_len < 1e-15 {
            return 0.5;
        }
        let c = transverse.dot(&s_axis) / (s_len * t_len);
        (c * c).min(1.0)
    }
}

/// One ray, as read from or written to a [`RayBatch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub position: Vector3<f64>,
    /// Unit direction cosines.
    pub direction: Vector3<f64>,
    /// Photon energy (eV).
    pub energy: f64,
    pub polarization: Polarization,
    /// Accumulated reflection phase (rad).
    pub phase: f64,
    /// Statistical weight.
    pub intensity: f64,
    pub status: RayStatus,
    pub bounces: u32,
}

impl Ray {
    /// A fresh `Alive` ray with unit weight and no bounces.
    pub fn new(position: Vector3<f64>, direction: Vector3<f64>, energy: f64, polarization: Polarization) -> Self {
        Self {
            position,
            direction,
            energy,
            polarization,
            phase: 0.0,
            intensity: 1.0,
            status: RayStatus::Alive,
            bounces: 0,
        }
    }
}

/// Structure-of-arrays container for one generation of rays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RayBatch {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    energy: Vec<f64>,
    polarization: Vec<Polarization>,
    phase: Vec<f64>,
    intensity: Vec<f64>,
    status: Vec<RayStatus>,
    bounces: Vec<u32>,
}

impl RayBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            a: Vec::with_capacity(n),
            b: Vec::with_capacity(n),
            c: Vec::with_capacity(n),
            energy: Vec::with_capacity(n),
            polarization: Vec::with_capacity(n),
            phase: Vec::with_capacity(n),
            intensity: Vec::with_capacity(n),
            status: Vec::with_capacity(n),
            bounces: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn push(&mut self, ray: Ray) {
        self.x.push(ray.position.x);
        self.y.push(ray.position.y);
        self.z.push(ray.position.z);
        self.a.push(ray.direction.x);
        self.b.push(ray.direction.y);
        self.c.push(ray.direction.z);
        self.energy.push(ray.energy);
        self.polarization.push(ray.polarization);
        self.phase.push(ray.phase);
        self.intensity.push(ray.intensity);
        self.status.push(ray.status);
        self.bounces.push(ray.bounces);
    }

    /// Copy out ray `i`.
    pub fn get(&self, i: usize) -> Ray {
        Ray {
            position: self.position(i),
            direction: self.direction(i),
            energy: self.energy[i],
            polarization: self.polarization[i],
            phase: self.phase[i],
            intensity: self.intensity[i],
            status: self.status[i],
            bounces: self.bounces[i],
        }
    }

    /// Overwrite ray `i`. A request to put a finished ray back to `Alive` keeps
    /// its previous status; returns `false` in that case.
    pub fn update(&mut self, i: usize, ray: Ray) -> bool {
        self.x[i] = ray.position.x;
        self.y[i] = ray.position.y;
        self.z[i] = ray.position.z;
        self.a[i] = ray.direction.x;
        self.b[i] = ray.direction.y;
        self.c[i] = ray.direction.z;
        self.energy[i] = ray.energy;
        self.polarization[i] = ray.polarization;
        self.phase[i] = ray.phase;
        self.intensity[i] = ray.intensity;
        self.bounces[i] = ray.bounces;
        self.set_status(i, ray.status)
    }

    /// Set the status of ray `i`, refusing any transition back to `Alive`.
    pub fn set_status(&mut self, i: usize, status: RayStatus) -> bool {
        if status == RayStatus::Alive && self.status[i] != RayStatus::Alive {
            return false;
        }
        self.status[i] = status;
        true
    }

    pub fn position(&self, i: usize) -> Vector3<f64> {
        Vector3::new(self.x[i], self.y[i], self.z[i])
    }

    pub fn direction(&self, i: usize) -> Vector3<f64> {
        Vector3::new(self.a[i], self.b[i], self.c[i])
    }

    pub fn status(&self, i: usize) -> RayStatus {
        self.status[i]
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }
    pub fn y(&self) -> &[f64] {
        &self.y
    }
    pub fn z(&self) -> &[f64] {
        &self.z
    }
    pub fn a(&self) -> &[f64] {
        &self.a
    }
    pub fn b(&self) -> &[f64] {
        &self.b
    }
    pub fn c(&self) -> &[f64] {
        &self.c
    }
    pub fn energies(&self) -> &[f64] {
        &self.energy
    }
    pub fn polarizations(&self) -> &[Polarization] {
        &self.polarization
    }
    pub fn phases(&self) -> &[f64] {
        &self.phase
    }
    pub fn intensities(&self) -> &[f64] {
        &self.intensity
    }
    pub fn statuses(&self) -> &[RayStatus] {
        &self.status
    }
    pub fn bounces(&self) -> &[u32] {
        &self.bounces
    }

    pub fn iter(&self) -> impl Iterator<Item = Ray> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Append the rays of `other` whose status passes `keep`.
    pub fn extend_matching(&mut self, other: &RayBatch, keep: impl Fn(RayStatus) -> bool) {
        for ray in other.iter().filter(|r| keep(r.status)) {
            self.push(ray);
        }
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for &s in &self.status {
            counts.add(s, 1);
        }
        counts
    }
}

impl FromIterator<Ray> for RayBatch {
    fn from_iter<I: IntoIterator<Item = Ray>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut batch = RayBatch::with_capacity(iter.size_hint().0);
        for ray in iter {
            batch.push(ray);
        }
        batch
    }
}

/// Number of rays per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub counts: BTreeMap<RayStatus, u64>,
}

impl StatusCounts {
    pub fn add(&mut self, status: RayStatus, n: u64) {
        *self.counts.entry(status).or_insert(0) += n;
    }

    pub fn get(&self, status: RayStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn merge(&mut self, other: &StatusCounts) {
        for (&status, &n) in &other.counts {
            self.add(status, n);
        }
    }
}
