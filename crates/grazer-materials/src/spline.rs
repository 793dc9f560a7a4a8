//! Cubic spline interpolation for optical-constant tables.
//!
//! Tabulated $\delta(E)$ and $\beta(E)$ follow near power laws between
//! absorption edges, so tables are splined in log-log space: a natural cubic
//! spline through $(\ln E_i, \ln \delta_i)$ reproduces a pure power law
//! exactly and stays smooth elsewhere.

use crate::provider::MaterialError;

/// A natural cubic spline interpolator for real-valued data.
///
/// Given $n$ data points $(x_i, y_i)$, constructs piecewise cubic polynomials
/// with continuous first and second derivatives and zero curvature at both
/// ends.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivatives at each knot.
    y2s: Vec<f64>,
}

impl CubicSpline {
    /// Construct a natural cubic spline from data points.
    ///
    /// # Arguments
    /// * `xs` - Strictly increasing x values.
    /// * `ys` - Corresponding y values (same length as `xs`).
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, MaterialError> {
        if xs.len() != ys.len() {
            return Err(MaterialError::DataError(format!(
                "spline needs equal-length columns, got {} and {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(MaterialError::DataError("spline needs at least 2 points".into()));
        }
        if let Some(i) = (1..xs.len()).find(|&i| !(xs[i] > xs[i - 1])) {
            return Err(MaterialError::DataError(format!(
                "spline knots must be strictly increasing (index {})",
                i
            )));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(MaterialError::DataError("spline data must be finite".into()));
        }

        let n = xs.len();
        let mut y2s = vec![0.0; n];
        let mut u = vec![0.0; n - 1];

        // Tridiagonal forward sweep
        for i in 1..n - 1 {
            let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
            let p = sig * y2s[i - 1] + 2.0;
            y2s[i] = (sig - 1.0) / p;
            u[i] = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])
                - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
            u[i] = (6.0 * u[i] / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
        }

        for k in (0..n - 2).rev() {
            y2s[k + 1] = y2s[k + 1] * y2s[k + 2] + u[k + 1];
        }

        Ok(Self { xs, ys, y2s })
    }

    /// Log-log spline: knots at $\ln x$, values $\ln y$. All inputs must be positive.
    pub fn log_log(xs: &[f64], ys: &[f64]) -> Result<Self, MaterialError> {
        if xs.iter().chain(ys.iter()).any(|&v| !(v > 0.0)) {
            return Err(MaterialError::DataError(
                "log-log spline needs strictly positive data".into(),
            ));
        }
        Self::new(
            xs.iter().map(|x| x.ln()).collect(),
            ys.iter().map(|y| y.ln()).collect(),
        )
    }

    /// Evaluate the spline at `x`.
    ///
    /// Extrapolation beyond the data range uses the boundary polynomial.
    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let mut lo = 0;
        let mut hi = n - 1;
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.xs[mid] > x {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        let h = self.xs[hi] - self.xs[lo];
        let a = (self.xs[hi] - x) / h;
        let b = (x - self.xs[lo]) / h;

        a * self.ys[lo]
            + b * self.ys[hi]
            + ((a * a * a - a) * self.y2s[lo] + (b * b * b - b) * self.y2s[hi]) * h * h / 6.0
    }

    /// Evaluate a spline built with [`CubicSpline::log_log`] at linear `x`.
    pub fn evaluate_log_log(&self, x: f64) -> f64 {
        self.evaluate(x.ln()).exp()
    }
}
