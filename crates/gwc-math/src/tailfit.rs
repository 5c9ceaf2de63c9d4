//! Exponential tail fitting.
//!
//! The empirical background histogram is statistically noisy in its upper
//! tail: the rarest ranking-statistic values are, by construction, barely
//! sampled. Before the histogram can drive false-alarm-probability
//! lookups its tail is replaced with a fitted parametric model. For
//! ln-likelihood-ratio backgrounds an exponential decay is the right
//! family (the peaks-over-threshold limit with vanishing shape
//! parameter):
//!
//! ```text
//! count(x) ≈ A · exp(-(x - u0) / s)    for x > u0
//! ```
//!
//! The fit is weighted least squares on ln counts, with weights equal to
//! the counts (Poisson: Var[ln n] ≈ 1/n).

use serde::Serialize;
use thiserror::Error;

/// Errors from tail fitting.
#[derive(Debug, Error)]
pub enum TailFitError {
    #[error("too few populated bins above threshold: {0} (need >= 2)")]
    TooFewBins(usize),

    #[error("tail is not decaying (fitted rate {0} <= 0)")]
    NotDecaying(f64),
}

/// A fitted exponential tail model above a threshold `u0`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExpTail {
    /// Threshold abscissa the fit applies above.
    pub u0: f64,
    /// Amplitude at the threshold.
    pub amplitude: f64,
    /// Decay scale `s` (> 0).
    pub scale: f64,
}

impl ExpTail {
    /// Fit an exponential decay to `(x, count)` pairs with `x > u0` and
    /// `count > 0`.
    pub fn fit(samples: &[(f64, f64)], u0: f64) -> Result<ExpTail, TailFitError> {
        let pts: Vec<(f64, f64)> = samples
            .iter()
            .filter(|(x, n)| *x > u0 && *n > 0.0)
            .map(|(x, n)| (*x - u0, *n))
            .collect();
        if pts.len() < 2 {
            return Err(TailFitError::TooFewBins(pts.len()));
        }

        // weighted least squares of ln n = ln A - x/s, weights = n
        let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (x, n) in &pts {
            let (w, y) = (*n, n.ln());
            sw += w;
            swx += w * x;
            swy += w * y;
            swxx += w * x * x;
            swxy += w * x * y;
        }
        let denom = sw * swxx - swx * swx;
        if denom == 0.0 {
            return Err(TailFitError::TooFewBins(pts.len()));
        }
        let slope = (sw * swxy - swx * swy) / denom;
        let intercept = (swy - slope * swx) / sw;
        if slope >= 0.0 {
            return Err(TailFitError::NotDecaying(-slope));
        }
        Ok(ExpTail {
            u0,
            amplitude: intercept.exp(),
            scale: -1.0 / slope,
        })
    }

    /// Model count at abscissa `x` (valid for `x >= u0`).
    pub fn count_at(&self, x: f64) -> f64 {
        self.amplitude * (-(x - self.u0) / self.scale).exp()
    }
}
