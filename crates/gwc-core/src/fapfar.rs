//! Background accumulation and false-alarm mapping.
//!
//! [`RankingStatPdf`] is a 1-D histogram of ln L values with two
//! channels: the noise channel, filled from background (time-slide and
//! noncoincident) candidates, and the zero-lag channel, filled from the
//! candidates actually reported. The zero-lag channel is never part of
//! the background model; it is the observed count `M` that calibrates
//! the false-alarm probability, and it sets the threshold for the
//! extinction correction.
//!
//! Clustering eats background at low ln L (a quiet candidate near a loud
//! one is discarded before it can be counted), so the raw noise channel
//! underestimates the high-significance tail's normalization. The
//! extinction pass refits the tail with an exponential above the
//! zero-lag population's bulk and substitutes the fit, which restores
//! the tail the clustering removed.
//!
//! [`FapFar`] freezes a finished histogram plus the background livetime
//! into the candidate-facing map:
//!
//! ```text
//! FAP(ln L) = 1 − exp(−M · C(ln L))        C = noise survival function
//! FAR(ln L) = M · C(ln L) / livetime
//! ```

use gwc_common::{Error, Result};
use gwc_math::ExpTail;
use serde::{Deserialize, Serialize};
use tracing::warn;

const LN_LR_LO: f64 = -30.0;
const LN_LR_HI: f64 = 120.0;
const LN_LR_BINS: usize = 1500;

/// Fraction of the zero-lag population below the extinction-fit
/// threshold.
const EXTINCTION_QUANTILE: f64 = 0.90;

/// Two-channel ln L histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingStatPdf {
    noise: Vec<f64>,
    zerolag: Vec<f64>,
}

impl Default for RankingStatPdf {
    fn default() -> Self {
        RankingStatPdf::new()
    }
}

impl RankingStatPdf {
    pub fn new() -> Self {
        RankingStatPdf {
            noise: vec![0.0; LN_LR_BINS],
            zerolag: vec![0.0; LN_LR_BINS],
        }
    }

    fn index(ln_lr: f64) -> usize {
        if ln_lr == f64::INFINITY {
            return LN_LR_BINS - 1;
        }
        if ln_lr == f64::NEG_INFINITY || ln_lr.is_nan() {
            return 0;
        }
        let frac = (ln_lr - LN_LR_LO) / (LN_LR_HI - LN_LR_LO);
        ((frac * LN_LR_BINS as f64) as isize).clamp(0, LN_LR_BINS as isize - 1) as usize
    }

    fn centre(i: usize) -> f64 {
        LN_LR_LO + (i as f64 + 0.5) * (LN_LR_HI - LN_LR_LO) / LN_LR_BINS as f64
    }

    /// Record a background candidate's ln L with the given weight.
    pub fn count_noise(&mut self, ln_lr: f64, weight: f64) {
        self.noise[Self::index(ln_lr)] += weight;
    }

    /// Record a reported (zero-lag) candidate's ln L.
    pub fn count_zero_lag(&mut self, ln_lr: f64) {
        self.zerolag[Self::index(ln_lr)] += 1.0;
    }

    pub fn noise_total(&self) -> f64 {
        self.noise.iter().sum()
    }

    pub fn zero_lag_total(&self) -> f64 {
        self.zerolag.iter().sum()
    }

    pub fn merge(&mut self, other: &RankingStatPdf) {
        for (a, b) in self.noise.iter_mut().zip(&other.noise) {
            *a += b;
        }
        for (a, b) in self.zerolag.iter_mut().zip(&other.zerolag) {
            *a += b;
        }
    }

    /// ln L below which `EXTINCTION_QUANTILE` of the zero-lag
    /// population lies.
    fn extinction_threshold(&self) -> Option<usize> {
        let total = self.zero_lag_total();
        if total <= 0.0 {
            return None;
        }
        let mut seen = 0.0;
        for (i, c) in self.zerolag.iter().enumerate() {
            seen += c;
            if seen >= EXTINCTION_QUANTILE * total {
                return Some(i);
            }
        }
        Some(LN_LR_BINS - 1)
    }

    /// Refit the noise tail above the zero-lag bulk with an exponential
    /// and substitute the fit. Returns the corrected histogram; the
    /// original is untouched. Falls back to the raw histogram, with a
    /// warning, when the tail cannot be fit.
    pub fn with_extinction(&self) -> RankingStatPdf {
        let mut out = self.clone();
        let Some(threshold) = self.extinction_threshold() else {
            return out;
        };
        let tail: Vec<(f64, f64)> = (threshold..LN_LR_BINS)
            .map(|i| (Self::centre(i), self.noise[i]))
            .collect();
        // threshold at the bin's lower edge so the bin itself is fit
        let u0 = LN_LR_LO + threshold as f64 * (LN_LR_HI - LN_LR_LO) / LN_LR_BINS as f64;
        match ExpTail::fit(&tail, u0) {
            Ok(fit) => {
                for i in threshold..LN_LR_BINS {
                    out.noise[i] = fit.count_at(Self::centre(i));
                }
            }
            Err(error) => {
                warn!(%error, threshold = Self::centre(threshold), "extinction fit failed, keeping raw tail");
            }
        }
        out
    }
}

/// Frozen map from ln L to false-alarm probability and rate.
#[derive(Debug, Clone)]
pub struct FapFar {
    /// Noise survival probability per bin (suffix sums, normalized).
    survival: Vec<f64>,
    /// Observed zero-lag candidate count.
    m: f64,
    livetime: f64,
}

impl FapFar {
    /// Build from a (typically extinction-corrected) histogram and the
    /// background livetime in seconds. The zero-lag channel must be
    /// populated: with no observed candidates there is nothing to
    /// calibrate against.
    pub fn new(pdf: &RankingStatPdf, livetime: f64) -> Result<Self> {
        let m = pdf.zero_lag_total();
        if m <= 0.0 {
            return Err(Error::Config(
                "false-alarm map needs at least one zero-lag candidate".into(),
            ));
        }
        if livetime <= 0.0 {
            return Err(Error::Config("background livetime must be positive".into()));
        }
        let total = pdf.noise_total();
        let mut survival = vec![0.0; LN_LR_BINS];
        let mut acc = 0.0;
        for i in (0..LN_LR_BINS).rev() {
            acc += pdf.noise[i];
            survival[i] = if total > 0.0 { acc / total } else { 0.0 };
        }
        Ok(FapFar {
            survival,
            m,
            livetime,
        })
    }

    fn ccdf(&self, ln_lr: f64) -> f64 {
        self.survival[RankingStatPdf::index(ln_lr)]
    }

    /// Probability that noise alone produces at least one candidate this
    /// significant among the `M` observed.
    pub fn fap(&self, ln_lr: f64) -> f64 {
        1.0 - (-self.m * self.ccdf(ln_lr)).exp()
    }

    /// Expected rate, per second, of noise candidates at least this
    /// significant.
    pub fn far(&self, ln_lr: f64) -> f64 {
        self.m * self.ccdf(ln_lr) / self.livetime
    }
}
