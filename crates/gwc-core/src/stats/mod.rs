//! Probability-density models for the ranking statistic.
//!
//! The core object is a per-detector 2-D binned ln-probability surface
//! over (SNR, χ²/SNR²). Surfaces are trained by incrementing raw counts
//! and then, exactly once, `finish()`ed: a Gaussian density-estimation
//! kernel is applied (Silverman-scaled with the effective sample count),
//! everything below the minimum-SNR cutoff is zeroed, and the surface is
//! normalized to a proper density. The transform is one-way: a finished
//! surface refuses further counts and refuses serialization, because
//! smoothed data must never be mistaken for raw counts on reload.

pub mod coinc_rates;
pub mod noise;
pub mod ranking;
pub mod signal;

pub use coinc_rates::CoincRates;
pub use noise::LnNoiseDensity;
pub use ranking::{CoincScorer, RankingStat, RankingStatVariant};
pub use signal::LnSignalDensity;

use gwc_common::{Coincidence, Error, NetworkConfig, Result, Trigger};
use gwc_math::{filter_2d, gaussian_kernel, AtanLogBins, Bins2d};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// SNR below which the density surfaces carry no support.
pub const SNR_MIN: f64 = 3.5;

/// The (SNR, χ²/SNR²) binning shared by all density surfaces.
pub fn snr_chi_binning() -> Bins2d {
    Bins2d::new(
        AtanLogBins::new(2.6, 26.0, 300),
        AtanLogBins::new(0.001, 0.2, 280),
    )
}

/// Parameters that define which analysis a statistics object belongs to.
/// Two objects may only be merged when all of these agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityParams {
    pub template_ids: BTreeSet<u64>,
    pub network: NetworkConfig,
}

impl DensityParams {
    pub fn new(template_ids: BTreeSet<u64>, network: NetworkConfig) -> Result<Self> {
        if template_ids.is_empty() {
            return Err(Error::Config("template_ids cannot be empty".into()));
        }
        network.validate()?;
        Ok(DensityParams {
            template_ids,
            network,
        })
    }

    pub fn n_templates(&self) -> usize {
        self.template_ids.len()
    }

    pub fn min_instruments(&self) -> usize {
        self.network.min_instruments
    }

    /// Check merge compatibility; mismatch is a hard error, never a
    /// best-effort merge.
    pub fn assert_compatible(&self, other: &DensityParams) -> Result<()> {
        if self.template_ids != other.template_ids {
            return Err(Error::Incompatible("template ID sets differ".into()));
        }
        if self.network.instruments != other.network.instruments {
            return Err(Error::Incompatible("instrument sets differ".into()));
        }
        if self.network.min_instruments != other.network.min_instruments {
            return Err(Error::Incompatible(
                "minimum instrument counts differ".into(),
            ));
        }
        if self.network.delta_t != other.network.delta_t {
            return Err(Error::Incompatible(
                "coincidence windows (delta_t) differ".into(),
            ));
        }
        Ok(())
    }
}

/// A binned (SNR, χ²/SNR²) surface with a raw/finished state flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnrChiPdf {
    bins: Bins2d,
    counts: Vec<f64>,
    total: f64,
    finished: bool,
}

impl Default for SnrChiPdf {
    fn default() -> Self {
        SnrChiPdf::new()
    }
}

impl SnrChiPdf {
    pub fn new() -> Self {
        let bins = snr_chi_binning();
        let n = bins.len();
        SnrChiPdf {
            bins,
            counts: vec![0.0; n],
            total: 0.0,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Rebuild from persisted raw counts.
    pub fn from_counts(counts: Vec<f64>) -> Result<Self> {
        let bins = snr_chi_binning();
        if counts.len() != bins.len() {
            return Err(Error::Incompatible(format!(
                "bin count mismatch: {} != {}",
                counts.len(),
                bins.len()
            )));
        }
        let total = counts.iter().sum();
        Ok(SnrChiPdf {
            bins,
            counts,
            total,
            finished: false,
        })
    }

    /// Add one observed trigger to the raw counts.
    pub fn increment(&mut self, snr: f64, chisq_over_snr2: f64) -> Result<()> {
        self.add_weight(snr, chisq_over_snr2, 1.0)
    }

    /// Add fractional weight; used by the analytic seed models.
    pub fn add_weight(&mut self, snr: f64, chisq_over_snr2: f64, weight: f64) -> Result<()> {
        if self.finished {
            return Err(Error::Finished("increment"));
        }
        let k = self.bins.flat_index(snr, chisq_over_snr2);
        self.counts[k] += weight;
        self.total += weight;
        Ok(())
    }

    /// Addition of raw counts from an independently trained surface.
    pub fn merge(&mut self, other: &SnrChiPdf) -> Result<()> {
        if self.finished || other.finished {
            return Err(Error::Finished("merge"));
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.total += other.total;
        Ok(())
    }

    /// Apply density estimation and normalize. One-way: a second call,
    /// or any later mutation, is an error.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Finished("finish"));
        }

        // density-estimation kernel: be conservative and assume only
        // 1 in 10 samples are independent, with a floor on the assumed
        // sample count so sparse surfaces get wide kernels
        let numsamples = (self.total / 10.0 + 1.0).max(1e6);
        let shrink = numsamples.powf(-1.0 / 6.0); // Silverman, 2-D

        let snr_bins = &self.bins.x;
        let chi_bins = &self.bins.y;
        let snr_per_bin_at_8 = snr_bins.width(snr_bins.index(8.0));
        let chi_per_bin_at_002 = chi_bins.width(chi_bins.index(0.02));
        let snr_kernel_bins = (8.0 / snr_per_bin_at_8 * shrink).max(2.5);
        let chi_kernel_bins = (0.08 / chi_per_bin_at_002 * shrink).max(2.5);

        let kx = gaussian_kernel(snr_kernel_bins, 10.0);
        let ky = gaussian_kernel(chi_kernel_bins, 10.0);
        let shape = self.bins.shape();
        filter_2d(&mut self.counts, shape, &kx, &ky);

        // zero everything below the SNR cutoff, keeping the at-threshold
        // bin
        let cutoff_row = self.bins.x.index(SNR_MIN);
        let ny = self.bins.y.count;
        for row in self.counts.chunks_mut(ny).take(cutoff_row) {
            row.fill(0.0);
        }

        self.total = self.counts.iter().sum();
        self.finished = true;
        Ok(())
    }

    /// ln of the probability density at (snr, χ²/SNR²).
    ///
    /// `NEG_INFINITY` for empty bins, empty surfaces, and the
    /// semi-infinite boundary bins (zero density by construction).
    pub fn ln_density(&self, snr: f64, chisq_over_snr2: f64) -> f64 {
        if self.total <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let i = self.bins.x.index(snr);
        let j = self.bins.y.index(chisq_over_snr2);
        let count = self.counts[i * self.bins.y.count + j];
        let area = self.bins.area(i, j);
        if count <= 0.0 || !area.is_finite() {
            return f64::NEG_INFINITY;
        }
        (count / (self.total * area)).ln()
    }
}

/// A set of per-instrument surfaces plus the analysis parameters; the
/// common kernel of the noise density and the zero-lag density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensitySet {
    pub params: DensityParams,
    densities: std::collections::HashMap<String, SnrChiPdf>,
}

impl DensitySet {
    pub fn new(params: DensityParams) -> Self {
        let densities = params
            .network
            .instruments
            .iter()
            .map(|ifo| (ifo.clone(), SnrChiPdf::new()))
            .collect();
        DensitySet { params, densities }
    }

    pub fn density(&self, ifo: &str) -> Option<&SnrChiPdf> {
        self.densities.get(ifo)
    }

    pub fn density_mut(&mut self, ifo: &str) -> Option<&mut SnrChiPdf> {
        self.densities.get_mut(ifo)
    }

    pub fn densities(&self) -> impl Iterator<Item = (&String, &SnrChiPdf)> {
        self.densities.iter()
    }

    /// Add one trigger's (SNR, χ²/SNR²) to its instrument's surface.
    /// Triggers from templates outside the configured set must not be
    /// collected.
    pub fn increment(&mut self, trigger: &Trigger) -> Result<()> {
        if !self.params.template_ids.contains(&trigger.template_id) {
            return Err(Error::WrongTemplate {
                template_id: trigger.template_id,
            });
        }
        let pdf = self
            .densities
            .get_mut(&trigger.ifo)
            .ok_or_else(|| Error::Incompatible(format!("unknown instrument {}", trigger.ifo)))?;
        pdf.increment(trigger.snr, trigger.chisq_over_snr2())
    }

    /// Add every member of a coincidence (zero-lag bookkeeping).
    pub fn increment_coinc(&mut self, coinc: &Coincidence) -> Result<()> {
        for member in &coinc.members {
            self.increment(member)?;
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &DensitySet) -> Result<()> {
        self.params.assert_compatible(&other.params)?;
        for (ifo, pdf) in &mut self.densities {
            let theirs = other
                .densities
                .get(ifo)
                .ok_or_else(|| Error::Incompatible(format!("missing instrument {ifo}")))?;
            pdf.merge(theirs)?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        for pdf in self.densities.values_mut() {
            pdf.finish()?;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.densities.values().any(SnrChiPdf::is_finished)
    }
}
