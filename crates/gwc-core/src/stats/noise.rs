//! Noise (background) probability density.
//!
//! The denominator of the ranking statistic: the probability density of
//! observing a given candidate under the hypothesis that every member
//! trigger is detector noise. Combines three ingredients:
//!
//! * per-instrument (SNR, χ²/SNR²) surfaces trained on noncoincident
//!   triggers,
//! * the live trigger-rate history, which sets the Poisson rates that
//!   feed the coincidence combinatorics,
//! * the precomputed coincidence-window volumes.
//!
//! Rates are shared behind a lock so a spliced scoring statistic can see
//! the collector's history grow without copying it.

use crate::rates::TriggerRates;
use crate::stats::{CoincRates, DensityParams, DensitySet};
use gwc_common::{Coincidence, Result, Segment, Trigger};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Width of the window, either side of a candidate, over which the
/// trigger rate is estimated.
pub const RATE_ESTIMATION_WINDOW: f64 = 3600.0;

pub struct LnNoiseDensity {
    base: DensitySet,
    rates: Arc<RwLock<TriggerRates>>,
    coinc_rates: CoincRates,
    /// Substitute a unit rate for every instrument instead of consulting
    /// the history. Used by statistics that carry no observed data.
    unit_rates: bool,
}

impl LnNoiseDensity {
    pub fn new(params: DensityParams) -> Self {
        let rates = TriggerRates::new(&params.network.instruments);
        let coinc_rates = CoincRates::new(&params.network);
        LnNoiseDensity {
            base: DensitySet::new(params),
            rates: Arc::new(RwLock::new(rates)),
            coinc_rates,
            unit_rates: false,
        }
    }

    /// A density with no observed rates: every instrument is treated as
    /// live with unit trigger rate.
    pub fn dataless(params: DensityParams) -> Self {
        let mut density = LnNoiseDensity::new(params);
        density.unit_rates = true;
        density
    }

    /// A density that evaluates against `donor`'s live rate history
    /// without owning it.
    pub fn spliced(params: DensityParams, donor: Arc<RwLock<TriggerRates>>) -> Self {
        let coinc_rates = CoincRates::new(&params.network);
        LnNoiseDensity {
            base: DensitySet::new(params),
            rates: donor,
            coinc_rates,
            unit_rates: false,
        }
    }

    pub fn params(&self) -> &DensityParams {
        &self.base.params
    }

    pub fn surfaces(&self) -> &DensitySet {
        &self.base
    }

    pub fn surfaces_mut(&mut self) -> &mut DensitySet {
        &mut self.base
    }

    /// Handle to the shared rate history, for splicing.
    pub fn rates_handle(&self) -> Arc<RwLock<TriggerRates>> {
        Arc::clone(&self.rates)
    }

    /// Re-point this density at another statistic's live rate history,
    /// keeping the trained surfaces.
    pub fn splice_rates(&mut self, donor: Arc<RwLock<TriggerRates>>) {
        self.rates = donor;
        self.unit_rates = false;
    }

    pub fn rates_snapshot(&self) -> TriggerRates {
        self.rates.read().expect("rates lock poisoned").clone()
    }

    /// Record a stretch of analyzed data and the number of triggers the
    /// front end produced in it.
    pub fn add_ratebin(&mut self, ifo: &str, segment: Segment, count: f64) {
        self.rates
            .write()
            .expect("rates lock poisoned")
            .add_ratebin(ifo, segment, count);
    }

    /// Train the instrument surface with one noncoincident trigger.
    pub fn increment(&mut self, trigger: &Trigger) -> Result<()> {
        self.base.increment(trigger)
    }

    pub fn merge(&mut self, other: &LnNoiseDensity) -> Result<()> {
        self.base.merge(&other.base)?;
        let theirs = other.rates_snapshot();
        self.rates
            .write()
            .expect("rates lock poisoned")
            .merge(&theirs);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.base.finish()
    }

    pub fn is_finished(&self) -> bool {
        self.base.is_finished()
    }

    /// Seed the surfaces with an analytic noise model: density falling
    /// as SNR⁻⁶, flat in χ²/SNR², carrying `n` counts per instrument.
    /// Applied before any observed triggers so empty bins are never
    /// infinitely surprising.
    pub fn add_noise_model(&mut self, n: f64) -> Result<()> {
        let bins = crate::stats::snr_chi_binning();
        let mut cells = Vec::new();
        let mut norm = 0.0;
        for i in 0..bins.x.count {
            let snr = bins.x.centre(i);
            let dsnr = bins.x.width(i);
            if !dsnr.is_finite() || snr < crate::stats::SNR_MIN {
                continue;
            }
            for j in 0..bins.y.count {
                let rcoss = bins.y.centre(j);
                let drcoss = bins.y.width(j);
                if !drcoss.is_finite() {
                    continue;
                }
                let w = dsnr * drcoss * snr.powi(-6);
                cells.push((snr, rcoss, w));
                norm += w;
            }
        }
        let ifos: Vec<String> = self.base.params.network.instruments.clone();
        for ifo in &ifos {
            if let Some(pdf) = self.base.density_mut(ifo) {
                for (snr, rcoss, w) in &cells {
                    pdf.add_weight(*snr, *rcoss, w / norm * n)?;
                }
            }
        }
        Ok(())
    }

    /// Rates for every instrument live around `time`, from the shared
    /// history (or unit rates for a dataless statistic).
    fn live_rates_at(&self, time: f64) -> HashMap<String, f64> {
        if self.unit_rates {
            return self
                .base
                .params
                .network
                .instruments
                .iter()
                .map(|ifo| (ifo.clone(), 1.0))
                .collect();
        }
        let window = Segment::new(
            time - RATE_ESTIMATION_WINDOW,
            time + RATE_ESTIMATION_WINDOW,
        );
        let rates = self.rates.read().expect("rates lock poisoned");
        self.base
            .params
            .network
            .instruments
            .iter()
            .filter_map(|ifo| {
                let list = rates.get(ifo)?;
                // only instruments actually taking data at the candidate
                // time participate in the combinatorics
                list.density_at(time)?;
                let rate = list.density_in(&window)?;
                Some((ifo.clone(), rate))
            })
            .collect()
    }

    /// ln P(candidate | noise). `NEG_INFINITY` when the candidate is
    /// impossible under the noise model: too few members, a member from
    /// an instrument with no observed rate, or a member landing in an
    /// empty region of a surface.
    pub fn evaluate(&self, coinc: &Coincidence) -> f64 {
        if coinc.members.len() < self.base.params.min_instruments() {
            return f64::NEG_INFINITY;
        }
        let time = coinc.earliest_end().as_secs_f64();
        let mut live = self.live_rates_at(time);
        for member in &coinc.members {
            match live.get(&member.ifo) {
                Some(rate) if *rate > 0.0 => {}
                _ => return f64::NEG_INFINITY,
            }
        }

        // the combinatorics run per template: members coincide only
        // within a template, so each instrument contributes its total
        // rate spread evenly over the bank
        let n_templates = self.base.params.n_templates() as f64;
        for rate in live.values_mut() {
            *rate /= n_templates;
        }

        let strict = self.coinc_rates.strict_rates(&live);
        let mask = match self
            .coinc_rates
            .mask_of(coinc.members.iter().map(|m| m.ifo.as_str()))
        {
            Some(mask) => mask,
            None => return f64::NEG_INFINITY,
        };
        let rate = match strict.get(&mask) {
            Some(rate) if *rate > 0.0 => *rate,
            _ => return f64::NEG_INFINITY,
        };
        // rate of noise candidates with exactly these instruments, over
        // the whole template bank
        let mut ln_p = (rate * self.base.params.n_templates() as f64).ln();

        for member in &coinc.members {
            let pdf = match self.base.density(&member.ifo) {
                Some(pdf) => pdf,
                None => return f64::NEG_INFINITY,
            };
            ln_p += pdf.ln_density(member.snr, member.chisq_over_snr2());
        }
        ln_p
    }
}

impl Clone for LnNoiseDensity {
    fn clone(&self) -> Self {
        LnNoiseDensity {
            base: self.base.clone(),
            rates: Arc::new(RwLock::new(self.rates_snapshot())),
            coinc_rates: self.coinc_rates.clone(),
            unit_rates: self.unit_rates,
        }
    }
}

impl std::fmt::Debug for LnNoiseDensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LnNoiseDensity")
            .field("params", &self.base.params)
            .field("unit_rates", &self.unit_rates)
            .finish_non_exhaustive()
    }
}
