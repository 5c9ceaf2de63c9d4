//! Signal probability density.
//!
//! The numerator of the ranking statistic: the probability density of a
//! candidate under the hypothesis that it is a real signal seen by the
//! participating detectors. Unlike the noise model, the signal model
//! shares one (SNR, χ²/SNR²) surface across instruments (the waveform
//! does not care which detector saw it) and is driven by the detectors'
//! horizon distances, which set both the sensitive volume and which
//! instrument combinations are plausible.

use crate::horizon::HorizonHistories;
use crate::stats::{DensityParams, SnrChiPdf};
use gwc_common::{Coincidence, Result, Segment, Trigger};
use gwc_math::log_sum_exp;
use std::collections::HashMap;
use std::f64::consts::{PI, TAU};
use std::sync::{Arc, RwLock};

/// Lookback, in seconds, over which the horizon history is averaged when
/// evaluating a candidate.
pub const HORIZON_LOOKBACK: f64 = 10.0;

/// Horizon distance, in Mpc, at which the sensitive-volume factor is
/// unity.
pub const REFERENCE_HORIZON: f64 = 150.0;

/// Width of the log-normal model for the ratio of observed member SNRs
/// to the ratio their horizons predict.
const SNR_RATIO_SIGMA: f64 = 0.7;

pub struct LnSignalDensity {
    params: DensityParams,
    /// One surface shared by every instrument.
    density: SnrChiPdf,
    horizons: Arc<RwLock<HorizonHistories>>,
    /// Evaluate with this horizon for every instrument instead of the
    /// history. Used by statistics that carry no observed data.
    fixed_horizon: Option<f64>,
}

impl LnSignalDensity {
    pub fn new(params: DensityParams) -> Self {
        let horizons = HorizonHistories::new(&params.network.instruments);
        LnSignalDensity {
            params,
            density: SnrChiPdf::new(),
            horizons: Arc::new(RwLock::new(horizons)),
            fixed_horizon: None,
        }
    }

    /// A density with no observed sensitivity history: every instrument
    /// is assigned a nominal 100 Mpc horizon.
    pub fn dataless(params: DensityParams) -> Self {
        let mut density = LnSignalDensity::new(params);
        density.fixed_horizon = Some(100.0);
        density
    }

    /// A density that evaluates against `donor`'s live horizon history
    /// without owning it.
    pub fn spliced(params: DensityParams, donor: Arc<RwLock<HorizonHistories>>) -> Self {
        LnSignalDensity {
            params,
            density: SnrChiPdf::new(),
            horizons: donor,
            fixed_horizon: None,
        }
    }

    pub fn params(&self) -> &DensityParams {
        &self.params
    }

    pub fn surface(&self) -> &SnrChiPdf {
        &self.density
    }

    pub fn surface_mut(&mut self) -> &mut SnrChiPdf {
        &mut self.density
    }

    /// Handle to the shared horizon history, for splicing.
    pub fn horizons_handle(&self) -> Arc<RwLock<HorizonHistories>> {
        Arc::clone(&self.horizons)
    }

    /// Re-point this density at another statistic's live horizon
    /// history, keeping the trained surface.
    pub fn splice_horizons(&mut self, donor: Arc<RwLock<HorizonHistories>>) {
        self.horizons = donor;
        self.fixed_horizon = None;
    }

    pub fn horizons_snapshot(&self) -> HorizonHistories {
        self.horizons
            .read()
            .expect("horizons lock poisoned")
            .clone()
    }

    /// Record an instrument's horizon distance at time `t`.
    pub fn set_horizon(&mut self, ifo: &str, t: f64, distance: f64) {
        self.horizons
            .write()
            .expect("horizons lock poisoned")
            .set(ifo, t, distance);
    }

    /// Train the shared surface with one signal-like trigger.
    pub fn increment(&mut self, trigger: &Trigger) -> Result<()> {
        self.density
            .increment(trigger.snr, trigger.chisq_over_snr2())
    }

    pub fn merge(&mut self, other: &LnSignalDensity) -> Result<()> {
        self.params.assert_compatible(&other.params)?;
        self.density.merge(&other.density)?;
        let theirs = other.horizons_snapshot();
        self.horizons
            .write()
            .expect("horizons lock poisoned")
            .merge(&theirs);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.density.finish()
    }

    pub fn is_finished(&self) -> bool {
        self.density.is_finished()
    }

    /// Seed the surface with an analytic signal model: the universal
    /// SNR⁻⁴ distribution of a uniform-in-volume population, with the
    /// χ²/SNR² of well-matched waveforms concentrated log-normally
    /// around 0.02. Carries `n` counts.
    pub fn add_signal_model(&mut self, n: f64) -> Result<()> {
        let bins = crate::stats::snr_chi_binning();
        let mut cells = Vec::new();
        let mut norm = 0.0;
        let mu = 0.02f64.ln();
        let sigma = 0.5;
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
                let z = (rcoss.ln() - mu) / sigma;
                let w = dsnr * drcoss * snr.powi(-4) * (-0.5 * z * z).exp() / rcoss;
                cells.push((snr, rcoss, w));
                norm += w;
            }
        }
        for (snr, rcoss, w) in cells {
            self.density.add_weight(snr, rcoss, w / norm * n)?;
        }
        Ok(())
    }

    /// Horizon distances for every instrument at `time`.
    fn horizons_at(&self, time: f64) -> HashMap<String, f64> {
        if let Some(d) = self.fixed_horizon {
            return self
                .params
                .network
                .instruments
                .iter()
                .map(|ifo| (ifo.clone(), d))
                .collect();
        }
        let window = Segment::new(time - HORIZON_LOOKBACK, time);
        self.horizons
            .read()
            .expect("horizons lock poisoned")
            .volume_weighted_means(&window)
    }

    /// ln P(the signal is seen by exactly the `member_ifos`, given the
    /// horizons). Detection probability scales as sensitive volume, so
    /// as the cube of the horizon.
    fn ln_p_instruments(&self, member_ifos: &[&str], horizons: &HashMap<String, f64>) -> f64 {
        let d_max = horizons.values().cloned().fold(0.0f64, f64::max);
        if d_max <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let sensitive: Vec<(&String, f64)> = horizons
            .iter()
            .filter(|(_, d)| **d > 0.0)
            .map(|(ifo, d)| {
                let r = d / d_max;
                (ifo, 0.5 * r * r * r)
            })
            .collect();
        let min_n = self.params.min_instruments();

        // log domain: detection probabilities shrink as the cube of the
        // horizon ratio and products over combinations underflow
        let ln_p_of = |combo_mask: u32| -> f64 {
            sensitive
                .iter()
                .enumerate()
                .map(|(k, (_, p))| {
                    if combo_mask & (1 << k) != 0 {
                        p.ln()
                    } else {
                        (1.0 - *p).ln()
                    }
                })
                .sum()
        };

        let mut target = f64::NEG_INFINITY;
        let mut terms = Vec::new();
        for mask in 1u32..(1 << sensitive.len()) {
            if (mask.count_ones() as usize) < min_n {
                continue;
            }
            let ln_p = ln_p_of(mask);
            terms.push(ln_p);
            let matches = sensitive
                .iter()
                .enumerate()
                .all(|(k, (ifo, _))| (mask & (1 << k) != 0) == member_ifos.contains(&ifo.as_str()));
            if matches {
                target = ln_p;
            }
        }
        let total = log_sum_exp(&terms);
        if target == f64::NEG_INFINITY || total == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        target - total
    }

    /// ln P(candidate | signal). `NEG_INFINITY` when the candidate is
    /// impossible under the signal model: too few members, a member from
    /// an instrument with zero horizon, or a member in an empty region
    /// of the surface.
    pub fn evaluate(&self, coinc: &Coincidence) -> f64 {
        if coinc.members.len() < self.params.min_instruments() {
            return f64::NEG_INFINITY;
        }
        let time = coinc.earliest_end().as_secs_f64();
        let horizons = self.horizons_at(time);
        for member in &coinc.members {
            match horizons.get(&member.ifo) {
                Some(d) if *d > 0.0 => {}
                _ => return f64::NEG_INFINITY,
            }
        }

        // sensitive volume: the network reaches as far as the
        // min_instruments-th most sensitive detector
        let mut sorted: Vec<f64> = horizons.values().cloned().collect();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let reach = sorted[self.params.min_instruments() - 1] / REFERENCE_HORIZON;
        if reach <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let member_ifos: Vec<&str> = coinc.members.iter().map(|m| m.ifo.as_str()).collect();
        let mut ln_p = 3.0 * reach.ln() + self.ln_p_instruments(&member_ifos, &horizons);

        // uniform population over the template bank
        ln_p -= (self.params.n_templates() as f64).ln();

        // arrival-time and phase extrinsics: Δt uniform within each
        // pairwise window, phase uniform on the circle per member
        for (a, ta) in member_ifos.iter().enumerate() {
            for tb in &member_ifos[(a + 1)..] {
                ln_p -= (2.0 * self.params.network.pair_window(ta, tb)).ln();
            }
        }
        ln_p -= coinc.members.len() as f64 * TAU.ln();

        // member SNRs should scale like the horizons; penalize the
        // log-ratio mismatch against the loudest member
        if coinc.members.len() >= 2 {
            let loudest = coinc
                .members
                .iter()
                .max_by(|a, b| a.snr.total_cmp(&b.snr))
                .expect("coincidence has at least one member");
            let d0 = horizons[&loudest.ifo];
            for member in &coinc.members {
                if member.id == loudest.id {
                    continue;
                }
                let predicted = horizons[&member.ifo] / d0;
                let x = (member.snr / loudest.snr / predicted).ln();
                ln_p += -0.5 * (x / SNR_RATIO_SIGMA).powi(2)
                    - (SNR_RATIO_SIGMA * (2.0 * PI).sqrt()).ln();
            }
        }

        for member in &coinc.members {
            ln_p += self
                .density
                .ln_density(member.snr, member.chisq_over_snr2());
        }
        ln_p
    }
}

impl Clone for LnSignalDensity {
    fn clone(&self) -> Self {
        LnSignalDensity {
            params: self.params.clone(),
            density: self.density.clone(),
            horizons: Arc::new(RwLock::new(self.horizons_snapshot())),
            fixed_horizon: self.fixed_horizon,
        }
    }
}

impl std::fmt::Debug for LnSignalDensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LnSignalDensity")
            .field("params", &self.params)
            .field("fixed_horizon", &self.fixed_horizon)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwc_common::{GpsTime, NetworkConfig, TimeSlideId, TriggerId};
    use std::collections::BTreeSet;

    fn params() -> DensityParams {
        DensityParams::new(BTreeSet::from([1, 2]), NetworkConfig::hl(0.005)).unwrap()
    }

    fn trigger(id: u64, ifo: &str, end: f64, snr: f64) -> Trigger {
        Trigger {
            id: TriggerId(id),
            ifo: ifo.into(),
            end: GpsTime::from_secs_f64(end),
            snr,
            chisq: snr * snr * 0.02,
            chisq_dof: 10,
            template_id: 1,
            aux: None,
        }
    }

    fn coinc(members: Vec<Trigger>) -> Coincidence {
        Coincidence::new(members, TimeSlideId::ZERO_LAG)
    }

    fn trained() -> LnSignalDensity {
        let mut density = LnSignalDensity::new(params());
        density.add_signal_model(10_000.0).unwrap();
        density.set_horizon("H1", 0.0, 120.0);
        density.set_horizon("L1", 0.0, 100.0);
        density.finish().unwrap();
        density
    }

    #[test]
    fn test_consistent_pair_is_finite() {
        let density = trained();
        let c = coinc(vec![
            trigger(1, "H1", 5000.0, 9.6),
            trigger(2, "L1", 5000.003, 8.0),
        ]);
        assert!(density.evaluate(&c).is_finite());
    }

    #[test]
    fn test_zero_horizon_member_is_impossible() {
        let mut density = LnSignalDensity::new(params());
        density.add_signal_model(10_000.0).unwrap();
        density.set_horizon("H1", 0.0, 120.0);
        density.finish().unwrap();
        let c = coinc(vec![
            trigger(1, "H1", 5000.0, 9.0),
            trigger(2, "L1", 5000.003, 8.0),
        ]);
        assert_eq!(density.evaluate(&c), f64::NEG_INFINITY);
    }

    #[test]
    fn test_snr_ratio_mismatch_penalized() {
        let density = trained();
        // horizons predict H1 about 1.2x louder than L1
        let consistent = coinc(vec![
            trigger(1, "H1", 5000.0, 9.6),
            trigger(2, "L1", 5000.003, 8.0),
        ]);
        let inverted = coinc(vec![
            trigger(1, "H1", 5000.0, 8.0),
            trigger(2, "L1", 5000.003, 24.0),
        ]);
        assert!(density.evaluate(&consistent) > density.evaluate(&inverted));
    }

    #[test]
    fn test_better_horizons_raise_density() {
        let near = trained();
        let mut far = LnSignalDensity::new(params());
        far.add_signal_model(10_000.0).unwrap();
        far.set_horizon("H1", 0.0, 240.0);
        far.set_horizon("L1", 0.0, 200.0);
        far.finish().unwrap();
        let c = coinc(vec![
            trigger(1, "H1", 5000.0, 9.6),
            trigger(2, "L1", 5000.003, 8.0),
        ]);
        assert!(far.evaluate(&c) > near.evaluate(&c));
    }

    #[test]
    fn test_dataless_needs_no_horizons() {
        let mut density = LnSignalDensity::dataless(params());
        density.add_signal_model(10_000.0).unwrap();
        density.finish().unwrap();
        let c = coinc(vec![
            trigger(1, "H1", 5000.0, 9.0),
            trigger(2, "L1", 5000.003, 9.0),
        ]);
        assert!(density.evaluate(&c).is_finite());
    }

    #[test]
    fn test_spliced_sees_donor_horizons() {
        let collector = LnSignalDensity::new(params());
        let mut spliced = LnSignalDensity::spliced(params(), collector.horizons_handle());
        spliced.add_signal_model(10_000.0).unwrap();
        spliced.finish().unwrap();
        let c = coinc(vec![
            trigger(1, "H1", 5000.0, 9.0),
            trigger(2, "L1", 5000.003, 9.0),
        ]);
        assert_eq!(spliced.evaluate(&c), f64::NEG_INFINITY);
        collector
            .horizons_handle()
            .write()
            .unwrap()
            .set("H1", 0.0, 100.0);
        collector
            .horizons_handle()
            .write()
            .unwrap()
            .set("L1", 0.0, 100.0);
        assert!(spliced.evaluate(&c).is_finite());
    }
}
