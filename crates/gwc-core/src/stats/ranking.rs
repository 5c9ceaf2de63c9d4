//! The likelihood-ratio ranking statistic.
//!
//! `ln L = ln P(candidate | signal) − ln P(candidate | noise)`, with the
//! conventions that make the extremes behave:
//!
//! * the signal model says impossible → `−inf`, regardless of the noise
//!   model (including `−inf − −inf`),
//! * only the noise model says impossible → `+inf` (the candidate can
//!   only be a signal).
//!
//! A statistic comes in three flavors. A *trained* statistic owns its
//! data and accepts training; a *dataless* statistic carries analytic
//! models only and substitutes nominal rates and horizons; a *spliced*
//! statistic carries trained surfaces from a checkpoint but evaluates
//! against a live statistic's rate and horizon histories. Only the
//! trained flavor may be trained, merged, or persisted.

use crate::stats::{DensityParams, DensitySet, LnNoiseDensity, LnSignalDensity};
use gwc_common::{Coincidence, Error, Result, Segment, Trigger};

/// How a ranking statistic came to be, and therefore what it may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingStatVariant {
    /// Owns its data; accepts training, merging, persistence.
    Trained,
    /// Analytic models only; read-only.
    Dataless,
    /// Trained surfaces evaluated against another statistic's live
    /// histories; read-only.
    Spliced,
}

/// Anything that can assign `ln L` to a candidate. The engine scores
/// through this seam so tests can substitute fixed scorers.
pub trait CoincScorer {
    fn ln_lr(&self, coinc: &Coincidence) -> f64;
}

#[derive(Debug, Clone)]
pub struct RankingStat {
    variant: RankingStatVariant,
    pub numerator: LnSignalDensity,
    pub denominator: LnNoiseDensity,
    /// Raw counts of zero-lag candidates, kept separate from the noise
    /// training so the background stays signal-blind.
    pub zerolag: DensitySet,
}

impl RankingStat {
    pub fn new(params: DensityParams) -> Self {
        RankingStat {
            variant: RankingStatVariant::Trained,
            numerator: LnSignalDensity::new(params.clone()),
            denominator: LnNoiseDensity::new(params.clone()),
            zerolag: DensitySet::new(params),
        }
    }

    /// A statistic usable before any data has been seen.
    pub fn dataless(params: DensityParams) -> Result<Self> {
        let mut numerator = LnSignalDensity::dataless(params.clone());
        let mut denominator = LnNoiseDensity::dataless(params.clone());
        numerator.add_signal_model(1e6)?;
        denominator.add_noise_model(1e6)?;
        numerator.finish()?;
        denominator.finish()?;
        Ok(RankingStat {
            variant: RankingStatVariant::Dataless,
            numerator,
            denominator,
            zerolag: DensitySet::new(params),
        })
    }

    /// Graft `trained`'s surfaces onto `donor`'s live rate and horizon
    /// histories. `trained` is consumed; the result is read-only.
    pub fn spliced(mut trained: RankingStat, donor: &RankingStat) -> Result<Self> {
        trained.params().assert_compatible(donor.params())?;
        trained
            .denominator
            .splice_rates(donor.denominator.rates_handle());
        trained
            .numerator
            .splice_horizons(donor.numerator.horizons_handle());
        trained.variant = RankingStatVariant::Spliced;
        Ok(trained)
    }

    pub fn variant(&self) -> RankingStatVariant {
        self.variant
    }

    pub fn params(&self) -> &DensityParams {
        self.denominator.params()
    }

    fn assert_trained(&self, what: &str) -> Result<()> {
        if self.variant != RankingStatVariant::Trained {
            return Err(Error::Incompatible(format!(
                "{what} requires a trained statistic, not {:?}",
                self.variant
            )));
        }
        Ok(())
    }

    /// Seed both sides with their analytic models.
    pub fn seed_models(&mut self, n: f64) -> Result<()> {
        self.assert_trained("seeding")?;
        self.numerator.add_signal_model(n)?;
        self.denominator.add_noise_model(n)
    }

    /// Train the noise side with one noncoincident trigger.
    pub fn increment_noise(&mut self, trigger: &Trigger) -> Result<()> {
        self.assert_trained("training")?;
        self.denominator.increment(trigger)
    }

    /// Record a zero-lag candidate's members.
    pub fn increment_zerolag(&mut self, coinc: &Coincidence) -> Result<()> {
        self.assert_trained("training")?;
        self.zerolag.increment_coinc(coinc)
    }

    pub fn add_ratebin(&mut self, ifo: &str, segment: Segment, count: f64) -> Result<()> {
        self.assert_trained("rate accounting")?;
        self.denominator.add_ratebin(ifo, segment, count);
        Ok(())
    }

    pub fn set_horizon(&mut self, ifo: &str, t: f64, distance: f64) -> Result<()> {
        self.assert_trained("horizon accounting")?;
        self.numerator.set_horizon(ifo, t, distance);
        Ok(())
    }

    pub fn merge(&mut self, other: &RankingStat) -> Result<()> {
        self.assert_trained("merging")?;
        other.assert_trained("merging")?;
        self.numerator.merge(&other.numerator)?;
        self.denominator.merge(&other.denominator)?;
        self.zerolag.merge(&other.zerolag)
    }

    /// Apply density estimation to both sides. One-way.
    pub fn finish(&mut self) -> Result<()> {
        self.numerator.finish()?;
        self.denominator.finish()
    }

    pub fn is_finished(&self) -> bool {
        self.numerator.is_finished() || self.denominator.is_finished()
    }
}

impl CoincScorer for RankingStat {
    fn ln_lr(&self, coinc: &Coincidence) -> f64 {
        let num = self.numerator.evaluate(coinc);
        if num == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        let den = self.denominator.evaluate(coinc);
        if den == f64::NEG_INFINITY {
            return f64::INFINITY;
        }
        num - den
    }
}
