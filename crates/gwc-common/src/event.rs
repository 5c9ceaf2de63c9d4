//! Trigger and coincidence records.

use crate::time::GpsTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-unique trigger identifier, assigned at ingestion.
///
/// IDs are monotonically increasing and never reused within a run, which
/// is what makes the engine's used-ID bookkeeping sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(pub u64);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sngl:{}", self.0)
    }
}

/// Monotone ID source. One per pipeline run.
#[derive(Debug, Default)]
pub struct TriggerIdGenerator {
    next: u64,
}

impl TriggerIdGenerator {
    pub fn new() -> Self {
        TriggerIdGenerator::default()
    }

    /// Resume after loading a checkpoint: IDs continue strictly above
    /// anything previously assigned.
    pub fn starting_at(next: u64) -> Self {
        TriggerIdGenerator { next }
    }

    pub fn next_id(&mut self) -> TriggerId {
        let id = TriggerId(self.next);
        self.next += 1;
        id
    }
}

/// Identifier of a time-slide offset vector; index into
/// [`crate::NetworkConfig::time_slides`]. Slide 0 is always zero-lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSlideId(pub usize);

impl TimeSlideId {
    pub const ZERO_LAG: TimeSlideId = TimeSlideId(0);

    pub fn is_zero_lag(&self) -> bool {
        self.0 == 0
    }
}

/// A single-detector trigger from the matched-filter front end.
///
/// Immutable once created, except that the auxiliary payload is dropped
/// once the trigger is too old to appear in a published candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    /// Detector name, e.g. "H1".
    pub ifo: String,
    /// Coalescence (end) time.
    pub end: GpsTime,
    pub snr: f64,
    pub chisq: f64,
    pub chisq_dof: u32,
    pub template_id: u64,
    /// Opaque per-trigger payload (e.g. an SNR time-series snippet),
    /// retained only until publishing no longer needs it.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aux: Option<Vec<u8>>,
}

impl Trigger {
    /// The χ²/SNR² coordinate used by the (SNR, χ²) density surfaces.
    pub fn chisq_over_snr2(&self) -> f64 {
        self.chisq / (self.snr * self.snr)
    }

    /// Drop the auxiliary payload once stale.
    pub fn drop_aux(&mut self) {
        self.aux = None;
    }
}

/// A multi- (or, when permitted, single-) detector coincidence.
///
/// Owned by the engine for the duration of one pass; scored, then handed
/// downstream and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coincidence {
    pub members: Vec<Trigger>,
    pub time_slide: TimeSlideId,
    /// ln likelihood-ratio, filled by scoring. `-inf` means rejected.
    pub ln_lr: Option<f64>,
    pub fap: Option<f64>,
    pub far: Option<f64>,
}

impl Coincidence {
    pub fn new(mut members: Vec<Trigger>, time_slide: TimeSlideId) -> Self {
        // canonical member order: by end time, then ID
        members.sort_by(|a, b| a.end.cmp(&b.end).then(a.id.cmp(&b.id)));
        Coincidence {
            members,
            time_slide,
            ln_lr: None,
            fap: None,
            far: None,
        }
    }

    pub fn is_zero_lag(&self) -> bool {
        self.time_slide.is_zero_lag()
    }

    pub fn ifos(&self) -> Vec<&str> {
        self.members.iter().map(|t| t.ifo.as_str()).collect()
    }

    /// Earliest member end time; this is the "time" of the coincidence
    /// for completeness-horizon bookkeeping.
    pub fn earliest_end(&self) -> GpsTime {
        self.members
            .iter()
            .map(|t| t.end)
            .min()
            .expect("coincidence has at least one member")
    }

    /// Latest member end time, used by the cluster tie-break policy.
    pub fn latest_end(&self) -> GpsTime {
        self.members
            .iter()
            .map(|t| t.end)
            .max()
            .expect("coincidence has at least one member")
    }

    pub fn max_trigger_id(&self) -> TriggerId {
        self.members
            .iter()
            .map(|t| t.id)
            .max()
            .expect("coincidence has at least one member")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(id: u64, ifo: &str, t: f64, snr: f64) -> Trigger {
        Trigger {
            id: TriggerId(id),
            ifo: ifo.to_string(),
            end: GpsTime::from_secs_f64(t),
            snr,
            chisq: 1.0,
            chisq_dof: 10,
            template_id: 7,
            aux: None,
        }
    }

    #[test]
    fn test_id_generator_is_monotone() {
        let mut generator = TriggerIdGenerator::new();
        let a = generator.next_id();
        let b = generator.next_id();
        assert!(b > a);
    }

    #[test]
    fn test_coincidence_member_order_canonical() {
        let coinc = Coincidence::new(
            vec![trigger(2, "L1", 100.015, 9.0), trigger(1, "H1", 100.0, 10.0)],
            TimeSlideId::ZERO_LAG,
        );
        assert_eq!(coinc.members[0].ifo, "H1");
        assert_eq!(coinc.earliest_end(), GpsTime::from_secs_f64(100.0));
        assert_eq!(coinc.latest_end(), GpsTime::from_secs_f64(100.015));
        assert_eq!(coinc.max_trigger_id(), TriggerId(2));
    }

    #[test]
    fn test_chisq_over_snr2() {
        let t = trigger(1, "H1", 100.0, 10.0);
        assert!((t.chisq_over_snr2() - 0.01).abs() < 1e-12);
    }
}
