//! Pipeline self-observation.
//!
//! Cheap counters and small rings updated inside the pipeline lock,
//! snapshotted on demand for status endpoints and shutdown summaries.

use serde::Serialize;
use std::collections::VecDeque;

const RECENT_CANDIDATES: usize = 256;

/// Log-spaced latency buckets in seconds: <1, <2, <4, ... <512, rest.
const LATENCY_BUCKETS: usize = 11;

#[derive(Debug, Default)]
pub struct Diagnostics {
    triggers_in: u64,
    coincs_out: u64,
    singles_out: u64,
    alerts_sent: u64,
    alerts_abandoned: u64,
    latency: [u64; LATENCY_BUCKETS],
    recent: VecDeque<CandidateRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateRecord {
    pub time: f64,
    pub ln_lr: Option<f64>,
    pub far: Option<f64>,
}

/// Point-in-time copy of the diagnostics, safe to hold outside the
/// pipeline lock.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticSnapshot {
    pub triggers_in: u64,
    pub coincs_out: u64,
    pub singles_out: u64,
    pub alerts_sent: u64,
    pub alerts_abandoned: u64,
    pub latency_histogram: Vec<u64>,
    pub recent_candidates: Vec<CandidateRecord>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn record_ingest(&mut self, n: usize) {
        self.triggers_in += n as u64;
    }

    /// Record a reported zero-lag candidate and its reporting latency
    /// (boundary time minus candidate time).
    pub fn record_candidate(&mut self, record: CandidateRecord, latency: f64) {
        self.coincs_out += 1;
        let bucket = if latency <= 0.0 {
            0
        } else {
            (latency.log2().ceil().max(0.0) as usize).min(LATENCY_BUCKETS - 1)
        };
        self.latency[bucket] += 1;
        if self.recent.len() == RECENT_CANDIDATES {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    pub fn record_singles(&mut self, n: usize) {
        self.singles_out += n as u64;
    }

    pub fn record_alert(&mut self, delivered: bool) {
        if delivered {
            self.alerts_sent += 1;
        } else {
            self.alerts_abandoned += 1;
        }
    }

    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            triggers_in: self.triggers_in,
            coincs_out: self.coincs_out,
            singles_out: self.singles_out,
            alerts_sent: self.alerts_sent,
            alerts_abandoned: self.alerts_abandoned,
            latency_histogram: self.latency.to_vec(),
            recent_candidates: self.recent.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut d = Diagnostics::new();
        d.record_ingest(10);
        d.record_singles(3);
        d.record_alert(true);
        d.record_alert(false);
        let snap = d.snapshot();
        assert_eq!(snap.triggers_in, 10);
        assert_eq!(snap.singles_out, 3);
        assert_eq!(snap.alerts_sent, 1);
        assert_eq!(snap.alerts_abandoned, 1);
    }

    #[test]
    fn test_latency_bucketing() {
        let mut d = Diagnostics::new();
        let record = CandidateRecord {
            time: 0.0,
            ln_lr: Some(1.0),
            far: None,
        };
        d.record_candidate(record, 0.5);
        d.record_candidate(record, 3.0);
        d.record_candidate(record, 1e9);
        let snap = d.snapshot();
        assert_eq!(snap.latency_histogram[0], 1);
        assert_eq!(snap.latency_histogram[2], 1);
        assert_eq!(snap.latency_histogram[LATENCY_BUCKETS - 1], 1);
        assert_eq!(snap.coincs_out, 3);
    }

    #[test]
    fn test_recent_ring_caps() {
        let mut d = Diagnostics::new();
        for k in 0..(RECENT_CANDIDATES + 10) {
            d.record_candidate(
                CandidateRecord {
                    time: k as f64,
                    ln_lr: None,
                    far: None,
                },
                1.0,
            );
        }
        let snap = d.snapshot();
        assert_eq!(snap.recent_candidates.len(), RECENT_CANDIDATES);
        assert_eq!(snap.recent_candidates[0].time, 10.0);
    }
}
