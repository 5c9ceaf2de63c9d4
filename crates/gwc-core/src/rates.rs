//! Sliding per-detector trigger-rate history.
//!
//! Each instrument carries an ordered, disjoint list of (segment, count)
//! bins recording how many triggers the front end produced over each
//! span of analyzed data. The list doubles as the record of when the
//! instrument was producing SNR at all: a time not covered by any bin is
//! a time the detector was off.
//!
//! Bins that overlap or abut are merged (segments unioned, counts
//! summed) on every mutation, so the list stays coalesced and memory
//! stays proportional to the number of distinct livetime stretches, not
//! the number of buffers.

use gwc_common::{Segment, SegmentList};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One rate bin: a time span and the number of triggers inside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBin {
    pub segment: Segment,
    pub count: f64,
}

impl RateBin {
    pub fn new(segment: Segment, count: f64) -> Self {
        RateBin { segment, count }
    }

    /// Triggers per second over this bin.
    pub fn density(&self) -> f64 {
        let dt = self.segment.duration();
        if dt > 0.0 {
            self.count / dt
        } else {
            0.0
        }
    }
}

/// Sorted, disjoint, coalesced list of rate bins for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateBinList {
    bins: Vec<RateBin>,
}

impl RateBinList {
    pub fn new() -> Self {
        RateBinList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateBin> {
        self.bins.iter()
    }

    /// Insert a new bin, merging with any overlapping or abutting
    /// neighbours (counts add).
    pub fn add_ratebin(&mut self, segment: Segment, count: f64) {
        if segment.duration() <= 0.0 {
            return;
        }
        let mut merged = RateBin::new(segment, count);
        let mut out = Vec::with_capacity(self.bins.len() + 1);
        let mut placed = false;
        for bin in &self.bins {
            if bin.segment.end < merged.segment.start {
                out.push(*bin);
            } else if bin.segment.start > merged.segment.end {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(*bin);
            } else {
                merged = RateBin::new(
                    Segment::new(
                        merged.segment.start.min(bin.segment.start),
                        merged.segment.end.max(bin.segment.end),
                    ),
                    merged.count + bin.count,
                );
            }
        }
        if !placed {
            out.push(merged);
        }
        self.bins = out;
    }

    /// Rate at `time` in triggers/second, or `None` if `time` falls in a
    /// gap (detector off).
    pub fn density_at(&self, time: f64) -> Option<f64> {
        self.bins
            .iter()
            .find(|b| b.segment.contains(time))
            .map(RateBin::density)
    }

    /// Average rate over the intersection of the history with `window`,
    /// with counts of partially overlapped bins scaled by the overlap
    /// fraction. `None` when the window contains no livetime.
    pub fn density_in(&self, window: &Segment) -> Option<f64> {
        let mut count = 0.0;
        let mut livetime = 0.0;
        for bin in &self.bins {
            if let Some(overlap) = bin.segment.intersection(window) {
                let frac = overlap.duration() / bin.segment.duration();
                count += bin.count * frac;
                livetime += overlap.duration();
            }
        }
        if livetime > 0.0 {
            Some(count / livetime)
        } else {
            None
        }
    }

    /// Union of another history's bins into this one.
    pub fn merge(&mut self, other: &RateBinList) {
        for bin in &other.bins {
            self.add_ratebin(bin.segment, bin.count);
        }
    }

    pub fn livetime(&self) -> f64 {
        self.bins.iter().map(|b| b.segment.duration()).sum()
    }

    pub fn total_count(&self) -> f64 {
        self.bins.iter().map(|b| b.count).sum()
    }

    /// Times covered by any bin, as a segment list.
    pub fn segments(&self) -> SegmentList {
        SegmentList::from_segments(self.bins.iter().map(|b| b.segment).collect())
    }

    /// Draw a time uniformly from the livetime of bins with a non-zero
    /// rate, returning the time and the rate there. Used by the synthetic
    /// background sampler, not the online path.
    pub fn random_uniform<R: Rng>(&self, rng: &mut R) -> Option<(f64, f64)> {
        let live: f64 = self
            .bins
            .iter()
            .filter(|b| b.count > 0.0)
            .map(|b| b.segment.duration())
            .sum();
        if live <= 0.0 {
            return None;
        }
        let mut u = rng.random::<f64>() * live;
        for bin in self.bins.iter().filter(|b| b.count > 0.0) {
            let dt = bin.segment.duration();
            if u < dt {
                return Some((bin.segment.start + u, bin.density()));
            }
            u -= dt;
        }
        // floating-point edge: fall back to the last non-empty bin
        self.bins
            .iter()
            .rev()
            .find(|b| b.count > 0.0)
            .map(|b| (b.segment.end - 1e-9, b.density()))
    }
}

/// Per-instrument rate histories for the whole network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerRates {
    histories: HashMap<String, RateBinList>,
}

impl TriggerRates {
    pub fn new(instruments: &[String]) -> Self {
        TriggerRates {
            histories: instruments
                .iter()
                .map(|ifo| (ifo.clone(), RateBinList::new()))
                .collect(),
        }
    }

    pub fn get(&self, ifo: &str) -> Option<&RateBinList> {
        self.histories.get(ifo)
    }

    pub fn add_ratebin(&mut self, ifo: &str, segment: Segment, count: f64) {
        self.histories
            .entry(ifo.to_string())
            .or_default()
            .add_ratebin(segment, count);
    }

    pub fn merge(&mut self, other: &TriggerRates) {
        for (ifo, list) in &other.histories {
            self.histories.entry(ifo.clone()).or_default().merge(list);
        }
    }

    pub fn instruments(&self) -> impl Iterator<Item = &String> {
        self.histories.keys()
    }

    /// Per-instrument livetime segment lists.
    pub fn segment_lists(&self) -> HashMap<String, SegmentList> {
        self.histories
            .iter()
            .map(|(ifo, list)| (ifo.clone(), list.segments()))
            .collect()
    }

    /// Livetime during which at least `n` instruments were live; the
    /// effective background livetime for FAR normalization.
    pub fn livetime_with_min_instruments(&self, n: usize) -> f64 {
        let lists: Vec<SegmentList> = self.histories.values().map(RateBinList::segments).collect();
        let mut boundaries: Vec<f64> = lists
            .iter()
            .flat_map(|l| l.iter().flat_map(|s| [s.start, s.end]))
            .collect();
        boundaries.sort_by(f64::total_cmp);
        boundaries.dedup();
        let mut livetime = 0.0;
        for pair in boundaries.windows(2) {
            let mid = 0.5 * (pair[0] + pair[1]);
            let live = lists.iter().filter(|l| l.contains(mid)).count();
            if live >= n {
                livetime += pair[1] - pair[0];
            }
        }
        livetime
    }
}
