//! Horizon-distance history.
//!
//! The horizon distance (maximum detectable source distance at nominal
//! SNR) is sampled irregularly as the detectors' sensitivity drifts. The
//! history is piecewise constant with nearest-sample semantics: the value
//! at time `t` is the value of the closest sample, so each sample "owns"
//! the span out to the midpoints with its neighbours.

use gwc_common::Segment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sensitivity history for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonHistory {
    /// (time, horizon distance in Mpc), sorted by time, unique times.
    samples: Vec<(f64, f64)>,
}

impl HorizonHistory {
    pub fn new() -> Self {
        HorizonHistory::default()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Record the horizon distance at `t`, replacing any sample at the
    /// identical time.
    pub fn set(&mut self, t: f64, distance: f64) {
        match self
            .samples
            .binary_search_by(|(s, _)| s.total_cmp(&t))
        {
            Ok(i) => self.samples[i].1 = distance,
            Err(i) => self.samples.insert(i, (t, distance)),
        }
    }

    /// Value at `t`: the nearest sample's distance, or `None` for an
    /// empty history.
    pub fn value_at(&self, t: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let i = match self
            .samples
            .binary_search_by(|(s, _)| s.total_cmp(&t))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) if i == self.samples.len() => i - 1,
            Err(i) => {
                // between samples i-1 and i: nearest wins, earlier on ties
                if t - self.samples[i - 1].0 <= self.samples[i].0 - t {
                    i - 1
                } else {
                    i
                }
            }
        };
        Some(self.samples[i].1)
    }

    /// Volume-weighted mean horizon distance over `window`:
    /// `(∫ D(t)³ dt / |window|)^(1/3)`. A uniform-in-volume source
    /// population makes the cube the right weight. Returns 0 for an
    /// empty history.
    pub fn volume_weighted_mean(&self, window: &Segment) -> f64 {
        if self.samples.is_empty() || window.duration() <= 0.0 {
            return 0.0;
        }
        // breakpoints: window edges plus midpoints between samples
        let mut integral = 0.0;
        let mut t = window.start;
        for k in 0..self.samples.len() {
            let owned_until = if k + 1 < self.samples.len() {
                0.5 * (self.samples[k].0 + self.samples[k + 1].0)
            } else {
                f64::INFINITY
            };
            let upper = owned_until.min(window.end);
            if upper > t {
                let d = self.samples[k].1;
                integral += d * d * d * (upper - t);
                t = upper;
            }
            if t >= window.end {
                break;
            }
        }
        (integral / window.duration()).cbrt()
    }

    /// Union of samples from an independently accumulated history.
    pub fn merge(&mut self, other: &HorizonHistory) {
        for (t, d) in &other.samples {
            self.set(*t, *d);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.samples.iter()
    }
}

/// Per-instrument horizon histories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonHistories {
    histories: HashMap<String, HorizonHistory>,
}

impl HorizonHistories {
    pub fn new(instruments: &[String]) -> Self {
        HorizonHistories {
            histories: instruments
                .iter()
                .map(|ifo| (ifo.clone(), HorizonHistory::new()))
                .collect(),
        }
    }

    pub fn get(&self, ifo: &str) -> Option<&HorizonHistory> {
        self.histories.get(ifo)
    }

    pub fn set(&mut self, ifo: &str, t: f64, distance: f64) {
        self.histories
            .entry(ifo.to_string())
            .or_default()
            .set(t, distance);
    }

    pub fn merge(&mut self, other: &HorizonHistories) {
        for (ifo, history) in &other.histories {
            self.histories
                .entry(ifo.clone())
                .or_default()
                .merge(history);
        }
    }

    /// Volume-weighted mean horizon for every instrument over `window`;
    /// instruments with no history report 0 (insensitive).
    pub fn volume_weighted_means(&self, window: &Segment) -> HashMap<String, f64> {
        self.histories
            .iter()
            .map(|(ifo, h)| (ifo.clone(), h.volume_weighted_mean(window)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_sample_semantics() {
        let mut h = HorizonHistory::new();
        h.set(100.0, 50.0);
        h.set(200.0, 150.0);
        assert_eq!(h.value_at(0.0), Some(50.0));
        assert_eq!(h.value_at(149.0), Some(50.0));
        assert_eq!(h.value_at(151.0), Some(150.0));
        assert_eq!(h.value_at(1e9), Some(150.0));
        // tie at the midpoint goes to the earlier sample
        assert_eq!(h.value_at(150.0), Some(50.0));
    }

    #[test]
    fn test_set_replaces_equal_time() {
        let mut h = HorizonHistory::new();
        h.set(100.0, 50.0);
        h.set(100.0, 60.0);
        assert_eq!(h.len(), 1);
        assert_eq!(h.value_at(100.0), Some(60.0));
    }

    #[test]
    fn test_volume_weighted_mean_constant() {
        let mut h = HorizonHistory::new();
        h.set(0.0, 100.0);
        let d = h.volume_weighted_mean(&Segment::new(10.0, 20.0));
        assert!((d - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_weighted_mean_weights_by_cube() {
        let mut h = HorizonHistory::new();
        h.set(0.0, 0.0);
        h.set(10.0, 100.0);
        // window [0, 10): first half owned by the zero sample, second by
        // the 100 Mpc sample -> mean = (0.5 * 100^3)^(1/3)
        let d = h.volume_weighted_mean(&Segment::new(0.0, 10.0));
        assert!((d - (0.5f64 * 1e6).cbrt()).abs() < 1e-6);
    }

    #[test]
    fn test_empty_history_is_zero() {
        let h = HorizonHistory::new();
        assert_eq!(h.volume_weighted_mean(&Segment::new(0.0, 10.0)), 0.0);
        assert_eq!(h.value_at(5.0), None);
    }

    #[test]
    fn test_merge_union() {
        let mut a = HorizonHistory::new();
        a.set(0.0, 10.0);
        let mut b = HorizonHistory::new();
        b.set(100.0, 20.0);
        a.merge(&b);
        assert_eq!(a.len(), 2);
    }
}
