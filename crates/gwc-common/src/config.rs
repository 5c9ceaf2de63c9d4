//! Detector-network configuration.
//!
//! Everything the engine used to pick up from ambient global state
//! (instrument tables, light-travel times, slide offsets) is carried
//! explicitly here and passed in at construction.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Light-crossing time of the Earth (2·R⊕/c) in seconds. Upper bound on
/// any pairwise light-travel time, used in the completeness horizon.
pub const EARTH_CROSSING_TIME: f64 = 2.0 * 6.378_137e6 / 2.997_924_58e8;

/// Pairwise light-travel time between two detector sites, seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightTravelEntry {
    pub a: String,
    pub b: String,
    pub seconds: f64,
}

/// A time-slide offset vector: per-instrument time shifts in seconds.
/// The all-zero vector is zero-lag; anything else exists only for
/// background estimation.
pub type OffsetVector = HashMap<String, f64>;

/// Static configuration of the detector network and coincidence rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Instrument names, e.g. `["H1", "L1", "V1"]`.
    pub instruments: Vec<String>,
    /// Pairwise light-travel times. Symmetric; one entry per pair.
    pub light_travel: Vec<LightTravelEntry>,
    /// Coincidence window Δt in seconds, *not* including light travel.
    pub delta_t: f64,
    /// Minimum number of participating instruments for a coincidence.
    pub min_instruments: usize,
    /// Offset vectors; index 0 must be the zero-lag (all-zero) vector.
    pub time_slides: Vec<OffsetVector>,
}

impl NetworkConfig {
    /// Standard two-site H1/L1 network.
    pub fn hl(delta_t: f64) -> Self {
        NetworkConfig {
            instruments: vec!["H1".into(), "L1".into()],
            light_travel: vec![LightTravelEntry {
                a: "H1".into(),
                b: "L1".into(),
                seconds: 0.010_012_847,
            }],
            delta_t,
            min_instruments: 2,
            time_slides: vec![OffsetVector::new()],
        }
    }

    /// Standard three-site H1/L1/V1 network.
    pub fn hlv(delta_t: f64) -> Self {
        NetworkConfig {
            instruments: vec!["H1".into(), "L1".into(), "V1".into()],
            light_travel: vec![
                LightTravelEntry {
                    a: "H1".into(),
                    b: "L1".into(),
                    seconds: 0.010_012_847,
                },
                LightTravelEntry {
                    a: "H1".into(),
                    b: "V1".into(),
                    seconds: 0.027_287_980,
                },
                LightTravelEntry {
                    a: "L1".into(),
                    b: "V1".into(),
                    seconds: 0.026_448_235,
                },
            ],
            delta_t,
            min_instruments: 2,
            time_slides: vec![OffsetVector::new()],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(Error::Config("instrument list is empty".into()));
        }
        if self.min_instruments < 1 {
            return Err(Error::Config(format!(
                "min_instruments={} must be >= 1",
                self.min_instruments
            )));
        }
        if self.min_instruments > self.instruments.len() {
            return Err(Error::Config(format!(
                "not enough instruments ({}) to satisfy min_instruments={}",
                self.instruments.join(", "),
                self.min_instruments
            )));
        }
        if self.delta_t < 0.0 {
            return Err(Error::Config(format!(
                "delta_t={} must be >= 0",
                self.delta_t
            )));
        }
        for i in 0..self.instruments.len() {
            for j in (i + 1)..self.instruments.len() {
                let (a, b) = (&self.instruments[i], &self.instruments[j]);
                if self.lookup_light_travel(a, b).is_none() {
                    return Err(Error::Config(format!(
                        "missing light-travel time for pair {a}-{b}"
                    )));
                }
            }
        }
        match self.time_slides.first() {
            Some(zero) if zero.values().all(|dt| *dt == 0.0) => {}
            _ => {
                return Err(Error::Config(
                    "time_slides[0] must be the zero-lag offset vector".into(),
                ))
            }
        }
        for vector in &self.time_slides {
            if let Some(unknown) = vector.keys().find(|k| !self.instruments.contains(k)) {
                return Err(Error::Config(format!(
                    "time-slide offset names unknown instrument {unknown}"
                )));
            }
        }
        Ok(())
    }

    fn lookup_light_travel(&self, a: &str, b: &str) -> Option<f64> {
        self.light_travel
            .iter()
            .find(|e| (e.a == a && e.b == b) || (e.a == b && e.b == a))
            .map(|e| e.seconds)
    }

    /// Light-travel time between two instruments, seconds.
    ///
    /// # Panics
    ///
    /// Panics for pairs not present in a validated configuration.
    pub fn light_travel_time(&self, a: &str, b: &str) -> f64 {
        self.lookup_light_travel(a, b)
            .unwrap_or_else(|| panic!("no light-travel time for pair {a}-{b}"))
    }

    /// Full pairwise coincidence window: Δt plus light travel.
    pub fn pair_window(&self, a: &str, b: &str) -> f64 {
        self.delta_t + self.light_travel_time(a, b)
    }

    /// Upper bound on the time separating two coincident triggers, not
    /// including time-slide offsets: Δt padded by 10% for safety plus
    /// the Earth light-crossing time.
    pub fn max_dt(&self) -> f64 {
        1.1 * self.delta_t + EARTH_CROSSING_TIME
    }

    /// Largest |offset| appearing in any slide vector.
    pub fn max_slide_offset(&self) -> f64 {
        self.time_slides
            .iter()
            .flat_map(|v| v.values())
            .fold(0.0, |acc, dt| acc.max(dt.abs()))
    }

    /// Offset applied to `ifo` under slide `slide`, seconds.
    pub fn offset(&self, slide: usize, ifo: &str) -> f64 {
        self.time_slides[slide].get(ifo).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hlv_validates() {
        NetworkConfig::hlv(0.005).validate().unwrap();
    }

    #[test]
    fn test_light_travel_symmetric() {
        let cfg = NetworkConfig::hlv(0.005);
        assert_eq!(
            cfg.light_travel_time("H1", "V1"),
            cfg.light_travel_time("V1", "H1")
        );
    }

    #[test]
    fn test_max_dt_includes_earth_crossing() {
        let cfg = NetworkConfig::hl(0.01);
        assert!((cfg.max_dt() - (0.011 + EARTH_CROSSING_TIME)).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_min_instruments_over_network_size() {
        let mut cfg = NetworkConfig::hl(0.005);
        cfg.min_instruments = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_zero_lag() {
        let mut cfg = NetworkConfig::hl(0.005);
        cfg.time_slides = vec![HashMap::from([("H1".to_string(), 1.0)])];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_max_slide_offset() {
        let mut cfg = NetworkConfig::hl(0.005);
        cfg.time_slides
            .push(HashMap::from([("L1".to_string(), -7.5)]));
        assert_eq!(cfg.max_slide_offset(), 7.5);
    }
}
