//! Poisson coincidence-rate combinatorics.
//!
//! Given independent Poisson trigger processes with per-instrument rates
//! λᵢ and pairwise coincidence windows τᵢⱼ = Δt + light-travel(i,j), the
//! expected rate of n-fold coincidences factorizes as
//!
//! ```text
//! μ(S) = (∏_{i ∈ S} λᵢ) · V(S)
//! ```
//!
//! where `V(S)` is the volume of the time-of-arrival polytope
//! `{ |tᵢ - tⱼ| ≤ τᵢⱼ for all pairs }` measured relative to an anchor
//! instrument. For pairs the volume is exactly `2τ`; for three or more
//! instruments the polytope is evaluated once at construction by
//! deterministic Monte-Carlo integration.
//!
//! `μ(S)` counts coincidences of *at least* the instruments in `S`;
//! the rate of coincidences of *exactly* `S` among the live instruments
//! follows by inclusion–exclusion over supersets.

use gwc_common::NetworkConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const MC_SAMPLES: u32 = 200_000;
const MC_SEED: u64 = 0x5eed_c01c;

/// Precomputed coincidence-window volumes for every instrument
/// combination of a network.
#[derive(Debug, Clone)]
pub struct CoincRates {
    instruments: Vec<String>,
    min_instruments: usize,
    /// pairwise windows indexed by instrument position
    tau: Vec<Vec<f64>>,
    /// polytope volume per combination bitmask (popcount >= 2)
    volumes: HashMap<u32, f64>,
}

impl CoincRates {
    pub fn new(network: &NetworkConfig) -> Self {
        let instruments = network.instruments.clone();
        let n = instruments.len();
        let mut tau = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    tau[i][j] = network.pair_window(&instruments[i], &instruments[j]);
                }
            }
        }

        let mut volumes = HashMap::new();
        let mut rng = StdRng::seed_from_u64(MC_SEED);
        for mask in 1u32..(1 << n) {
            if mask.count_ones() >= 2 {
                volumes.insert(mask, polytope_volume(&tau, mask, &mut rng));
            }
        }

        CoincRates {
            instruments,
            min_instruments: network.min_instruments,
            tau,
            volumes,
        }
    }

    fn index_of(&self, ifo: &str) -> Option<usize> {
        self.instruments.iter().position(|x| x == ifo)
    }

    /// Bitmask for a set of instrument names; `None` if any is unknown.
    pub fn mask_of<'a, I: IntoIterator<Item = &'a str>>(&self, ifos: I) -> Option<u32> {
        let mut mask = 0u32;
        for ifo in ifos {
            mask |= 1 << self.index_of(ifo)?;
        }
        Some(mask)
    }

    /// Rate of coincidences involving at least the instruments in `mask`.
    fn mu(&self, mask: u32, rates: &[f64]) -> f64 {
        let mut product = 1.0;
        for i in 0..self.instruments.len() {
            if mask & (1 << i) != 0 {
                product *= rates[i];
            }
        }
        if mask.count_ones() >= 2 {
            product * self.volumes[&mask]
        } else {
            product
        }
    }

    /// Rates of coincidences involving exactly each qualifying
    /// combination of the live instruments (those with λ > 0), keyed by
    /// bitmask. Inclusion–exclusion over supersets; Monte-Carlo noise can
    /// produce tiny negative values, which are clamped to zero.
    pub fn strict_rates(&self, rates_by_ifo: &HashMap<String, f64>) -> HashMap<u32, f64> {
        let n = self.instruments.len();
        let mut rates = vec![0.0; n];
        for (ifo, rate) in rates_by_ifo {
            if let Some(i) = self.index_of(ifo) {
                rates[i] = rate.max(0.0);
            }
        }
        let live_mask: u32 = (0..n)
            .filter(|i| rates[*i] > 0.0)
            .fold(0, |m, i| m | (1 << i));

        let mut out = HashMap::new();
        for combo in subsets_of(live_mask) {
            if (combo.count_ones() as usize) < self.min_instruments || combo == 0 {
                continue;
            }
            let mut strict = 0.0;
            for superset in supersets_within(combo, live_mask) {
                let sign = if (superset.count_ones() - combo.count_ones()) % 2 == 0 {
                    1.0
                } else {
                    -1.0
                };
                strict += sign * self.mu(superset, &rates);
            }
            out.insert(combo, strict.max(0.0));
        }
        out
    }

    /// Total rate of qualifying coincidences of any combination.
    pub fn total_rate(&self, rates_by_ifo: &HashMap<String, f64>) -> f64 {
        self.strict_rates(rates_by_ifo).values().sum()
    }

    /// ln P(the coincidence involves exactly `ifos` | a coincidence
    /// happened at all). `NEG_INFINITY` for combinations that cannot
    /// occur.
    pub fn ln_p_instruments<'a, I: IntoIterator<Item = &'a str>>(
        &self,
        rates_by_ifo: &HashMap<String, f64>,
        ifos: I,
    ) -> f64 {
        let Some(mask) = self.mask_of(ifos) else {
            return f64::NEG_INFINITY;
        };
        let strict = self.strict_rates(rates_by_ifo);
        let total: f64 = strict.values().sum();
        match strict.get(&mask) {
            Some(rate) if *rate > 0.0 && total > 0.0 => (rate / total).ln(),
            _ => f64::NEG_INFINITY,
        }
    }
}

/// Volume of the arrival-time polytope for the instruments in `mask`,
/// relative to the lowest-index member as anchor.
fn polytope_volume(tau: &[Vec<f64>], mask: u32, rng: &mut StdRng) -> f64 {
    let members: Vec<usize> = (0..tau.len()).filter(|i| mask & (1 << i) != 0).collect();
    let anchor = members[0];
    let others = &members[1..];
    if others.len() == 1 {
        return 2.0 * tau[anchor][others[0]];
    }

    // bounding box: each non-anchor offset in [-tau_anchor_i, tau_anchor_i]
    let box_volume: f64 = others.iter().map(|i| 2.0 * tau[anchor][*i]).product();
    let mut hits = 0u32;
    let mut x = vec![0.0; others.len()];
    for _ in 0..MC_SAMPLES {
        for (k, i) in others.iter().enumerate() {
            let t = tau[anchor][*i];
            x[k] = rng.random_range(-t..t);
        }
        let ok = (0..others.len()).all(|a| {
            ((a + 1)..others.len()).all(|b| (x[a] - x[b]).abs() <= tau[others[a]][others[b]])
        });
        if ok {
            hits += 1;
        }
    }
    box_volume * hits as f64 / MC_SAMPLES as f64
}

/// All submasks of `mask`, including `mask` itself and 0.
fn subsets_of(mask: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut sub = mask;
    loop {
        out.push(sub);
        if sub == 0 {
            break;
        }
        sub = (sub - 1) & mask;
    }
    out
}

/// All masks `T` with `combo ⊆ T ⊆ live`.
fn supersets_within(combo: u32, live: u32) -> Vec<u32> {
    subsets_of(live & !combo)
        .into_iter()
        .map(|extra| combo | extra)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_pair_rate_is_closed_form() {
        let network = NetworkConfig::hl(0.005);
        let cr = CoincRates::new(&network);
        let tau = network.pair_window("H1", "L1");
        let strict = cr.strict_rates(&rates(&[("H1", 2.0), ("L1", 3.0)]));
        let mask = cr.mask_of(["H1", "L1"]).unwrap();
        let expected = 2.0 * 3.0 * 2.0 * tau;
        assert!((strict[&mask] - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_triple_network_inclusion_exclusion() {
        let network = NetworkConfig::hlv(0.005);
        let cr = CoincRates::new(&network);
        let r = rates(&[("H1", 1.0), ("L1", 1.0), ("V1", 1.0)]);
        let strict = cr.strict_rates(&r);
        // doubles + the triple; each strict double rate is the pair rate
        // minus the triple rate
        let hl = cr.mask_of(["H1", "L1"]).unwrap();
        let hlv = cr.mask_of(["H1", "L1", "V1"]).unwrap();
        let pair_hl = 2.0 * network.pair_window("H1", "L1");
        let triple = strict[&hlv];
        assert!(triple > 0.0);
        assert!((strict[&hl] - (pair_hl - triple)).abs() < 1e-4);
        // exact-S rates are all non-negative and sum to less than the
        // sum of at-least rates
        assert!(strict.values().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_ln_p_instruments_normalized() {
        let network = NetworkConfig::hlv(0.005);
        let cr = CoincRates::new(&network);
        let r = rates(&[("H1", 1.0), ("L1", 2.0), ("V1", 0.5)]);
        let strict = cr.strict_rates(&r);
        let total: f64 = strict
            .keys()
            .map(|m| {
                let ifos: Vec<&str> = network
                    .instruments
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| m & (1 << i) != 0)
                    .map(|(_, s)| s.as_str())
                    .collect();
                cr.ln_p_instruments(&r, ifos).exp()
            })
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dead_instrument_combo_impossible() {
        let network = NetworkConfig::hlv(0.005);
        let cr = CoincRates::new(&network);
        let r = rates(&[("H1", 1.0), ("L1", 2.0), ("V1", 0.0)]);
        assert_eq!(
            cr.ln_p_instruments(&r, ["H1", "V1"]),
            f64::NEG_INFINITY
        );
        assert!(cr.ln_p_instruments(&r, ["H1", "L1"]).is_finite());
    }

    #[test]
    fn test_volumes_deterministic() {
        let network = NetworkConfig::hlv(0.005);
        let a = CoincRates::new(&network);
        let b = CoincRates::new(&network);
        let mask = a.mask_of(["H1", "L1", "V1"]).unwrap();
        assert_eq!(a.volumes[&mask], b.volumes[&mask]);
    }
}
