//! Streaming coincidence engine.
//!
//! Triggers arrive in batches, each batch accompanied by a *boundary*:
//! the front end's promise that no trigger with an earlier end time will
//! ever arrive. Boundaries must be monotone; a regression means the
//! upstream element is broken and the process must not continue.
//!
//! The engine cannot form candidates right up to the boundary, because a
//! trigger just before it may still be waiting for partners that arrive
//! later (within the coincidence window, possibly shifted by a slide
//! offset). The *completeness horizon* trails the boundary by
//!
//! ```text
//! back_off = max |slide offset| + max_dt
//! ```
//!
//! and every candidate whose earliest member lies before the horizon is
//! guaranteed to have all of its members in hand. Each pass therefore
//! reports exactly the candidates whose earliest member falls in the
//! newly completed span, then retires triggers older than the horizon.
//! A retired trigger that never joined a reported zero-lag candidate is
//! handed back as noncoincident, so every trigger is accounted for
//! exactly once.

use crate::fapfar::FapFar;
use crate::stats::CoincScorer;
use gwc_common::{Coincidence, NetworkConfig, TimeSlideId, Trigger, TriggerId};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// SNR floor for single-detector candidates. Coincidences get their
/// significance from time agreement; an isolated trigger has only its
/// own loudness, so quiet singles are never candidates.
pub const SINGLES_SNR_FLOOR: f64 = 5.0;

/// Batching and culling knobs for the engine.
#[derive(Debug, Clone)]
pub struct CoincEngineConfig {
    pub network: NetworkConfig,
    /// Minimum boundary advance, in seconds, before a coincidence pass
    /// runs; smaller advances just buffer.
    pub thinca_interval: f64,
    /// Candidates scoring below this are discarded, their members
    /// returned to the noncoincident pool.
    pub min_ln_lr: Option<f64>,
}

impl CoincEngineConfig {
    pub fn new(network: NetworkConfig) -> Self {
        CoincEngineConfig {
            network,
            thinca_interval: 50.0,
            min_ln_lr: None,
        }
    }
}

/// Output of one engine pass.
#[derive(Debug, Default)]
pub struct CoincPass {
    /// Newly completed candidates, zero-lag and background slides alike.
    pub coincs: Vec<Coincidence>,
    /// Triggers retired this pass without ever joining a reported
    /// zero-lag candidate.
    pub noncoincident: Vec<Trigger>,
}

pub struct CoincEngine {
    config: CoincEngineConfig,
    back_off: f64,
    last_boundary: f64,
    pending: Vec<Trigger>,
    /// IDs of pending triggers that joined a reported zero-lag
    /// candidate; pruned at retirement.
    zero_lag_ids: HashSet<TriggerId>,
}

impl CoincEngine {
    pub fn new(config: CoincEngineConfig) -> Self {
        let back_off = config.network.max_slide_offset() + config.network.max_dt();
        CoincEngine {
            config,
            back_off,
            last_boundary: f64::NEG_INFINITY,
            pending: Vec::new(),
            zero_lag_ids: HashSet::new(),
        }
    }

    pub fn last_boundary(&self) -> f64 {
        self.last_boundary
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed a batch of triggers ending at or before `boundary` and run a
    /// coincidence pass if the boundary has advanced far enough.
    ///
    /// # Panics
    ///
    /// Panics if `boundary` regresses, or if a trigger arrives with an
    /// end time behind the previous boundary — the boundary is the
    /// promise that no such trigger was still coming, and its partners
    /// may already have been retired. Both mean the upstream ordering
    /// contract is broken and results would be silently wrong.
    pub fn push(
        &mut self,
        triggers: Vec<Trigger>,
        boundary: f64,
        scorer: Option<&dyn CoincScorer>,
        fapfar: Option<&FapFar>,
    ) -> CoincPass {
        assert!(
            boundary >= self.last_boundary,
            "boundary regression: {boundary} < {}",
            self.last_boundary
        );
        for trigger in triggers {
            assert!(
                trigger.end.as_secs_f64() >= self.last_boundary,
                "trigger {} at {} is behind the boundary {}",
                trigger.id,
                trigger.end.as_secs_f64(),
                self.last_boundary
            );
            self.pending.push(trigger);
        }

        if boundary - self.last_boundary < self.config.thinca_interval {
            return CoincPass::default();
        }
        self.run_pass(boundary, scorer, fapfar)
    }

    /// Complete every remaining candidate and retire every pending
    /// trigger, then reset to the initial state.
    pub fn flush(
        &mut self,
        scorer: Option<&dyn CoincScorer>,
        fapfar: Option<&FapFar>,
    ) -> CoincPass {
        let pass = self.run_pass(f64::INFINITY, scorer, fapfar);
        self.last_boundary = f64::NEG_INFINITY;
        self.pending.clear();
        self.zero_lag_ids.clear();
        pass
    }

    fn run_pass(
        &mut self,
        boundary: f64,
        scorer: Option<&dyn CoincScorer>,
        fapfar: Option<&FapFar>,
    ) -> CoincPass {
        let prev_horizon = self.last_boundary - self.back_off;
        let new_horizon = if boundary == f64::INFINITY {
            f64::INFINITY
        } else {
            boundary - self.back_off
        };

        let mut pass = CoincPass::default();
        let mut seen: HashSet<BTreeSet<TriggerId>> = HashSet::new();

        for slide in 0..self.config.network.time_slides.len() {
            for members in self.cliques(slide) {
                let candidate = Coincidence::new(members, TimeSlideId(slide));
                let t0 = candidate.earliest_end().as_secs_f64();
                if t0 < prev_horizon || t0 >= new_horizon {
                    continue;
                }
                if candidate.members.len() == 1 {
                    // singles only exist at zero lag; slides shift every
                    // instrument coherently, so a slid single is the
                    // same single
                    if slide != 0
                        || self.config.network.min_instruments > 1
                        || candidate.members[0].snr < SINGLES_SNR_FLOOR
                    {
                        continue;
                    }
                } else if candidate.members.len() < self.config.network.min_instruments {
                    continue;
                }
                let ids: BTreeSet<TriggerId> =
                    candidate.members.iter().map(|m| m.id).collect();
                if !seen.insert(ids) {
                    continue;
                }
                let mut candidate = candidate;
                if let Some(scorer) = scorer {
                    let ln_lr = scorer.ln_lr(&candidate);
                    if let Some(floor) = self.config.min_ln_lr {
                        if ln_lr < floor {
                            continue;
                        }
                    }
                    candidate.ln_lr = Some(ln_lr);
                    if candidate.is_zero_lag() {
                        if let Some(map) = fapfar {
                            candidate.fap = Some(map.fap(ln_lr));
                            candidate.far = Some(map.far(ln_lr));
                        }
                    }
                }
                if candidate.is_zero_lag() {
                    for member in &candidate.members {
                        self.zero_lag_ids.insert(member.id);
                    }
                }
                pass.coincs.push(candidate);
            }
        }

        // retirement: everything behind the new horizon leaves the pool
        let mut kept = Vec::with_capacity(self.pending.len());
        for trigger in self.pending.drain(..) {
            if trigger.end.as_secs_f64() < new_horizon {
                if !self.zero_lag_ids.remove(&trigger.id) {
                    pass.noncoincident.push(trigger);
                }
            } else {
                kept.push(trigger);
            }
        }
        self.pending = kept;
        self.last_boundary = boundary;

        debug!(
            boundary,
            coincs = pass.coincs.len(),
            noncoincident = pass.noncoincident.len(),
            pending = self.pending.len(),
            "coincidence pass"
        );
        pass
    }

    /// Maximal sets of mutually coincident triggers under `slide`,
    /// including isolated triggers as singletons.
    fn cliques(&self, slide: usize) -> Vec<Vec<Trigger>> {
        let network = &self.config.network;
        let mut order: Vec<usize> = (0..self.pending.len()).collect();
        let shifted: Vec<f64> = self
            .pending
            .iter()
            .map(|t| t.end.as_secs_f64() + network.offset(slide, &t.ifo))
            .collect();
        order.sort_by(|a, b| {
            shifted[*a]
                .total_cmp(&shifted[*b])
                .then(self.pending[*a].id.cmp(&self.pending[*b].id))
        });

        let compatible = |a: usize, b: usize| -> bool {
            let (ta, tb) = (&self.pending[a], &self.pending[b]);
            ta.ifo != tb.ifo
                && (shifted[a] - shifted[b]).abs() <= network.pair_window(&ta.ifo, &tb.ifo)
        };

        let mut cliques: Vec<Vec<usize>> = Vec::new();
        let max_window = network.max_dt();
        for (k, &i) in order.iter().enumerate() {
            // neighbours later in shifted-time order
            let neighbours: Vec<usize> = order[(k + 1)..]
                .iter()
                .copied()
                .take_while(|&j| shifted[j] - shifted[i] <= max_window)
                .filter(|&j| compatible(i, j))
                .collect();
            let mut found = Vec::new();
            grow_clique(&mut vec![i], &neighbours, &compatible, &mut found);
            // keep only cliques in which i is genuinely the earliest
            // member; later anchors re-find the others
            cliques.extend(found);
        }

        // drop cliques strictly contained in another; nesting cliques
        // share members, so only time-local comparisons are needed
        let mut entries: Vec<(f64, BTreeSet<usize>)> = cliques
            .into_iter()
            .map(|c| {
                let t = c.iter().map(|&i| shifted[i]).fold(f64::INFINITY, f64::min);
                (t, c.into_iter().collect())
            })
            .collect();
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut out = Vec::new();
        for n in 0..entries.len() {
            let (t, ref set) = entries[n];
            let mut lo = n;
            while lo > 0 && entries[lo - 1].0 >= t - max_window {
                lo -= 1;
            }
            let contained = (lo..entries.len())
                .take_while(|&m| entries[m].0 <= t + max_window)
                .any(|m| m != n && set != &entries[m].1 && set.is_subset(&entries[m].1));
            if !contained {
                out.push(set.iter().map(|&i| self.pending[i].clone()).collect());
            }
        }
        out
    }
}

/// Depth-first enumeration of maximal cliques extending `current` with
/// members of `candidates` (all already compatible with `current`).
fn grow_clique(
    current: &mut Vec<usize>,
    candidates: &[usize],
    compatible: &dyn Fn(usize, usize) -> bool,
    found: &mut Vec<Vec<usize>>,
) {
    if candidates.is_empty() {
        found.push(current.clone());
        return;
    }
    let mut extended = false;
    for (k, &next) in candidates.iter().enumerate() {
        let remaining: Vec<usize> = candidates[(k + 1)..]
            .iter()
            .copied()
            .filter(|&j| compatible(next, j))
            .collect();
        current.push(next);
        grow_clique(current, &remaining, compatible, found);
        current.pop();
        extended = true;
    }
    if !extended {
        found.push(current.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwc_common::GpsTime;
    use std::collections::HashMap;

    struct FixedScorer(f64);

    impl CoincScorer for FixedScorer {
        fn ln_lr(&self, _: &Coincidence) -> f64 {
            self.0
        }
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

    fn engine(network: NetworkConfig) -> CoincEngine {
        let mut config = CoincEngineConfig::new(network);
        config.thinca_interval = 50.0;
        CoincEngine::new(config)
    }

    #[test]
    fn test_pair_within_window_coincides() {
        let mut engine = engine(NetworkConfig::hl(0.005));
        let pass = engine.push(
            vec![trigger(1, "H1", 100.0, 8.0), trigger(2, "L1", 100.01, 8.0)],
            200.0,
            None,
            None,
        );
        assert_eq!(pass.coincs.len(), 1);
        assert_eq!(pass.coincs[0].members.len(), 2);
        assert!(pass.noncoincident.is_empty());
        // nothing is reported twice
        let pass = engine.flush(None, None);
        assert!(pass.coincs.is_empty());
        assert!(pass.noncoincident.is_empty());
    }

    #[test]
    fn test_pair_outside_window_stays_single() {
        let mut engine = engine(NetworkConfig::hl(0.005));
        let pass = engine.push(
            vec![trigger(1, "H1", 100.0, 8.0), trigger(2, "L1", 100.5, 8.0)],
            200.0,
            None,
            None,
        );
        assert!(pass.coincs.is_empty());
        assert_eq!(pass.noncoincident.len(), 2);
    }

    #[test]
    fn test_every_trigger_accounted_once() {
        let mut engine = engine(NetworkConfig::hl(0.005));
        let mut all_ids = HashSet::new();
        let mut emitted: Vec<TriggerId> = Vec::new();
        let mut id = 0u64;
        for k in 0..40 {
            let t = 100.0 + 10.0 * k as f64;
            let mut batch = vec![trigger(id, "H1", t, 8.0)];
            all_ids.insert(TriggerId(id));
            id += 1;
            if k % 3 == 0 {
                batch.push(trigger(id, "L1", t + 0.004, 8.0));
                all_ids.insert(TriggerId(id));
                id += 1;
            }
            let pass = engine.push(batch, t + 5.0, None, None);
            for c in &pass.coincs {
                emitted.extend(c.members.iter().map(|m| m.id));
            }
            emitted.extend(pass.noncoincident.iter().map(|t| t.id));
        }
        let pass = engine.flush(None, None);
        for c in &pass.coincs {
            emitted.extend(c.members.iter().map(|m| m.id));
        }
        emitted.extend(pass.noncoincident.iter().map(|t| t.id));

        let unique: HashSet<TriggerId> = emitted.iter().copied().collect();
        assert_eq!(unique.len(), emitted.len(), "a trigger was emitted twice");
        assert_eq!(unique, all_ids, "a trigger was lost");
    }

    #[test]
    #[should_panic(expected = "boundary regression")]
    fn test_boundary_regression_panics() {
        let mut engine = engine(NetworkConfig::hl(0.005));
        engine.push(vec![], 200.0, None, None);
        engine.push(vec![], 100.0, None, None);
    }

    #[test]
    #[should_panic(expected = "behind the boundary")]
    fn test_stale_trigger_panics() {
        let mut engine = engine(NetworkConfig::hl(0.005));
        engine.push(vec![], 1000.0, None, None);
        engine.push(vec![trigger(1, "H1", 100.0, 8.0)], 1100.0, None, None);
    }

    #[test]
    #[should_panic(expected = "behind the boundary")]
    fn test_trigger_just_behind_boundary_panics() {
        // a late arrival inside the back-off window is still a contract
        // violation: its partner may already have been retired
        let mut engine = engine(NetworkConfig::hl(0.005));
        engine.push(vec![trigger(1, "H1", 999.95, 8.0)], 1000.0, None, None);
        engine.push(vec![trigger(2, "L1", 999.96, 8.0)], 1100.0, None, None);
    }

    #[test]
    fn test_small_advances_buffer() {
        let mut engine = engine(NetworkConfig::hl(0.005));
        engine.push(vec![], 100.0, None, None);
        engine.push(vec![trigger(1, "H1", 100.0, 8.0)], 101.0, None, None);
        let pass = engine.push(vec![trigger(2, "L1", 100.004, 8.0)], 102.0, None, None);
        assert!(pass.coincs.is_empty());
        assert_eq!(engine.pending_len(), 2);
        // triggers split across buffered batches still coincide
        let pass = engine.flush(None, None);
        assert_eq!(pass.coincs.len(), 1);
    }

    #[test]
    fn test_slide_coincs_marked_and_members_still_single() {
        let mut network = NetworkConfig::hl(0.005);
        network
            .time_slides
            .push(HashMap::from([("L1".to_string(), -5.0)]));
        let mut engine = engine(network);
        // coincident only under the -5 s slide
        let pass = engine.push(
            vec![trigger(1, "H1", 100.0, 8.0), trigger(2, "L1", 105.002, 8.0)],
            200.0,
            None,
            None,
        );
        assert_eq!(pass.coincs.len(), 1);
        assert!(!pass.coincs[0].is_zero_lag());
        // background membership does not consume the triggers
        assert_eq!(pass.noncoincident.len(), 2);
    }

    #[test]
    fn test_min_ln_lr_culls_and_releases_members() {
        let mut config = CoincEngineConfig::new(NetworkConfig::hl(0.005));
        config.min_ln_lr = Some(0.0);
        let mut engine = CoincEngine::new(config);
        let scorer = FixedScorer(-5.0);
        let pass = engine.push(
            vec![trigger(1, "H1", 100.0, 8.0), trigger(2, "L1", 100.004, 8.0)],
            200.0,
            Some(&scorer),
            None,
        );
        assert!(pass.coincs.is_empty());
        assert_eq!(pass.noncoincident.len(), 2);
    }

    #[test]
    fn test_singles_need_min_instruments_one_and_snr_floor() {
        let mut network = NetworkConfig::hl(0.005);
        network.min_instruments = 1;
        let mut engine = engine(network);
        let pass = engine.push(
            vec![trigger(1, "H1", 100.0, 8.0), trigger(2, "H1", 150.0, 4.0)],
            300.0,
            None,
            None,
        );
        // the loud single is a candidate, the quiet one is not
        assert_eq!(pass.coincs.len(), 1);
        assert_eq!(pass.coincs[0].members[0].id, TriggerId(1));
        assert_eq!(pass.noncoincident.len(), 1);
        assert_eq!(pass.noncoincident[0].id, TriggerId(2));
    }

    #[test]
    fn test_triple_is_one_clique_not_three_pairs() {
        let mut network = NetworkConfig::hlv(0.005);
        network.min_instruments = 2;
        let mut engine = engine(network);
        let pass = engine.push(
            vec![
                trigger(1, "H1", 100.0, 8.0),
                trigger(2, "L1", 100.004, 8.0),
                trigger(3, "V1", 100.008, 8.0),
            ],
            200.0,
            None,
            None,
        );
        assert_eq!(pass.coincs.len(), 1);
        assert_eq!(pass.coincs[0].members.len(), 3);
    }

    #[test]
    fn test_zero_lag_gets_fap_far() {
        use crate::fapfar::{FapFar, RankingStatPdf};
        let mut pdf = RankingStatPdf::new();
        for k in 0..1000 {
            pdf.count_noise(-5.0 + 0.01 * k as f64, 1.0);
        }
        pdf.count_zero_lag(2.0);
        let map = FapFar::new(&pdf, 1e6).unwrap();

        let mut engine = engine(NetworkConfig::hl(0.005));
        let scorer = FixedScorer(3.0);
        let pass = engine.push(
            vec![trigger(1, "H1", 100.0, 8.0), trigger(2, "L1", 100.004, 8.0)],
            200.0,
            Some(&scorer),
            Some(&map),
        );
        assert_eq!(pass.coincs.len(), 1);
        assert_eq!(pass.coincs[0].ln_lr, Some(3.0));
        assert!(pass.coincs[0].fap.is_some());
        assert!(pass.coincs[0].far.is_some());
    }

    #[test]
    fn test_flush_resets_state() {
        let mut engine = engine(NetworkConfig::hl(0.005));
        engine.push(vec![trigger(1, "H1", 100.0, 8.0)], 200.0, None, None);
        engine.flush(None, None);
        assert_eq!(engine.pending_len(), 0);
        assert_eq!(engine.last_boundary(), f64::NEG_INFINITY);
        // after a flush the stream may restart from any time
        engine.push(vec![trigger(2, "H1", 10.0, 8.0)], 60.0, None, None);
    }
}
