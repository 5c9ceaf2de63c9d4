//! The online pipeline: ingestion, scoring, clustering, alerting.
//!
//! All mutable state lives behind one mutex, taken once per batch and
//! released before any alert leaves the process. The alert service is
//! slow and fallible; holding the pipeline lock across a submission
//! would stall ingestion, so payloads are collected under the lock and
//! delivered after it drops, with jittered exponential backoff and a
//! bounded attempt count. An alert that exhausts its attempts is
//! abandoned with a warning; candidate processing never blocks on it.
//!
//! Scoring uses a *spliced* statistic: surfaces snapshotted from the
//! training collector and smoothed, evaluating against the collector's
//! live rate and horizon histories. The splice is refreshed on a timer
//! so scoring tracks the detectors without re-smoothing every batch.

use crate::coinc::{CoincEngine, CoincEngineConfig, CoincPass};
use crate::diag::{CandidateRecord, DiagnosticSnapshot, Diagnostics};
use crate::fapfar::{FapFar, RankingStatPdf};
use crate::stats::{CoincScorer, DensityParams, RankingStat};
use gwc_common::segments::n_live_at;
use gwc_common::{
    Coincidence, Error, GpsTime, Result, Segment, SegmentList, Trigger, TriggerIdGenerator,
};
use rand::Rng;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Noise-surface counts below which scoring falls back to the analytic
/// (dataless) statistic.
const MIN_TRAINING_COUNTS: f64 = 1000.0;

/// Zero-lag candidates closer than this, in seconds, are clustered and
/// only the best survives.
const CLUSTER_WINDOW: f64 = 0.1;

/// A trigger as delivered by the matched-filter front end, before the
/// pipeline assigns it an ID.
#[derive(Debug, Clone)]
pub struct IncomingTrigger {
    pub ifo: String,
    pub end: GpsTime,
    pub snr: f64,
    pub chisq: f64,
    pub chisq_dof: u32,
    pub template_id: u64,
    pub aux: Option<Vec<u8>>,
}

/// One analyzed stretch of one detector's data stream.
#[derive(Debug, Clone)]
pub struct SpanReport {
    pub ifo: String,
    pub segment: Segment,
    pub n_triggers: f64,
    /// Gap buffers mark time the detector produced no analyzable data;
    /// they contribute neither livetime nor rate.
    pub gap: bool,
}

#[derive(Debug, Clone)]
pub struct HorizonReport {
    pub ifo: String,
    pub t: f64,
    pub distance: f64,
}

/// One front-end delivery: triggers, stream accounting, and the promise
/// that nothing earlier than `boundary` is still coming.
#[derive(Debug, Clone)]
pub struct Batch {
    pub boundary: f64,
    pub triggers: Vec<IncomingTrigger>,
    pub spans: Vec<SpanReport>,
    pub horizons: Vec<HorizonReport>,
}

impl Default for Batch {
    fn default() -> Self {
        Batch {
            boundary: f64::NEG_INFINITY,
            triggers: Vec::new(),
            spans: Vec::new(),
            horizons: Vec::new(),
        }
    }
}

/// What gets sent to the alert service for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePayload {
    pub time: f64,
    pub ifos: Vec<String>,
    pub snrs: Vec<f64>,
    pub ln_lr: f64,
    pub fap: f64,
    pub far: f64,
}

impl CandidatePayload {
    fn from_coinc(coinc: &Coincidence) -> Option<Self> {
        Some(CandidatePayload {
            time: coinc.earliest_end().as_secs_f64(),
            ifos: coinc.members.iter().map(|m| m.ifo.clone()).collect(),
            snrs: coinc.members.iter().map(|m| m.snr).collect(),
            ln_lr: coinc.ln_lr?,
            fap: coinc.fap?,
            far: coinc.far?,
        })
    }
}

/// One outbound alert: the candidate payload plus the member auxiliary
/// blobs (SNR snippets) to attach once the service has assigned an ID.
#[derive(Debug, Clone)]
pub struct OutboundAlert {
    pub payload: CandidatePayload,
    pub aux: Vec<(String, Vec<u8>)>,
}

/// Seam to the external alert service.
pub trait AlertClient {
    /// Submit a candidate; returns the service-assigned candidate ID.
    fn submit(&self, payload: &CandidatePayload) -> std::result::Result<String, String>;

    /// Attach a named auxiliary blob to a previously submitted candidate.
    fn upload_aux(
        &self,
        candidate_id: &str,
        name: &str,
        data: &[u8],
    ) -> std::result::Result<(), String>;
}

/// Bounded retries with jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random::<f64>() + 0.5;
        self.base_delay
            .mul_f64(2f64.powi(attempt as i32) * jitter)
    }
}

/// Deliver one payload, retrying per `policy`. Returns the assigned
/// candidate ID. Never called under the pipeline lock.
pub fn submit_with_retry<C: AlertClient>(
    client: &C,
    payload: &CandidatePayload,
    policy: &RetryPolicy,
) -> Result<String> {
    let mut last_error = String::new();
    for attempt in 0..policy.attempts {
        match client.submit(payload) {
            Ok(id) => return Ok(id),
            Err(error) => {
                warn!(attempt, %error, time = payload.time, "alert submission failed");
                last_error = error;
            }
        }
        if attempt + 1 < policy.attempts {
            std::thread::sleep(policy.delay(attempt));
        }
    }
    Err(Error::AlertAbandoned {
        attempts: policy.attempts,
        last_error,
    })
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub params: DensityParams,
    pub thinca_interval: f64,
    pub min_ln_lr: Option<f64>,
    /// Candidates with FAR at or below this (Hz) are alerted.
    pub far_threshold: f64,
    /// Boundary advance between splice refreshes, seconds.
    pub splice_interval: f64,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn new(params: DensityParams) -> Self {
        PipelineConfig {
            params,
            thinca_interval: 50.0,
            min_ln_lr: None,
            far_threshold: 1.0 / 3600.0,
            splice_interval: 600.0,
            retry: RetryPolicy::default(),
        }
    }
}

struct PipelineState {
    config: PipelineConfig,
    engine: CoincEngine,
    /// Trained online; the only statistic that accumulates data.
    collector: RankingStat,
    /// Finished splice of the collector, refreshed periodically.
    scorer: Option<RankingStat>,
    fapfar: Option<FapFar>,
    pdf: RankingStatPdf,
    ids: TriggerIdGenerator,
    diagnostics: Diagnostics,
    last_splice: f64,
}

pub struct Pipeline<C: AlertClient> {
    state: Mutex<PipelineState>,
    client: C,
}

impl<C: AlertClient> Pipeline<C> {
    pub fn new(config: PipelineConfig, client: C) -> Self {
        let mut engine_config = CoincEngineConfig::new(config.params.network.clone());
        engine_config.thinca_interval = config.thinca_interval;
        engine_config.min_ln_lr = config.min_ln_lr;
        let collector = RankingStat::new(config.params.clone());
        Pipeline {
            state: Mutex::new(PipelineState {
                engine: CoincEngine::new(engine_config),
                collector,
                scorer: None,
                fapfar: None,
                pdf: RankingStatPdf::new(),
                ids: TriggerIdGenerator::new(),
                diagnostics: Diagnostics::new(),
                last_splice: f64::NEG_INFINITY,
                config,
            }),
            client,
        }
    }

    /// Process one batch. Returns the zero-lag candidates that survived
    /// clustering, already scored and FAR-assigned where possible.
    pub fn ingest(&self, batch: Batch) -> Result<Vec<Coincidence>> {
        let (candidates, payloads) = {
            let mut state = self.state.lock().expect("pipeline lock poisoned");
            state.ingest_locked(batch)?
        };
        self.deliver(payloads);
        Ok(candidates)
    }

    /// Complete all pending work at end of stream.
    pub fn flush(&self) -> Result<Vec<Coincidence>> {
        let (candidates, payloads) = {
            let mut state = self.state.lock().expect("pipeline lock poisoned");
            state.flush_locked()?
        };
        self.deliver(payloads);
        Ok(candidates)
    }

    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.state
            .lock()
            .expect("pipeline lock poisoned")
            .diagnostics
            .snapshot()
    }

    /// Checkpoint the training collector.
    pub fn checkpoint(&self, path: &std::path::Path) -> Result<()> {
        let state = self.state.lock().expect("pipeline lock poisoned");
        crate::persist::save_ranking_stat(path, &state.collector)
    }

    fn deliver(&self, alerts: Vec<OutboundAlert>) {
        for alert in alerts {
            let policy = {
                let state = self.state.lock().expect("pipeline lock poisoned");
                state.config.retry.clone()
            };
            let delivered = match submit_with_retry(&self.client, &alert.payload, &policy) {
                Ok(id) => {
                    // aux blobs are best effort: the alert itself is out
                    for (name, data) in &alert.aux {
                        if let Err(error) = self.client.upload_aux(&id, name, data) {
                            warn!(%error, candidate = %id, name, "aux upload failed");
                        }
                    }
                    true
                }
                Err(error) => {
                    warn!(%error, time = alert.payload.time, "alert abandoned");
                    false
                }
            };
            self.state
                .lock()
                .expect("pipeline lock poisoned")
                .diagnostics
                .record_alert(delivered);
        }
    }
}

impl PipelineState {
    fn ingest_locked(
        &mut self,
        batch: Batch,
    ) -> Result<(Vec<Coincidence>, Vec<OutboundAlert>)> {
        self.diagnostics.record_ingest(batch.triggers.len());

        for span in &batch.spans {
            if !span.gap {
                self.collector
                    .add_ratebin(&span.ifo, span.segment, span.n_triggers)?;
            }
        }
        for horizon in &batch.horizons {
            self.collector
                .set_horizon(&horizon.ifo, horizon.t, horizon.distance)?;
        }

        if self.scorer.is_none()
            || batch.boundary - self.last_splice >= self.config.splice_interval
        {
            self.refresh_splice(batch.boundary)?;
        }

        let triggers: Vec<Trigger> = batch
            .triggers
            .into_iter()
            .map(|t| Trigger {
                id: self.ids.next_id(),
                ifo: t.ifo,
                end: t.end,
                snr: t.snr,
                chisq: t.chisq,
                chisq_dof: t.chisq_dof,
                template_id: t.template_id,
                aux: t.aux,
            })
            .collect();

        let scorer = self.scorer.as_ref().map(|s| s as &dyn CoincScorer);
        let pass = self
            .engine
            .push(triggers, batch.boundary, scorer, self.fapfar.as_ref());
        self.settle_pass(pass, batch.boundary)
    }

    fn flush_locked(&mut self) -> Result<(Vec<Coincidence>, Vec<OutboundAlert>)> {
        let boundary = self.engine.last_boundary();
        let scorer = self.scorer.as_ref().map(|s| s as &dyn CoincScorer);
        let pass = self.engine.flush(scorer, self.fapfar.as_ref());
        self.settle_pass(pass, boundary)
    }

    /// Background accounting, clustering, zero-lag bookkeeping, and
    /// alert selection for one engine pass.
    fn settle_pass(
        &mut self,
        pass: CoincPass,
        boundary: f64,
    ) -> Result<(Vec<Coincidence>, Vec<OutboundAlert>)> {
        let CoincPass {
            coincs,
            noncoincident,
        } = pass;

        // retired noncoincident triggers train the noise model and are
        // final: they will never appear in a candidate. The model
        // describes coincidence background, and single-detector time
        // cannot produce one, so a trigger trains only if at least two
        // detectors were live at its end time (more when the network
        // demands more).
        self.diagnostics.record_singles(noncoincident.len());
        let live: Vec<SegmentList> = {
            let rates = self.collector.denominator.rates_snapshot();
            rates.segment_lists().into_values().collect()
        };
        let live_refs: Vec<&SegmentList> = live.iter().collect();
        let needed = self.config.params.min_instruments().max(2);
        for trigger in &noncoincident {
            if n_live_at(&live_refs, trigger.end.as_secs_f64()) >= needed {
                self.collector.increment_noise(trigger)?;
            }
        }

        let (zero_lag, background): (Vec<_>, Vec<_>) =
            coincs.into_iter().partition(Coincidence::is_zero_lag);

        // background candidates feed the ln L histogram's noise channel
        for coinc in &background {
            if let Some(ln_lr) = coinc.ln_lr {
                self.pdf.count_noise(ln_lr, 1.0);
            }
        }

        let mut survivors = cluster_zero_lag(zero_lag);
        let mut alerts = Vec::new();
        for coinc in &mut survivors {
            self.collector.increment_zerolag(coinc)?;
            if let Some(ln_lr) = coinc.ln_lr {
                self.pdf.count_zero_lag(ln_lr);
            }
            let time = coinc.earliest_end().as_secs_f64();
            self.diagnostics.record_candidate(
                CandidateRecord {
                    time,
                    ln_lr: coinc.ln_lr,
                    far: coinc.far,
                },
                boundary - time,
            );
            if let (Some(far), Some(payload)) =
                (coinc.far, CandidatePayload::from_coinc(coinc))
            {
                if far <= self.config.far_threshold {
                    info!(
                        time,
                        far,
                        ln_lr = payload.ln_lr,
                        ifos = ?payload.ifos,
                        "candidate passes alert threshold"
                    );
                    let aux = coinc
                        .members
                        .iter()
                        .filter_map(|m| {
                            m.aux
                                .as_ref()
                                .map(|data| (format!("snr-series-{}", m.ifo), data.clone()))
                        })
                        .collect();
                    alerts.push(OutboundAlert { payload, aux });
                }
            }
            // blobs exist for publishing; once the alert decision is
            // made they are stale
            for member in &mut coinc.members {
                member.drop_aux();
            }
        }
        Ok((survivors, alerts))
    }

    /// Rebuild the scoring splice and the false-alarm map from the
    /// current training state.
    fn refresh_splice(&mut self, boundary: f64) -> Result<()> {
        let trained_counts: f64 = self
            .collector
            .denominator
            .surfaces()
            .densities()
            .map(|(_, pdf)| pdf.total())
            .sum();

        let scorer = if trained_counts < MIN_TRAINING_COUNTS {
            RankingStat::dataless(self.config.params.clone())?
        } else {
            let mut snapshot = self.collector.clone();
            snapshot.seed_models(1.0)?;
            snapshot.finish()?;
            RankingStat::spliced(snapshot, &self.collector)?
        };
        self.scorer = Some(scorer);
        self.last_splice = boundary;

        let livetime = self
            .collector
            .denominator
            .rates_snapshot()
            .livetime_with_min_instruments(self.config.params.min_instruments());
        self.fapfar = match FapFar::new(&self.pdf.with_extinction(), livetime) {
            Ok(map) => Some(map),
            Err(error) => {
                // nothing to calibrate against yet
                info!(%error, "false-alarm map not yet available");
                None
            }
        };
        info!(
            boundary,
            trained_counts,
            fapfar = self.fapfar.is_some(),
            "scoring statistic respliced"
        );
        Ok(())
    }
}

/// Keep the best of each cluster of zero-lag candidates closer than
/// [`CLUSTER_WINDOW`]. Best means highest ln L, ties broken by latest
/// end time, then highest trigger ID.
fn cluster_zero_lag(mut candidates: Vec<Coincidence>) -> Vec<Coincidence> {
    candidates.sort_by(|a, b| a.earliest_end().cmp(&b.earliest_end()));
    let mut out: Vec<Coincidence> = Vec::new();
    for candidate in candidates {
        match out.last_mut() {
            Some(last)
                if (candidate.earliest_end() - last.earliest_end()).abs() < CLUSTER_WINDOW =>
            {
                if better(&candidate, last) {
                    *last = candidate;
                }
            }
            _ => out.push(candidate),
        }
    }
    out
}

fn better(a: &Coincidence, b: &Coincidence) -> bool {
    let la = a.ln_lr.unwrap_or(f64::NEG_INFINITY);
    let lb = b.ln_lr.unwrap_or(f64::NEG_INFINITY);
    if la != lb {
        return la > lb;
    }
    if a.latest_end() != b.latest_end() {
        return a.latest_end() > b.latest_end();
    }
    a.max_trigger_id() > b.max_trigger_id()
}
