//! Streaming gravitational-wave candidate detection.
//!
//! The crate is organized around the flow of a trigger through the
//! online analysis:
//!
//! * [`coinc`]: the streaming coincidence engine that groups
//!   single-detector triggers into candidates as data-completeness
//!   boundaries advance;
//! * [`stats`]: the likelihood-ratio ranking statistic, built from
//!   per-detector noise densities, a shared signal density, trigger-rate
//!   combinatorics, and horizon-distance histories;
//! * [`fapfar`]: background accumulation and the mapping from ln L to
//!   false-alarm probability and rate;
//! * [`publish`]: the pipeline driver tying the above together behind a
//!   single lock, plus alert delivery with retries;
//! * [`persist`]: checkpointing of raw (never smoothed) statistics;
//! * [`rates`], [`horizon`]: the live per-detector histories the
//!   statistic evaluates against;
//! * [`diag`], [`logging`]: observability.

pub mod coinc;
pub mod diag;
pub mod fapfar;
pub mod horizon;
pub mod logging;
pub mod persist;
pub mod publish;
pub mod rates;
pub mod stats;

pub use coinc::{CoincEngine, CoincEngineConfig, CoincPass};
pub use fapfar::{FapFar, RankingStatPdf};
pub use horizon::{HorizonHistories, HorizonHistory};
pub use publish::{
    AlertClient, Batch, CandidatePayload, HorizonReport, IncomingTrigger, OutboundAlert,
    Pipeline, PipelineConfig, RetryPolicy, SpanReport,
};
pub use rates::{RateBin, RateBinList, TriggerRates};
pub use stats::{
    CoincRates, CoincScorer, DensityParams, LnNoiseDensity, LnSignalDensity, RankingStat,
    RankingStatVariant,
};
