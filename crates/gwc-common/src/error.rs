//! Error types for the coincidence pipeline.
//!
//! The error taxonomy follows the pipeline's failure model:
//!
//! - contract violations (re-training a finished density, merging
//!   incompatible statistics, wrong-template triggers) are `Error` values
//!   that callers must treat as fatal;
//! - numerical edge cases (zero sensitivity, too few detectors) are *not*
//!   errors — the scoring pipeline carries them as `f64::NEG_INFINITY`;
//! - out-of-order triggers and boundaries panic at the assertion site,
//!   because they indicate upstream corruption that must not propagate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Statistics-object usage contract violations.
    Contract,
    /// Network / detector configuration errors.
    Config,
    /// Statistics persistence (load/store) errors.
    Persist,
    /// External alert-service errors.
    Alert,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Contract => write!(f, "contract"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Persist => write!(f, "persist"),
            ErrorCategory::Alert => write!(f, "alert"),
        }
    }
}

/// Errors surfaced by the coincidence pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// A density that has had the kernel-smoothing transform applied was
    /// asked to mutate or serialize. Smoothed surfaces must never be
    /// mistaken for raw counts.
    #[error("density already finished: {0}")]
    Finished(&'static str),

    /// Two statistics objects with mismatched parameters were asked to
    /// merge. Merging is addition of raw counts and is only meaningful
    /// when both sides describe the same analysis.
    #[error("incompatible statistics objects: {0}")]
    Incompatible(String),

    /// A trigger from a template outside the configured template set was
    /// offered as training data.
    #[error("trigger from template {template_id} not in the configured template set")]
    WrongTemplate { template_id: u64 },

    /// Invalid network / engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Statistics blob format-version mismatch.
    #[error("unsupported statistics blob version {found} (expected {expected})")]
    BlobVersion { found: u32, expected: u32 },

    /// A finished (smoothed) statistics blob was offered as raw training
    /// input.
    #[error("refusing to load a finished statistics blob as training input")]
    FinishedBlobAsInput,

    /// Alert submission failed after all retry attempts.
    #[error("alert submission abandoned after {attempts} attempts: {last_error}")]
    AlertAbandoned { attempts: u32, last_error: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl Error {
    /// Category for grouping and log routing.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Finished(_)
            | Error::Incompatible(_)
            | Error::WrongTemplate { .. } => ErrorCategory::Contract,
            Error::Config(_) => ErrorCategory::Config,
            Error::BlobVersion { .. }
            | Error::FinishedBlobAsInput
            | Error::Io(_)
            | Error::Serialize(_) => ErrorCategory::Persist,
            Error::AlertAbandoned { .. } => ErrorCategory::Alert,
        }
    }

    /// Whether retrying the same operation can ever succeed.
    ///
    /// Contract violations are logic bugs upstream; retrying them is
    /// never correct.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Error::AlertAbandoned { .. } | Error::Io(_)
        )
    }
}
