//! Logging initialization.
//!
//! Configured via the `GWC_LOG` environment variable (falling back to
//! `RUST_LOG`, then `info`), with either a human console format or
//! JSON lines for ingestion by log collectors.

use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "console" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" | "structured" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

fn filter() -> EnvFilter {
    if std::env::var("GWC_LOG").is_ok() {
        EnvFilter::from_env("GWC_LOG")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Idempotent: a second call (tests,
/// embedding applications) is a no-op.
pub fn init(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(filter());
    let result = match format {
        LogFormat::Human => builder.try_init(),
        LogFormat::Jsonl => builder.json().try_init(),
    };
    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}
