//! Shared types for the streaming coincidence pipeline.
//!
//! Everything in this crate is pure data: timestamps, livetime segments,
//! trigger and coincidence records, the detector-network configuration,
//! and the workspace error type. No algorithm code lives here.

pub mod config;
pub mod error;
pub mod event;
pub mod segments;
pub mod time;

pub use config::NetworkConfig;
pub use error::{Error, Result};
pub use event::{Coincidence, TimeSlideId, Trigger, TriggerId, TriggerIdGenerator};
pub use segments::{Segment, SegmentList};
pub use time::GpsTime;
