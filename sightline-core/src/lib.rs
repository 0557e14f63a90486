//! # Sightline Core Library
//!
//! Engine-agnostic entity sighting tracker. A host feeds it raw samples on a
//! tick; the core decides which sightings to admit and keeps two views of
//! them:
//!
//! - **Cache**: the latest sighting per entity, bounded by a TTL and a
//!   maximum size, queryable by distance with sorting and filtering
//! - **Stats**: long-lived per-entity aggregates (sessions, online time,
//!   appearance history) persisted to JSON with rotation, backups and export
//!
//! ```text
//! host tick ──▶ Detector ──┬──▶ ObservationCache ──▶ query / filter
//!                          └──▶ StatsStore ──▶ AutoSaver ──▶ player_stats.json
//! ```
//!
//! All components share one [`TrackerContext`] (clock and counters) built by
//! the application root.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod autosave;
pub mod cache;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod source;
pub mod stats;
pub mod types;

pub use autosave::AutoSaver;
pub use cache::{CacheStats, ObservationCache};
pub use config::SightlineConfig;
pub use context::{Clock, ManualClock, SystemClock, TrackerContext};
pub use detector::{DetectionReport, Detector, Rejection};
pub use error::{Result, SightlineError};
pub use source::{CandidateSample, EntitySource, ObserverSample, ZoneResolver};
pub use stats::{AggregateStats, ExportFormat, StatsStore};
pub use types::*;
