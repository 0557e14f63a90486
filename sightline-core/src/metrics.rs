//! Runtime counters and tracing span names.
//!
//! Counters are lock-free `AtomicU64`s incremented on the hot path and read
//! on export. A [`CounterSnapshot`] renders to Prometheus text for server
//! dashboards.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::detector::Rejection;

// ---------------------------------------------------------------------------
// Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for high-frequency events.
pub struct TrackerCounters {
    /// Detections admitted into the cache and stats store.
    pub detections_accepted: AtomicU64,
    /// Candidates rejected by the name validity filter.
    pub rejected_invalid_name: AtomicU64,
    /// Candidates rejected for being beyond detection range.
    pub rejected_out_of_range: AtomicU64,
    /// Candidates rejected by the field-of-view filter.
    pub rejected_outside_fov: AtomicU64,
    /// Candidates rejected by the per-entity rate limit.
    pub rejected_rate_limited: AtomicU64,
    /// Cache entries removed by the TTL sweep.
    pub cache_expired: AtomicU64,
    /// Cache entries removed by the size bound.
    pub cache_evicted: AtomicU64,
    /// Save operations completed.
    pub saves_completed: AtomicU64,
    /// Save operations that failed.
    pub saves_failed: AtomicU64,
    /// Backups written.
    pub backups_created: AtomicU64,
    /// Size-triggered rotations.
    pub rotations: AtomicU64,
    /// Export files written.
    pub exports_written: AtomicU64,
}

impl TrackerCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            detections_accepted: AtomicU64::new(0),
            rejected_invalid_name: AtomicU64::new(0),
            rejected_out_of_range: AtomicU64::new(0),
            rejected_outside_fov: AtomicU64::new(0),
            rejected_rate_limited: AtomicU64::new(0),
            cache_expired: AtomicU64::new(0),
            cache_evicted: AtomicU64::new(0),
            saves_completed: AtomicU64::new(0),
            saves_failed: AtomicU64::new(0),
            backups_created: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            exports_written: AtomicU64::new(0),
        }
    }

    /// Count one rejected candidate.
    pub fn record_rejection(&self, reason: Rejection) {
        let counter = match reason {
            Rejection::InvalidName => &self.rejected_invalid_name,
            Rejection::OutOfRange => &self.rejected_out_of_range,
            Rejection::OutsideFov => &self.rejected_outside_fov,
            Rejection::RateLimited => &self.rejected_rate_limited,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            detections_accepted: self.detections_accepted.load(Ordering::Relaxed),
            rejected: [
                self.rejected_invalid_name.load(Ordering::Relaxed),
                self.rejected_out_of_range.load(Ordering::Relaxed),
                self.rejected_outside_fov.load(Ordering::Relaxed),
                self.rejected_rate_limited.load(Ordering::Relaxed),
            ],
            cache_expired: self.cache_expired.load(Ordering::Relaxed),
            cache_evicted: self.cache_evicted.load(Ordering::Relaxed),
            saves_completed: self.saves_completed.load(Ordering::Relaxed),
            saves_failed: self.saves_failed.load(Ordering::Relaxed),
            backups_created: self.backups_created.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            exports_written: self.exports_written.load(Ordering::Relaxed),
        }
    }
}

impl Default for TrackerCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Admitted detections.
    pub detections_accepted: u64,
    /// Rejections by reason [invalid name, out of range, outside FOV, rate limited].
    pub rejected: [u64; 4],
    /// TTL sweep removals.
    pub cache_expired: u64,
    /// Size bound removals.
    pub cache_evicted: u64,
    /// Completed saves.
    pub saves_completed: u64,
    /// Failed saves.
    pub saves_failed: u64,
    /// Backups written.
    pub backups_created: u64,
    /// Rotations performed.
    pub rotations: u64,
    /// Exports written.
    pub exports_written: u64,
}

impl CounterSnapshot {
    /// Total rejections across all reasons.
    #[must_use]
    pub fn total_rejected(&self) -> u64 {
        self.rejected.iter().sum()
    }

    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP sightline_detections_accepted_total Detections admitted\n\
             # TYPE sightline_detections_accepted_total counter\n\
             sightline_detections_accepted_total {}\n\
             # HELP sightline_detections_rejected_total Candidates rejected by reason\n\
             # TYPE sightline_detections_rejected_total counter\n\
             sightline_detections_rejected_total{{reason=\"invalid_name\"}} {}\n\
             sightline_detections_rejected_total{{reason=\"out_of_range\"}} {}\n\
             sightline_detections_rejected_total{{reason=\"outside_fov\"}} {}\n\
             sightline_detections_rejected_total{{reason=\"rate_limited\"}} {}\n\
             # HELP sightline_cache_removed_total Cache entries removed by cleanup\n\
             # TYPE sightline_cache_removed_total counter\n\
             sightline_cache_removed_total{{cause=\"ttl\"}} {}\n\
             sightline_cache_removed_total{{cause=\"size\"}} {}\n\
             # HELP sightline_saves_total Stats save attempts by result\n\
             # TYPE sightline_saves_total counter\n\
             sightline_saves_total{{result=\"ok\"}} {}\n\
             sightline_saves_total{{result=\"error\"}} {}\n\
             # HELP sightline_backups_created_total Backups written\n\
             # TYPE sightline_backups_created_total counter\n\
             sightline_backups_created_total {}\n\
             # HELP sightline_rotations_total Size-triggered rotations\n\
             # TYPE sightline_rotations_total counter\n\
             sightline_rotations_total {}\n\
             # HELP sightline_exports_written_total Export files written\n\
             # TYPE sightline_exports_written_total counter\n\
             sightline_exports_written_total {}\n",
            self.detections_accepted,
            self.rejected[0],
            self.rejected[1],
            self.rejected[2],
            self.rejected[3],
            self.cache_expired,
            self.cache_evicted,
            self.saves_completed,
            self.saves_failed,
            self.backups_created,
            self.rotations,
            self.exports_written,
        )
    }
}

// ---------------------------------------------------------------------------
// Tracing Span Names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::span!`.
pub mod spans {
    /// One detection cycle.
    pub const DETECT: &str = "sightline::detect";
    /// Cache cleanup pass.
    pub const CACHE_CLEANUP: &str = "sightline::cache::cleanup";
    /// Stats save.
    pub const STATS_SAVE: &str = "sightline::stats::save";
    /// Stats load.
    pub const STATS_LOAD: &str = "sightline::stats::load";
    /// Backup creation.
    pub const STATS_BACKUP: &str = "sightline::stats::backup";
    /// Export.
    pub const STATS_EXPORT: &str = "sightline::stats::export";
}
