//! Tick-driven detection pipeline.
//!
//! Every `update_interval_ticks` host ticks the [`Detector`] samples the
//! world through an [`EntitySource`] and runs each candidate through four
//! filters in order:
//!
//! 1. name validity (skippable)
//! 2. distance
//! 3. field of view (skippable)
//! 4. per-entity rate limit (one admission per second)
//!
//! Admitted candidates are upserted into the [`ObservationCache`] and
//! recorded in the [`StatsStore`]. The tick counter and rate-limit table
//! belong to the detector instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace, trace_span};

use crate::cache::ObservationCache;
use crate::config::DetectionConfig;
use crate::context::{TrackerContext, to_delta};
use crate::metrics::{TrackerCounters, spans};
use crate::source::{CandidateSample, EntitySource, ObserverSample, ZoneResolver};
use crate::stats::StatsStore;
use crate::types::{EntityId, Observation, Position};

/// Minimum gap between two admissions of the same entity.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);
/// Rate-limit entries older than this are dropped each cycle.
pub const RATE_LIMIT_RETENTION: Duration = Duration::from_secs(60);
/// Session time credited per admitted sighting.
pub const SESSION_DURATION: Duration = Duration::from_millis(1000);

const MIN_NAME_LEN: usize = 3;
const NAME_BLACKLIST: [&str; 5] = ["bot", "npc", "admin", "mod", "helper"];

/// Why a candidate was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Name too short, has disallowed characters or a blacklisted word.
    InvalidName,
    /// Beyond the configured detection distance.
    OutOfRange,
    /// Outside the observer's field of view.
    OutsideFov,
    /// Admitted less than [`RATE_LIMIT_WINDOW`] ago.
    RateLimited,
}

/// Outcome of one detection cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    /// Entities admitted this cycle.
    pub accepted: Vec<EntityId>,
    /// Rejections by reason: invalid name, out of range, outside FOV, rate limited.
    pub rejected: [usize; 4],
}

impl DetectionReport {
    fn reject(&mut self, reason: Rejection) {
        self.rejected[reason as usize] += 1;
    }

    /// Rejections for one reason.
    #[must_use]
    pub fn rejected_for(&self, reason: Rejection) -> usize {
        self.rejected[reason as usize]
    }

    /// Total rejections.
    #[must_use]
    pub fn total_rejected(&self) -> usize {
        self.rejected.iter().sum()
    }
}

/// Detector state summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionStats {
    /// Entities with a live rate-limit entry.
    pub tracked: usize,
    /// Entries in the cache.
    pub cached: usize,
    /// Ticks seen since start.
    pub ticks: u64,
}

/// Samples the world on a tick cadence and admits sightings.
pub struct Detector {
    config: DetectionConfig,
    enabled: bool,
    cache: Arc<ObservationCache>,
    stats: Arc<StatsStore>,
    ctx: TrackerContext,
    ticks: AtomicU64,
    rate_limits: DashMap<EntityId, DateTime<Utc>>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("enabled", &self.enabled)
            .field("ticks", &self.ticks.load(Ordering::Relaxed))
            .field("rate_limits", &self.rate_limits.len())
            .finish_non_exhaustive()
    }
}

impl Detector {
    /// Build a detector writing into `cache` and `stats`.
    #[must_use]
    pub fn new(
        config: &DetectionConfig,
        enabled: bool,
        cache: Arc<ObservationCache>,
        stats: Arc<StatsStore>,
        ctx: TrackerContext,
    ) -> Self {
        Self {
            config: config.clone(),
            enabled,
            cache,
            stats,
            ctx,
            ticks: AtomicU64::new(0),
            rate_limits: DashMap::new(),
        }
    }

    /// Count one host tick and run a cycle if this tick is on the interval.
    ///
    /// Returns `None` when disabled, off-interval or without an observer.
    pub fn detect(
        &self,
        source: &dyn EntitySource,
        zones: &dyn ZoneResolver,
    ) -> Option<DetectionReport> {
        if !self.enabled {
            return None;
        }
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let interval = u64::from(self.config.update_interval_ticks.max(1));
        if tick % interval != 0 {
            return None;
        }
        self.run_cycle(source, zones)
    }

    /// Run a cycle now, regardless of the tick interval.
    pub fn force_scan(
        &self,
        source: &dyn EntitySource,
        zones: &dyn ZoneResolver,
    ) -> Option<DetectionReport> {
        self.run_cycle(source, zones)
    }

    fn run_cycle(
        &self,
        source: &dyn EntitySource,
        zones: &dyn ZoneResolver,
    ) -> Option<DetectionReport> {
        let _span = trace_span!(spans::DETECT).entered();
        let observer = source.observer()?;
        let now = self.ctx.now();
        let mut report = DetectionReport::default();

        for candidate in source.candidates() {
            if candidate.id == observer.id {
                continue;
            }
            match self.admit(&observer, &candidate, now) {
                Ok(()) => {
                    let zone = zones.zone_at(candidate.position);
                    let observation = Observation::new(
                        candidate.id,
                        candidate.name.as_str(),
                        candidate.position,
                        zone.as_str(),
                        observer.position,
                        now,
                    );
                    self.cache.upsert(observation);
                    self.stats.record(
                        candidate.id,
                        &candidate.name,
                        candidate.position,
                        &zone,
                        SESSION_DURATION,
                    );
                    TrackerCounters::add(&self.ctx.counters.detections_accepted, 1);
                    trace!(entity = %candidate.id, name = %candidate.name, "Sighting admitted");
                    report.accepted.push(candidate.id);
                }
                Err(reason) => {
                    self.ctx.counters.record_rejection(reason);
                    report.reject(reason);
                }
            }
        }

        self.sweep_rate_limits(now);
        debug!(
            accepted = report.accepted.len(),
            rejected = report.total_rejected(),
            "Detection cycle complete"
        );
        Some(report)
    }

    /// Run the filters; on success the rate-limit entry is stamped.
    fn admit(
        &self,
        observer: &ObserverSample,
        candidate: &CandidateSample,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        if self.config.filter_invalid_names && !is_valid_name(&candidate.name) {
            return Err(Rejection::InvalidName);
        }
        if observer.position.distance_to(candidate.position) > self.config.max_detection_distance {
            return Err(Rejection::OutOfRange);
        }
        let fov = self.config.fov_degrees;
        if self.config.fov_filter_enabled
            && !in_fov(observer.position, observer.look, candidate.position, fov)
        {
            return Err(Rejection::OutsideFov);
        }

        match self.rate_limits.entry(candidate.id) {
            Entry::Occupied(mut last) => {
                if now.signed_duration_since(*last.get()) < to_delta(RATE_LIMIT_WINDOW) {
                    return Err(Rejection::RateLimited);
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        Ok(())
    }

    fn sweep_rate_limits(&self, now: DateTime<Utc>) {
        let retention: TimeDelta = to_delta(RATE_LIMIT_RETENTION);
        self.rate_limits
            .retain(|_, last| now.signed_duration_since(*last) <= retention);
    }

    /// Rate-limit, cache and tick summary.
    #[must_use]
    pub fn detection_stats(&self) -> DetectionStats {
        DetectionStats {
            tracked: self.rate_limits.len(),
            cached: self.cache.len(),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }

    /// Forget all rate limits and empty the cache.
    pub fn clear(&self) {
        self.rate_limits.clear();
        self.cache.clear();
    }
}

/// Whether `name` passes the validity filter.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    if name.chars().count() < MIN_NAME_LEN {
        return false;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    !NAME_BLACKLIST.iter().any(|word| lower.contains(word))
}

/// Whether `target` lies within `fov_degrees` (full angle) of `look` as seen
/// from `origin`. A zero-length look or offset counts as inside.
#[must_use]
pub fn in_fov(origin: Position, look: Position, target: Position, fov_degrees: f64) -> bool {
    let (Some(look), Some(toward)) = (look.normalized(), target.sub(origin).normalized()) else {
        return true;
    };
    let angle = toward.dot(look).clamp(-1.0, 1.0).acos().to_degrees();
    angle <= fov_degrees / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, StatsConfig};
    use crate::context::ManualClock;

    struct Scene {
        observer: ObserverSample,
        candidates: Vec<CandidateSample>,
    }

    impl EntitySource for Scene {
        fn observer(&self) -> Option<ObserverSample> {
            Some(self.observer)
        }

        fn candidates(&self) -> Vec<CandidateSample> {
            self.candidates.clone()
        }
    }

    fn plains(_: Position) -> String {
        "plains".to_string()
    }

    fn observer() -> ObserverSample {
        ObserverSample {
            id: EntityId::new(),
            position: Position::new(0.0, 64.0, 0.0),
            look: Position::new(1.0, 0.0, 0.0),
        }
    }

    fn candidate(name: &str, x: f64, z: f64) -> CandidateSample {
        CandidateSample {
            id: EntityId::new(),
            name: name.to_string(),
            position: Position::new(x, 64.0, z),
        }
    }

    struct Rig {
        detector: Detector,
        cache: Arc<ObservationCache>,
        stats: Arc<StatsStore>,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn rig(config: DetectionConfig) -> Rig {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::starting_now());
        let ctx = TrackerContext::with_clock(clock.clone());
        let cache = Arc::new(ObservationCache::new(&CacheConfig::default(), ctx.clone()));
        let stats_config = StatsConfig {
            data_dir: dir.path().to_path_buf(),
            ..StatsConfig::default()
        };
        let stats = Arc::new(StatsStore::open(&stats_config, "test", ctx.clone()));
        let detector = Detector::new(&config, true, cache.clone(), stats.clone(), ctx);
        Rig {
            detector,
            cache,
            stats,
            clock,
            _dir: dir,
        }
    }

    fn no_fov() -> DetectionConfig {
        DetectionConfig {
            fov_filter_enabled: false,
            ..DetectionConfig::default()
        }
    }

    #[test]
    fn distance_and_rate_limit() {
        let rig = rig(no_fov());
        let far = candidate("FarAway", 150.0, 0.0);
        let near = candidate("Nearby", -50.0, 0.0);
        let near_id = near.id;
        let scene = Scene {
            observer: observer(),
            candidates: vec![far, near],
        };

        let first = rig.detector.force_scan(&scene, &plains).expect("observer");
        assert_eq!(first.accepted, vec![near_id]);
        assert_eq!(first.rejected_for(Rejection::OutOfRange), 1);

        let second = rig.detector.force_scan(&scene, &plains).expect("observer");
        assert!(second.accepted.is_empty());
        assert_eq!(second.rejected_for(Rejection::RateLimited), 1);

        rig.clock.advance(Duration::from_millis(1100));
        let third = rig.detector.force_scan(&scene, &plains).expect("observer");
        assert_eq!(third.accepted, vec![near_id]);

        let stats = rig.stats.get(near_id).expect("recorded");
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_online_time(), Duration::from_secs(2));
        assert!(rig.cache.lookup(near_id).is_some());
    }

    #[test]
    fn fov_filter() {
        let rig = rig(DetectionConfig::default());
        let ahead = candidate("InFront", 20.0, 5.0);
        let behind = candidate("BehindYou", -20.0, 0.0);
        let ahead_id = ahead.id;
        let scene = Scene {
            observer: observer(),
            candidates: vec![ahead, behind],
        };

        let report = rig.detector.force_scan(&scene, &plains).expect("observer");
        assert_eq!(report.accepted, vec![ahead_id]);
        assert_eq!(report.rejected_for(Rejection::OutsideFov), 1);
    }

    #[test]
    fn invalid_names_rejected_and_observer_skipped() {
        let rig = rig(no_fov());
        let me = observer();
        let mut myself = candidate("MySelf", 1.0, 0.0);
        myself.id = me.id;
        let scene = Scene {
            observer: me,
            candidates: vec![
                myself,
                candidate("ab", 5.0, 0.0),
                candidate("ChatBot9", 5.0, 0.0),
                candidate("bad-name", 5.0, 0.0),
                candidate("Steve_42", 5.0, 0.0),
            ],
        };

        let report = rig.detector.force_scan(&scene, &plains).expect("observer");
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected_for(Rejection::InvalidName), 3);
        assert_eq!(rig.stats.len(), 1);
    }

    #[test]
    fn name_filter_can_be_disabled() {
        let rig = rig(DetectionConfig {
            filter_invalid_names: false,
            ..no_fov()
        });
        let scene = Scene {
            observer: observer(),
            candidates: vec![candidate("npc", 5.0, 0.0)],
        };
        let report = rig.detector.force_scan(&scene, &plains).expect("observer");
        assert_eq!(report.accepted.len(), 1);
    }

    #[test]
    fn tick_gate() {
        let rig = rig(DetectionConfig {
            update_interval_ticks: 5,
            ..no_fov()
        });
        let scene = Scene {
            observer: observer(),
            candidates: vec![candidate("Steve", 5.0, 0.0)],
        };

        let ran: Vec<bool> = (0..10)
            .map(|_| rig.detector.detect(&scene, &plains).is_some())
            .collect();
        assert_eq!(ran, [false, false, false, false, true, false, false, false, false, true]);
        assert_eq!(rig.detector.detection_stats().ticks, 10);
    }

    #[test]
    fn disabled_detector_does_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = TrackerContext::default();
        let cache = Arc::new(ObservationCache::new(&CacheConfig::default(), ctx.clone()));
        let stats_config = StatsConfig {
            data_dir: dir.path().to_path_buf(),
            ..StatsConfig::default()
        };
        let stats = Arc::new(StatsStore::open(&stats_config, "test", ctx.clone()));
        let detector = Detector::new(&DetectionConfig::default(), false, cache, stats, ctx);
        let scene = Scene {
            observer: observer(),
            candidates: vec![candidate("Steve", 5.0, 0.0)],
        };
        for _ in 0..40 {
            assert!(detector.detect(&scene, &plains).is_none());
        }
        assert_eq!(detector.detection_stats().ticks, 0);
    }

    #[test]
    fn rate_limit_entries_expire() {
        let rig = rig(no_fov());
        let walker = candidate("Walker", 5.0, 0.0);
        let scene = Scene {
            observer: observer(),
            candidates: vec![walker],
        };
        let empty = Scene {
            observer: observer(),
            candidates: Vec::new(),
        };

        rig.detector.force_scan(&scene, &plains);
        assert_eq!(rig.detector.detection_stats().tracked, 1);

        rig.clock.advance(Duration::from_secs(61));
        rig.detector.force_scan(&empty, &plains);
        assert_eq!(rig.detector.detection_stats().tracked, 0);
    }

    #[test]
    fn clear_resets_rate_limits_and_cache() {
        let rig = rig(no_fov());
        let scene = Scene {
            observer: observer(),
            candidates: vec![candidate("Walker", 5.0, 0.0)],
        };
        rig.detector.force_scan(&scene, &plains);
        rig.detector.clear();

        let stats = rig.detector.detection_stats();
        assert_eq!((stats.tracked, stats.cached), (0, 0));
        let again = rig.detector.force_scan(&scene, &plains).expect("observer");
        assert_eq!(again.accepted.len(), 1);
    }

    #[test]
    fn name_validity() {
        assert!(is_valid_name("Steve"));
        assert!(is_valid_name("x_1"));
        assert!(!is_valid_name("ab"));
        assert!(!is_valid_name("Hello World"));
        assert!(!is_valid_name("Moderator"));
        assert!(!is_valid_name("SuperADMIN"));
        assert!(!is_valid_name("Ünïcode"));
    }

    #[test]
    fn fov_geometry() {
        let o = Position::default();
        let east = Position::new(1.0, 0.0, 0.0);
        assert!(in_fov(o, east, Position::new(10.0, 0.0, 9.0), 90.0));
        assert!(!in_fov(o, east, Position::new(10.0, 0.0, 11.0), 90.0));
        assert!(!in_fov(o, east, Position::new(-10.0, 0.0, 0.0), 180.0));
        assert!(in_fov(o, east, Position::new(1.0, 0.0, 10.0), 180.0));
        // Unnormalized look vectors are fine.
        assert!(in_fov(o, Position::new(5.0, 0.0, 0.0), Position::new(10.0, 0.0, 1.0), 30.0));
        // Degenerate vectors count as inside.
        assert!(in_fov(o, Position::default(), Position::new(-10.0, 0.0, 0.0), 30.0));
        assert!(in_fov(o, east, o, 30.0));
    }
}
