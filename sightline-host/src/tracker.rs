//! Application root: owns the tracker's components and their lifecycle.
//!
//! A host builds one [`Tracker`] at startup, calls [`Tracker::on_tick`]
//! from its game loop and [`Tracker::shutdown`] on exit. Listings, stats
//! commands and status reporting all go through the tracker so every
//! component shares the same clock, counters and config.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sightline_core::config::{DisplayMode, SortMode};
use sightline_core::metrics::CounterSnapshot;
use sightline_core::stats::AggregateStats;
use sightline_core::{
    AutoSaver, DetectionReport, Detector, EntityId, EntitySource, Observation, ObservationCache,
    Position, Result, SightlineConfig, StatsStore, TrackerContext, ZoneResolver,
};
use tracing::{info, warn};

/// Point-in-time health summary.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    /// Detection master switch.
    pub enabled: bool,
    /// Entries in the sighting cache.
    pub cached: usize,
    /// Configured cache bound.
    pub max_cached: usize,
    /// Capture time of the oldest cached sighting.
    pub oldest_cached: Option<DateTime<Utc>>,
    /// Entities with a live rate-limit entry.
    pub rate_limited: usize,
    /// Host ticks seen.
    pub ticks: u64,
    /// Unique-entity counter of the stats store.
    pub unique_entities: u64,
    /// Entities with stored aggregates.
    pub stored_entities: usize,
    /// Last stats change.
    pub last_updated: DateTime<Utc>,
    /// Whether a background save is waiting.
    pub save_pending: bool,
    /// Runtime counters.
    pub counters: CounterSnapshot,
}

/// Owns the cache, stats store, detector and optional autosaver.
pub struct Tracker {
    config: SightlineConfig,
    ctx: TrackerContext,
    cache: Arc<ObservationCache>,
    stats: Arc<StatsStore>,
    detector: Detector,
    autosaver: Option<AutoSaver>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("cache", &self.cache)
            .field("stats", &self.stats)
            .field("detector", &self.detector)
            .field("autosave", &self.autosaver.is_some())
            .finish_non_exhaustive()
    }
}

impl Tracker {
    /// Build a tracker on the system clock.
    #[must_use]
    pub fn new(config: SightlineConfig) -> Self {
        Self::with_context(config, TrackerContext::system())
    }

    /// Build a tracker from a TOML config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(SightlineConfig::from_file(path)?))
    }

    /// Build a tracker sharing an existing context (custom clock or counters).
    #[must_use]
    pub fn with_context(config: SightlineConfig, ctx: TrackerContext) -> Self {
        let cache = Arc::new(ObservationCache::new(&config.cache, ctx.clone()));
        let stats = Arc::new(StatsStore::open(
            &config.stats,
            config.general.server_name.as_str(),
            ctx.clone(),
        ));
        let detector = Detector::new(
            &config.detection,
            config.general.enabled,
            Arc::clone(&cache),
            Arc::clone(&stats),
            ctx.clone(),
        );
        info!(
            server = %config.general.server_name,
            enabled = config.general.enabled,
            data_dir = %config.stats.data_dir.display(),
            "Tracker ready"
        );
        Self {
            config,
            ctx,
            cache,
            stats,
            detector,
            autosaver: None,
        }
    }

    /// Spawn the background saver if `stats.auto_save` is on.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start_autosave(&mut self) {
        if self.config.stats.auto_save && self.autosaver.is_none() {
            self.autosaver = Some(AutoSaver::spawn(
                Arc::clone(&self.stats),
                self.config.stats.save_interval(),
            ));
        }
    }

    /// Stop the autosaver and write any pending stats.
    ///
    /// # Errors
    /// Returns the final save error, if one was needed and failed.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(saver) = self.autosaver.take() {
            saver.shutdown().await;
        }
        if self.stats.take_pending() {
            let stats = Arc::clone(&self.stats);
            match tokio::task::spawn_blocking(move || stats.save()).await {
                Ok(result) => result?,
                Err(e) => warn!(error = %e, "Final save worker panicked"),
            }
        }
        info!("Tracker stopped");
        Ok(())
    }

    // -- detection ---------------------------------------------------------

    /// Feed one host tick.
    pub fn on_tick<W>(&self, world: &W) -> Option<DetectionReport>
    where
        W: EntitySource + ZoneResolver,
    {
        self.detector.detect(world, world)
    }

    /// Scan immediately, ignoring the tick interval.
    pub fn force_scan<W>(&self, world: &W) -> Option<DetectionReport>
    where
        W: EntitySource + ZoneResolver,
    {
        self.detector.force_scan(world, world)
    }

    /// Forget rate limits and cached sightings.
    pub fn clear_cache(&self) {
        self.detector.clear();
    }

    // -- listings ----------------------------------------------------------

    /// Fresh sightings around `origin`, in the configured order, capped at
    /// `display.max_displayed`.
    #[must_use]
    pub fn visible(&self, origin: Position) -> Vec<Observation> {
        self.listing(origin, Some(self.config.display.sort_mode))
    }

    /// Like [`visible`](Self::visible) with a sort mode given by name.
    /// An unknown name lists unsorted.
    #[must_use]
    pub fn visible_sorted_by(&self, origin: Position, sort: &str) -> Vec<Observation> {
        let mode = sort.parse::<SortMode>().ok();
        if mode.is_none() {
            warn!(sort, "Unknown sort mode, listing unsorted");
        }
        self.listing(origin, mode)
    }

    fn listing(&self, origin: Position, sort: Option<SortMode>) -> Vec<Observation> {
        let mut listed = self
            .cache
            .query(origin, self.config.detection.max_detection_distance, sort);
        listed.truncate(self.config.display.max_displayed);
        listed
    }

    /// Fresh sightings around `origin` matching a named filter.
    #[must_use]
    pub fn filtered(
        &self,
        origin: Position,
        filter_type: &str,
        filter_value: &str,
    ) -> Vec<Observation> {
        self.cache.filter(
            origin,
            self.config.detection.max_detection_distance,
            filter_type,
            filter_value,
        )
    }

    /// Last sighting of the entity named `name` (any case), fresh or not.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Observation> {
        self.cache.find_by_name(name)
    }

    /// One display line for a sighting, per the configured display mode.
    #[must_use]
    pub fn describe(&self, obs: &Observation) -> String {
        let display = &self.config.display;
        let mut line = obs.name().to_string();
        match display.mode {
            DisplayMode::Minimal => {}
            DisplayMode::Compact => {
                let _ = write!(line, " {:.0}m", obs.distance());
                if display.show_direction {
                    let _ = write!(line, " {}", obs.direction());
                }
            }
            DisplayMode::Detailed => {
                let _ = write!(line, " ({:.1} blocks)", obs.distance());
                if display.show_direction {
                    let _ = write!(line, " {}", obs.direction());
                }
                if display.show_coordinates {
                    let _ = write!(line, " [{}]", obs.position().block());
                }
                if display.show_zone {
                    let _ = write!(line, " {}", obs.zone());
                }
            }
        }
        line
    }

    // -- stats commands ----------------------------------------------------

    /// Stored aggregate for one entity.
    #[must_use]
    pub fn entity_stats(&self, id: EntityId) -> Option<AggregateStats> {
        self.stats.get(id)
    }

    /// Stored aggregate for the entity named `name` (any case), with its id.
    #[must_use]
    pub fn entity_stats_by_name(&self, name: &str) -> Option<(EntityId, AggregateStats)> {
        self.stats.find_by_name(name)
    }

    /// Export stats as `json` or `csv`.
    ///
    /// # Errors
    /// Returns `UnsupportedFormat` for other names, or the write error.
    pub fn export(&self, format: &str) -> Result<PathBuf> {
        self.stats.export(format)
    }

    /// Back up the durable stats file now.
    ///
    /// # Errors
    /// Returns the copy error.
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        self.stats.create_backup()
    }

    /// Save stats now.
    ///
    /// # Errors
    /// Returns the save error.
    pub fn save(&self) -> Result<()> {
        self.stats.save()
    }

    /// Drop every stored aggregate.
    ///
    /// # Errors
    /// Returns the save error.
    pub fn reset_stats(&self) -> Result<()> {
        self.stats.reset_all()
    }

    /// Drop one entity's aggregate.
    ///
    /// # Errors
    /// Returns `EntityNotFound` or the save error.
    pub fn reset_entity(&self, id: EntityId) -> Result<AggregateStats> {
        self.stats.reset_one(id)
    }

    // -- status ------------------------------------------------------------

    /// Current health summary.
    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        let cache = self.cache.stats();
        let detection = self.detector.detection_stats();
        TrackerStatus {
            enabled: self.config.general.enabled,
            cached: cache.entries,
            max_cached: cache.max_entries,
            oldest_cached: cache.oldest_entry,
            rate_limited: detection.tracked,
            ticks: detection.ticks,
            unique_entities: self.stats.unique_entities(),
            stored_entities: self.stats.len(),
            last_updated: self.stats.last_updated(),
            save_pending: self.stats.is_save_pending(),
            counters: self.ctx.counters.snapshot(),
        }
    }

    /// [`status`](Self::status) as a JSON document.
    ///
    /// # Errors
    /// Returns a serialization error.
    pub fn status_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.status())?)
    }

    /// Counters in Prometheus text format.
    #[must_use]
    pub fn prometheus(&self) -> String {
        self.ctx.counters.snapshot().to_prometheus()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SightlineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{WorldSnapshot, Zone};
    use sightline_core::{Direction, ManualClock};
    use std::time::Duration;

    fn config(dir: &Path, display: &str) -> SightlineConfig {
        let mut config = SightlineConfig::from_toml(&format!(
            r"
            [detection]
            update_interval_ticks = 5
            fov_filter_enabled = false

            [display]
            max_displayed = 3
            {display}
            "
        ))
        .expect("config");
        config.stats.data_dir = dir.to_path_buf();
        config
    }

    fn world() -> WorldSnapshot {
        let mut world = WorldSnapshot::new("plains");
        world.add_zone(Zone::new("desert", (0.0, 0.0), (100.0, 100.0)));
        world.set_observer(
            EntityId::new(),
            Position::new(0.0, 64.0, 0.0),
            Position::new(1.0, 0.0, 0.0),
        );
        world
    }

    fn tracker(config: SightlineConfig) -> (Tracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let ctx = TrackerContext::with_clock(clock.clone());
        (Tracker::with_context(config, ctx), clock)
    }

    #[test]
    fn ticks_drive_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, _) = tracker(config(dir.path(), ""));
        let mut world = world();
        world.spawn("Steve", Position::new(10.0, 64.0, 10.0));

        let reports: Vec<_> = (0..5).filter_map(|_| tracker.on_tick(&world)).collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].accepted.len(), 1);

        let status = tracker.status();
        assert_eq!(status.ticks, 5);
        assert_eq!(status.cached, 1);
        assert_eq!(status.unique_entities, 1);
        assert!(status.save_pending);
    }

    #[test]
    fn visible_sorted_and_capped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, _) = tracker(config(dir.path(), "sort_mode = \"name\""));
        let mut world = world();
        let roster = [
            ("Delta", 5.0),
            ("Alpha", 40.0),
            ("Charlie", 20.0),
            ("Bravo", 60.0),
            ("Echo", 200.0),
        ];
        for (name, x) in roster {
            world.spawn(name, Position::new(x, 64.0, 0.0));
        }
        tracker.force_scan(&world);

        let names: Vec<String> = tracker
            .visible(Position::new(0.0, 64.0, 0.0))
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        assert_eq!(names, ["Alpha", "Bravo", "Charlie"]);

        let nearest = tracker.visible_sorted_by(Position::new(0.0, 64.0, 0.0), "distance");
        assert_eq!(nearest[0].name(), "Delta");
        assert_eq!(tracker.visible_sorted_by(Position::new(0.0, 64.0, 0.0), "height").len(), 3);
    }

    #[test]
    fn describe_per_display_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let obs = Observation::new(
            EntityId::new(),
            "Steve",
            Position::new(30.0, 64.5, 40.0),
            "desert",
            Position::new(0.0, 64.0, 0.0),
            Utc::now(),
        );
        assert_eq!(obs.direction(), Direction::South);

        let (compact, _) = tracker(config(dir.path(), ""));
        assert_eq!(compact.describe(&obs), "Steve 50m ↓");

        let (minimal, _) = tracker(config(dir.path(), "mode = \"minimal\""));
        assert_eq!(minimal.describe(&obs), "Steve");

        let (detailed, _) = tracker(config(dir.path(), "mode = \"detailed\"\nshow_zone = false"));
        assert_eq!(detailed.describe(&obs), "Steve (50.0 blocks) ↓ [30 64 40]");
    }

    #[test]
    fn filters_and_zone_labels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, _) = tracker(config(dir.path(), ""));
        let mut world = world();
        world.spawn("InDesert", Position::new(10.0, 64.0, 10.0));
        world.spawn("OnPlains", Position::new(-10.0, 64.0, -10.0));
        tracker.force_scan(&world);

        let desert = tracker.filtered(Position::new(0.0, 64.0, 0.0), "biome", "des");
        assert_eq!(desert.len(), 1);
        assert_eq!(desert[0].name(), "InDesert");
    }

    #[test]
    fn stats_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, clock) = tracker(config(dir.path(), ""));
        let mut world = world();
        let steve = world.spawn("Steve", Position::new(10.0, 64.0, 10.0));
        tracker.force_scan(&world);
        clock.advance(Duration::from_secs(2));
        tracker.force_scan(&world);

        assert_eq!(tracker.entity_stats(steve).map(|s| s.total_sessions), Some(2));
        let (by_name, stats) = tracker.entity_stats_by_name("steve").expect("by name");
        assert_eq!(by_name, steve);
        assert_eq!(stats.total_sessions, 2);
        assert!(tracker.entity_stats_by_name("Herobrine").is_none());
        tracker.save().expect("save");
        assert!(tracker.backup().expect("backup").is_some());
        let csv = tracker.export("csv").expect("export");
        assert_eq!(csv.extension().and_then(|e| e.to_str()), Some("csv"));
        assert!(tracker.export("yaml").is_err());

        tracker.reset_entity(steve).expect("reset");
        assert!(tracker.entity_stats(steve).is_none());
        assert!(tracker.reset_entity(steve).is_err());
    }

    #[test]
    fn lookup_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, _) = tracker(config(dir.path(), ""));
        let mut world = world();
        let alex = world.spawn("Alex", Position::new(20.0, 64.0, 0.0));
        tracker.force_scan(&world);

        let seen = tracker.lookup("ALEX").expect("cached");
        assert_eq!(seen.id(), alex);
        assert_eq!(seen.position(), Position::new(20.0, 64.0, 0.0));
        assert!(tracker.lookup("Steve").is_none());
    }

    #[test]
    fn status_renders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, _) = tracker(config(dir.path(), ""));
        let json = tracker.status_json().expect("json");
        assert!(json.contains("\"unique_entities\": 0"));
        assert!(tracker.prometheus().contains("sightline_detections_accepted_total 0"));
    }

    #[tokio::test]
    async fn shutdown_flushes_autosave() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path(), "");
        let stats_path = dir.path().join(sightline_core::stats::STATS_FILE_NAME);
        let (mut tracker, _) = tracker(config);
        tracker.start_autosave();

        let mut world = world();
        world.spawn("Steve", Position::new(10.0, 64.0, 10.0));
        tracker.force_scan(&world);
        tracker.shutdown().await.expect("shutdown");

        assert!(stats_path.exists());
    }
}
