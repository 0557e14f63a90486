//! Durable per-entity statistics.
//!
//! The [`StatsStore`] accumulates long-lived aggregates in memory and
//! persists them to a single JSON file (`player_stats.json`) under the
//! configured data directory:
//!
//! ```text
//! <data_dir>/
//! ├── player_stats.json
//! ├── backups/player_stats_backup_<yyyy-MM-dd_HH-mm-ss>.json
//! └── exports/player_stats_export_<yyyy-MM-dd_HH-mm-ss>.{json,csv}
//! ```
//!
//! Design notes:
//! - [`StatsStore::record`] never touches the disk. With `auto_save` on it
//!   raises a pending flag that the [`AutoSaver`](crate::autosave::AutoSaver)
//!   picks up; repeated requests while one is pending are no-ops.
//! - Saves are serialized by a mutex and written through a temporary file
//!   that is renamed over the durable one.
//! - When the durable file has outgrown `max_file_size_bytes`, the next
//!   save backs it up and keeps only the most recently seen entities.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, info_span, warn};

use crate::config::StatsConfig;
use crate::context::TrackerContext;
use crate::error::{Result, SightlineError};
use crate::metrics::{TrackerCounters, spans};
use crate::types::{BlockPos, EntityId, Position};

/// File name of the durable stats file inside the data directory.
pub const STATS_FILE_NAME: &str = "player_stats.json";
/// Backup directory inside the data directory.
pub const BACKUP_DIR: &str = "backups";
/// Export directory inside the data directory.
pub const EXPORT_DIR: &str = "exports";
/// Schema version written into every stats file.
pub const STATS_FILE_VERSION: u32 = 1;

const BACKUP_PREFIX: &str = "player_stats_backup_";
const EXPORT_PREFIX: &str = "player_stats_export_";
const FILE_TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S";
const CSV_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One admitted sighting, as kept in an entity's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppearanceRecord {
    /// Block the entity stood in.
    pub position: BlockPos,
    /// Zone label at the time.
    pub zone: String,
    /// When the sighting was recorded.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Session time credited for this sighting, in milliseconds.
    #[serde(rename = "sessionDuration")]
    pub session_duration_ms: u64,
}

/// Long-lived aggregate for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    /// Display name at first sighting.
    pub name: String,
    /// First recorded sighting. Never changes after creation.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_seen: DateTime<Utc>,
    /// Most recent recorded sighting.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    /// Number of recorded sessions.
    pub total_sessions: u64,
    /// Accumulated online time in milliseconds.
    #[serde(rename = "totalOnlineTime")]
    pub total_online_time_ms: u64,
    /// Appearance history, oldest first.
    #[serde(default)]
    pub appearances: Vec<AppearanceRecord>,
}

impl AggregateStats {
    fn new(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            first_seen: now,
            last_seen: now,
            total_sessions: 0,
            total_online_time_ms: 0,
            appearances: Vec::new(),
        }
    }

    fn record(&mut self, position: BlockPos, zone: &str, now: DateTime<Utc>, session_ms: u64) {
        self.last_seen = now;
        self.total_sessions += 1;
        self.total_online_time_ms = self.total_online_time_ms.saturating_add(session_ms);
        self.appearances.push(AppearanceRecord {
            position,
            zone: zone.to_string(),
            timestamp: now,
            session_duration_ms: session_ms,
        });
    }

    /// Total online time as a [`Duration`].
    #[must_use]
    pub fn total_online_time(&self) -> Duration {
        Duration::from_millis(self.total_online_time_ms)
    }
}

/// Header of the durable file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server identity from config.
    pub server_name: String,
    /// Last time any record changed.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
    /// Unique-entity counter.
    pub total_unique_entities: u64,
}

/// On-disk container. Also the JSON export format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsFile {
    /// Schema version, see [`STATS_FILE_VERSION`].
    pub version: u32,
    /// Header.
    pub server_info: ServerInfo,
    /// Aggregates keyed by entity id.
    pub entities: BTreeMap<EntityId, AggregateStats>,
}

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Full-fidelity [`StatsFile`].
    Json,
    /// One summary row per entity.
    Csv,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = SightlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(SightlineError::UnsupportedFormat(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// StatsStore
// ---------------------------------------------------------------------------

/// Concurrent aggregate store with JSON persistence.
pub struct StatsStore {
    config: StatsConfig,
    server_name: String,
    path: PathBuf,
    entities: DashMap<EntityId, AggregateStats>,
    unique_entities: AtomicU64,
    last_updated: Mutex<DateTime<Utc>>,
    save_lock: Mutex<()>,
    save_pending: AtomicBool,
    save_signal: Notify,
    ctx: TrackerContext,
}

impl std::fmt::Debug for StatsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsStore")
            .field("path", &self.path)
            .field("entities", &self.entities.len())
            .field("unique_entities", &self.unique_entities())
            .finish_non_exhaustive()
    }
}

impl StatsStore {
    /// Open the store under `config.data_dir`, loading the durable file if
    /// one exists. Load failures leave the store empty.
    #[must_use]
    pub fn open(config: &StatsConfig, server_name: impl Into<String>, ctx: TrackerContext) -> Self {
        let now = ctx.now();
        let store = Self {
            config: config.clone(),
            server_name: server_name.into(),
            path: config.data_dir.join(STATS_FILE_NAME),
            entities: DashMap::new(),
            unique_entities: AtomicU64::new(0),
            last_updated: Mutex::new(now),
            save_lock: Mutex::new(()),
            save_pending: AtomicBool::new(false),
            save_signal: Notify::new(),
            ctx,
        };
        store.load();
        store
    }

    /// Fill the freshly opened store from the durable file.
    ///
    /// Returns the number of entities loaded. A missing, unreadable,
    /// malformed or wrong-version file is logged and leaves the store empty.
    /// The configured server name wins over the one in the file header.
    fn load(&self) -> usize {
        let _span = info_span!(spans::STATS_LOAD).entered();

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No stats file yet, starting empty");
                return 0;
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Cannot read stats file, starting empty"
                );
                return 0;
            }
        };

        let file: StatsFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Malformed stats file, starting empty"
                );
                return 0;
            }
        };
        if file.version != STATS_FILE_VERSION {
            warn!(
                path = %self.path.display(),
                found = file.version,
                expected = STATS_FILE_VERSION,
                "Unsupported stats file version, starting empty"
            );
            return 0;
        }

        if file.server_info.server_name != self.server_name {
            debug!(
                stored = %file.server_info.server_name,
                configured = %self.server_name,
                "Stats file written under another server name, using the configured one"
            );
        }
        let count = file.entities.len();
        self.unique_entities
            .store(file.server_info.total_unique_entities, Ordering::Relaxed);
        *self.last_updated.lock() = file.server_info.last_updated;
        for (id, stats) in file.entities {
            self.entities.insert(id, stats);
        }

        info!(path = %self.path.display(), entities = count, "Stats loaded");
        count
    }

    /// Record one sighting of `id`.
    ///
    /// Creates the aggregate on first sight (bumping the unique counter),
    /// then updates `last_seen`, sessions, online time and history. With
    /// `auto_save` on, requests a background save.
    pub fn record(
        &self,
        id: EntityId,
        name: &str,
        position: Position,
        zone: &str,
        session: Duration,
    ) {
        let now = self.ctx.now();
        let session_ms = u64::try_from(session.as_millis()).unwrap_or(u64::MAX);

        self.entities
            .entry(id)
            .or_insert_with(|| {
                self.unique_entities.fetch_add(1, Ordering::Relaxed);
                AggregateStats::new(name, now)
            })
            .record(position.block(), zone, now, session_ms);
        *self.last_updated.lock() = now;

        if self.config.auto_save {
            self.request_save();
        }
    }

    /// Ask the background saver for a save. No-op while one is pending.
    pub fn request_save(&self) {
        if !self.save_pending.swap(true, Ordering::AcqRel) {
            self.save_signal.notify_one();
        }
    }

    /// Clear the pending flag, returning whether a save was pending.
    pub fn take_pending(&self) -> bool {
        self.save_pending.swap(false, Ordering::AcqRel)
    }

    /// Whether a background save has been requested and not yet taken.
    #[must_use]
    pub fn is_save_pending(&self) -> bool {
        self.save_pending.load(Ordering::Acquire)
    }

    pub(crate) fn save_signal(&self) -> &Notify {
        &self.save_signal
    }

    /// Write the durable file, rotating first if it has outgrown the
    /// configured size.
    ///
    /// # Errors
    /// Returns an I/O or serialization error. A failed backup aborts the
    /// save before anything is truncated.
    pub fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock();
        let _span = info_span!(spans::STATS_SAVE).entered();

        let result = self.save_unlocked();
        match &result {
            Ok(()) => TrackerCounters::add(&self.ctx.counters.saves_completed, 1),
            Err(_) => TrackerCounters::add(&self.ctx.counters.saves_failed, 1),
        }
        result
    }

    fn save_unlocked(&self) -> Result<()> {
        self.rotate_if_oversized()?;

        let file = self.snapshot();
        let json = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;

        debug!(
            path = %self.path.display(),
            entities = file.entities.len(),
            bytes = json.len(),
            "Stats saved"
        );
        Ok(())
    }

    fn rotate_if_oversized(&self) -> Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size <= self.config.max_file_size_bytes {
            return Ok(());
        }

        if self.config.auto_backup {
            self.backup_unlocked()?;
        }
        let removed = self.truncate_to(self.config.rotation_keep_entities);
        TrackerCounters::add(&self.ctx.counters.rotations, 1);
        info!(
            size,
            limit = self.config.max_file_size_bytes,
            removed,
            kept = self.entities.len(),
            "Stats file rotated"
        );
        Ok(())
    }

    /// Keep only the `keep` most recently seen entities. Returns how many
    /// were dropped.
    fn truncate_to(&self, keep: usize) -> usize {
        let by_age: Vec<(EntityId, DateTime<Utc>)> = self
            .entities
            .iter()
            .map(|e| (*e.key(), e.last_seen))
            .collect();
        if by_age.len() <= keep {
            return 0;
        }
        let excess = by_age.len() - keep;
        let removed = self.evict_oldest(by_age, excess);
        let remaining = u64::try_from(self.entities.len()).unwrap_or(u64::MAX);
        self.unique_entities.store(remaining, Ordering::Relaxed);
        removed
    }

    /// Remove up to `excess` records from a `(id, last_seen)` snapshot,
    /// oldest first. A record seen again since the snapshot stays and the
    /// next-oldest goes instead.
    pub(crate) fn evict_oldest(
        &self,
        mut by_age: Vec<(EntityId, DateTime<Utc>)>,
        mut excess: usize,
    ) -> usize {
        by_age.sort_by_key(|&(_, seen)| seen);
        let mut removed = 0;
        for (id, seen) in by_age {
            if excess == 0 {
                break;
            }
            if self
                .entities
                .remove_if(&id, |_, s| s.last_seen <= seen)
                .is_some()
            {
                excess -= 1;
                removed += 1;
            }
        }
        removed
    }

    /// Copy the durable file into `backups/` and prune old backups.
    ///
    /// Returns the backup path, or `None` if there is no durable file yet.
    ///
    /// # Errors
    /// Returns an I/O error if the copy fails.
    pub fn create_backup(&self) -> Result<Option<PathBuf>> {
        let _guard = self.save_lock.lock();
        self.backup_unlocked()
    }

    fn backup_unlocked(&self) -> Result<Option<PathBuf>> {
        let _span = info_span!(spans::STATS_BACKUP).entered();
        let dir = self.config.data_dir.join(BACKUP_DIR);
        fs::create_dir_all(&dir)?;

        if !self.path.exists() {
            debug!("No stats file to back up");
            return Ok(None);
        }

        let stamp = self.ctx.now().format(FILE_TIMESTAMP).to_string();
        let dest = unique_path(&dir, &format!("{BACKUP_PREFIX}{stamp}"), "json");
        fs::copy(&self.path, &dest)?;
        TrackerCounters::add(&self.ctx.counters.backups_created, 1);
        info!(dest = %dest.display(), "Stats backup created");

        if let Err(e) = prune_backups(&dir, self.config.backup_count) {
            warn!(dir = %dir.display(), error = %e, "Failed to prune old backups");
        }
        Ok(Some(dest))
    }

    /// Export a snapshot in a named format (`json` or `csv`).
    ///
    /// # Errors
    /// Returns [`SightlineError::UnsupportedFormat`] for any other name, or
    /// an I/O error if the file cannot be written.
    pub fn export(&self, format: &str) -> Result<PathBuf> {
        self.export_as(format.parse()?)
    }

    /// Export a snapshot to `exports/` without touching live state.
    ///
    /// # Errors
    /// Returns an I/O or serialization error.
    pub fn export_as(&self, format: ExportFormat) -> Result<PathBuf> {
        let _span = info_span!(spans::STATS_EXPORT).entered();
        let file = self.snapshot();

        let dir = self.config.data_dir.join(EXPORT_DIR);
        fs::create_dir_all(&dir)?;
        let stamp = self.ctx.now().format(FILE_TIMESTAMP).to_string();
        let dest = unique_path(&dir, &format!("{EXPORT_PREFIX}{stamp}"), format.extension());

        match format {
            ExportFormat::Json => fs::write(&dest, serde_json::to_string_pretty(&file)?)?,
            ExportFormat::Csv => {
                let mut wtr = csv::Writer::from_path(&dest)?;
                for (id, stats) in &file.entities {
                    wtr.serialize(CsvRow::new(*id, stats))?;
                }
                wtr.flush()?;
            }
        }

        TrackerCounters::add(&self.ctx.counters.exports_written, 1);
        info!(dest = %dest.display(), entities = file.entities.len(), "Stats exported");
        Ok(dest)
    }

    /// Drop every record and persist immediately.
    ///
    /// # Errors
    /// Returns the save error, if any. In-memory state is cleared regardless.
    pub fn reset_all(&self) -> Result<()> {
        self.entities.clear();
        self.unique_entities.store(0, Ordering::Relaxed);
        *self.last_updated.lock() = self.ctx.now();
        info!("All stats reset");
        self.save()
    }

    /// Drop one entity's record and persist immediately.
    ///
    /// # Errors
    /// Returns [`SightlineError::EntityNotFound`] if `id` has no record, or
    /// the save error.
    pub fn reset_one(&self, id: EntityId) -> Result<AggregateStats> {
        let (_, removed) = self
            .entities
            .remove(&id)
            .ok_or(SightlineError::EntityNotFound(id))?;
        // The closure always returns `Some`, so the update cannot fail. It
        // saturates because a header loaded from disk may undercount.
        let _ = self
            .unique_entities
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        *self.last_updated.lock() = self.ctx.now();
        info!(entity = %id, "Entity stats reset");
        self.save()?;
        Ok(removed)
    }

    /// The aggregate whose display name matches `name`, ignoring case. If
    /// several entities share the name, the most recently seen wins.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<(EntityId, AggregateStats)> {
        let needle = name.to_lowercase();
        self.entities
            .iter()
            .filter(|e| e.name.to_lowercase() == needle)
            .max_by_key(|e| e.last_seen)
            .map(|e| (*e.key(), e.value().clone()))
    }

    /// Clone of one entity's aggregate.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<AggregateStats> {
        self.entities.get(&id).map(|s| s.clone())
    }

    /// Every aggregate, ordered by entity id.
    #[must_use]
    pub fn all(&self) -> BTreeMap<EntityId, AggregateStats> {
        self.entities
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Unique-entity counter.
    #[must_use]
    pub fn unique_entities(&self) -> u64 {
        self.unique_entities.load(Ordering::Relaxed)
    }

    /// Last time any record changed.
    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        *self.last_updated.lock()
    }

    /// Server identity written to the file header.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Path of the durable file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entities with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity has a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Point-in-time copy of the whole store in file form.
    #[must_use]
    pub fn snapshot(&self) -> StatsFile {
        StatsFile {
            version: STATS_FILE_VERSION,
            server_info: ServerInfo {
                server_name: self.server_name.clone(),
                last_updated: self.last_updated(),
                total_unique_entities: self.unique_entities(),
            },
            entities: self.all(),
        }
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// `dir/stem.ext`, or `dir/stem_N.ext` for the first free N.
fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Delete all but the `keep` most recently modified backups in `dir`.
fn prune_backups(dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"));
        if !is_backup {
            continue;
        }
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        backups.push((modified, path));
    }
    if backups.len() <= keep {
        return Ok(0);
    }

    backups.sort();
    let excess = backups.len() - keep;
    for (_, path) in &backups[..excess] {
        fs::remove_file(path)?;
        debug!(path = %path.display(), "Old backup removed");
    }
    Ok(excess)
}

/// One line of the CSV export.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CsvRow<'a> {
    id: EntityId,
    name: &'a str,
    first_seen: String,
    last_seen: String,
    total_sessions: u64,
    total_online_time: u64,
    appearances: usize,
}

impl<'a> CsvRow<'a> {
    fn new(id: EntityId, stats: &'a AggregateStats) -> Self {
        Self {
            id,
            name: &stats.name,
            first_seen: stats.first_seen.format(CSV_TIMESTAMP).to_string(),
            last_seen: stats.last_seen.format(CSV_TIMESTAMP).to_string(),
            total_sessions: stats.total_sessions,
            total_online_time: stats.total_online_time_ms,
            appearances: stats.appearances.len(),
        }
    }
}
