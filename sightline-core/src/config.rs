//! Configuration for the sightline tracker.
//!
//! Maps directly to `sightline.toml`. Every field has a serde default so a
//! partial file (or an empty one) is valid; [`SightlineConfig::validate`]
//! enforces the supported ranges.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SightlineError};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SightlineConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Detection pipeline settings.
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Sighting cache bounds.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Statistics persistence.
    #[serde(default)]
    pub stats: StatsConfig,
    /// Listing preferences for the host's display layer.
    #[serde(default)]
    pub display: DisplayConfig,
}

impl SightlineConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `SightlineError::Config` if the TOML is invalid or a value is
    /// out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| SightlineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check every bounded knob against its allowed range.
    ///
    /// # Errors
    /// Returns `SightlineError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        let stats = &self.stats;
        check_range("detection.update_interval_ticks", detection.update_interval_ticks, 5, 100)?;
        check_range(
            "detection.max_detection_distance",
            detection.max_detection_distance,
            10.0,
            1000.0,
        )?;
        check_range("detection.fov_degrees", detection.fov_degrees, 30.0, 180.0)?;
        check_range("cache.lifetime_seconds", self.cache.lifetime_seconds, 60, 3600)?;
        check_range("cache.max_entries", self.cache.max_entries, 1, 100_000)?;
        check_range("stats.save_interval_seconds", stats.save_interval_seconds, 60, 3600)?;
        check_range("stats.max_file_size_bytes", stats.max_file_size_bytes, MIB, 100 * MIB)?;
        check_range("stats.backup_count", stats.backup_count, 1, 1000)?;
        check_range(
            "stats.rotation_keep_entities",
            stats.rotation_keep_entities,
            1,
            usize::MAX,
        )?;
        check_range("display.max_displayed", self.display.max_displayed, 1, 50)?;
        Ok(())
    }
}

const MIB: u64 = 1024 * 1024;

fn check_range<T>(key: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(SightlineError::Config(format!(
            "{key} = {value} is outside {min}..={max}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Master switch; when off, detection cycles are skipped entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub json_logs: bool,
    /// Server identity written into the stats file.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
            json_logs: false,
            server_name: default_server_name(),
        }
    }
}

/// Detection pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Run the pipeline every N host ticks.
    #[serde(default = "default_20")]
    pub update_interval_ticks: u32,
    /// Candidates further than this (blocks) are ignored.
    #[serde(default = "default_100_f64")]
    pub max_detection_distance: f64,
    /// Reject names that look like bots, NPCs or staff accounts.
    #[serde(default = "default_true")]
    pub filter_invalid_names: bool,
    /// Only admit candidates inside the observer's field of view.
    #[serde(default = "default_true")]
    pub fov_filter_enabled: bool,
    /// Full field-of-view angle in degrees.
    #[serde(default = "default_90_f64")]
    pub fov_degrees: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            update_interval_ticks: 20,
            max_detection_distance: 100.0,
            filter_invalid_names: true,
            fov_filter_enabled: true,
            fov_degrees: 90.0,
        }
    }
}

/// Sighting cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entities.
    #[serde(default = "default_100_usize")]
    pub max_entries: usize,
    /// Entries older than this are hidden from queries and swept.
    #[serde(default = "default_300")]
    pub lifetime_seconds: u64,
}

impl CacheConfig {
    /// The configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.lifetime_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            lifetime_seconds: 300,
        }
    }
}

/// Statistics persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Request a background save after every recorded appearance.
    #[serde(default = "default_true")]
    pub auto_save: bool,
    /// Debounce window between a save request and the write.
    #[serde(default = "default_300")]
    pub save_interval_seconds: u64,
    /// Rotation threshold for the durable file.
    #[serde(default = "default_10_mib")]
    pub max_file_size_bytes: u64,
    /// Copy the durable file into `backups/` before rotating.
    #[serde(default = "default_true")]
    pub auto_backup: bool,
    /// Number of backups to keep.
    #[serde(default = "default_10")]
    pub backup_count: usize,
    /// Entities kept (most recently seen first) when rotating.
    #[serde(default = "default_1000")]
    pub rotation_keep_entities: usize,
    /// Directory holding the stats file, `backups/` and `exports/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StatsConfig {
    /// The configured save debounce window.
    #[must_use]
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_seconds)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            save_interval_seconds: 300,
            max_file_size_bytes: default_10_mib(),
            auto_backup: true,
            backup_count: 10,
            rotation_keep_entities: 1000,
            data_dir: default_data_dir(),
        }
    }
}

/// Listing preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// How much detail each listed entity gets.
    #[serde(default)]
    pub mode: DisplayMode,
    /// Ordering of listed entities.
    #[serde(default)]
    pub sort_mode: SortMode,
    /// Maximum number of entities listed.
    #[serde(default = "default_10")]
    pub max_displayed: usize,
    /// Include block coordinates in detailed listings.
    #[serde(default = "default_true")]
    pub show_coordinates: bool,
    /// Include the zone label.
    #[serde(default = "default_true")]
    pub show_zone: bool,
    /// Include the direction arrow.
    #[serde(default = "default_true")]
    pub show_direction: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::default(),
            sort_mode: SortMode::default(),
            max_displayed: 10,
            show_coordinates: true,
            show_zone: true,
            show_direction: true,
        }
    }
}

/// Listing detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Name, distance, direction.
    #[default]
    Compact,
    /// Everything enabled in [`DisplayConfig`].
    Detailed,
    /// Name only.
    Minimal,
}

/// Ordering applied to cache queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Nearest first.
    #[default]
    Distance,
    /// Display name, ascending.
    Name,
    /// Team tag, ascending.
    Team,
    /// Zone label, ascending.
    #[serde(alias = "biome")]
    Zone,
}

impl FromStr for SortMode {
    type Err = SightlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "distance" => Ok(Self::Distance),
            "name" => Ok(Self::Name),
            "team" => Ok(Self::Team),
            "zone" | "biome" => Ok(Self::Zone),
            other => Err(SightlineError::Config(format!("unknown sort mode: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_server_name() -> String { "local".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from(".") }
fn default_10() -> usize { 10 }
fn default_20() -> u32 { 20 }
fn default_90_f64() -> f64 { 90.0 }
fn default_100_f64() -> f64 { 100.0 }
fn default_100_usize() -> usize { 100 }
fn default_300() -> u64 { 300 }
fn default_1000() -> usize { 1000 }
fn default_10_mib() -> u64 { 10 * MIB }
