//! Freshness-bounded sighting cache.
//!
//! Holds the latest [`Observation`] per entity, bounded both by a TTL and a
//! maximum entry count. Every upsert runs a two-phase cleanup:
//!
//! ```text
//! upsert ──▶ insert/refresh ──▶ TTL sweep ──▶ size bound (oldest last_seen first)
//! ```
//!
//! Both phases decide what to remove from a snapshot, then re-check the
//! live entry with [`DashMap::remove_if`] so an entry refreshed by a
//! concurrent upsert in the meantime survives.
//!
//! TTL is enforced by [`ObservationCache::query`] and
//! [`ObservationCache::is_fresh`]; [`ObservationCache::lookup`] returns
//! whatever is stored.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::config::{CacheConfig, SortMode};
use crate::context::{TrackerContext, to_delta};
use crate::metrics::{TrackerCounters, spans};
use crate::types::{EntityId, Observation, Position};

/// A cached sighting plus the time it was last refreshed.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The latest observation for this entity.
    pub observation: Observation,
    /// When the entry was last upserted.
    pub last_seen: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now.signed_duration_since(self.last_seen) > ttl
    }
}

/// Secondary predicate applied by [`ObservationCache::filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Keep entries at most N blocks away.
    Distance,
    /// Keep entries with an exact team tag.
    Team,
    /// Keep entries whose zone contains a substring (case-insensitive).
    Zone,
}

impl FilterKind {
    /// Parse a filter type name; `biome` is accepted for `zone`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "distance" => Some(Self::Distance),
            "team" => Some(Self::Team),
            "zone" | "biome" => Some(Self::Zone),
            _ => None,
        }
    }
}

/// Summary of the cache's current state.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Entries currently stored (fresh or not).
    pub entries: usize,
    /// Configured maximum.
    pub max_entries: usize,
    /// Configured lifetime.
    pub ttl: Duration,
    /// Capture time of the oldest stored observation.
    pub oldest_entry: Option<DateTime<Utc>>,
}

/// Concurrent, bounded map of entity id → latest sighting.
pub struct ObservationCache {
    entries: DashMap<EntityId, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
    ttl_delta: TimeDelta,
    ctx: TrackerContext,
}

impl std::fmt::Debug for ObservationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationCache")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ObservationCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: &CacheConfig, ctx: TrackerContext) -> Self {
        let ttl = config.ttl();
        Self {
            entries: DashMap::new(),
            max_entries: config.max_entries.max(1),
            ttl,
            ttl_delta: to_delta(ttl),
            ctx,
        }
    }

    /// Insert or replace the entry for `observation.id()`, refresh its
    /// `last_seen`, then run a cleanup pass.
    pub fn upsert(&self, observation: Observation) {
        let now = self.ctx.now();
        let id = observation.id();
        self.entries.insert(
            id,
            CacheEntry {
                observation,
                last_seen: now,
            },
        );
        self.cleanup(now, id);
    }

    /// The stored observation for `id`, without a freshness check.
    #[must_use]
    pub fn lookup(&self, id: EntityId) -> Option<Observation> {
        self.entries.get(&id).map(|e| e.observation.clone())
    }

    /// The stored observation whose display name matches `name`, ignoring
    /// case and without a freshness check. If several entities share the
    /// name, the most recently seen wins.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Observation> {
        let needle = name.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.observation.name().to_lowercase() == needle)
            .max_by_key(|e| e.last_seen)
            .map(|e| e.observation.clone())
    }

    /// Whether `id` is cached and within TTL.
    #[must_use]
    pub fn is_fresh(&self, id: EntityId) -> bool {
        let now = self.ctx.now();
        self.entries
            .get(&id)
            .is_some_and(|e| !e.is_expired(now, self.ttl_delta))
    }

    /// Fresh entries within `max_distance` of `origin`, with distance and
    /// direction recomputed from `origin`, ordered by `sort`.
    ///
    /// `None` leaves the snapshot in map iteration order.
    #[must_use]
    pub fn query(
        &self,
        origin: Position,
        max_distance: f64,
        sort: Option<SortMode>,
    ) -> Vec<Observation> {
        let now = self.ctx.now();
        let mut visible: Vec<Observation> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now, self.ttl_delta))
            .map(|e| e.observation.relative_to(origin))
            .filter(|o| o.distance() <= max_distance)
            .collect();

        if let Some(mode) = sort {
            sort_observations(&mut visible, mode);
        }
        visible
    }

    /// [`query`](Self::query) by distance, then a secondary predicate named
    /// by `filter_type`.
    ///
    /// An unknown filter type, or a `distance` value that does not parse,
    /// returns the unfiltered result.
    #[must_use]
    pub fn filter(
        &self,
        origin: Position,
        max_distance: f64,
        filter_type: &str,
        filter_value: &str,
    ) -> Vec<Observation> {
        let mut visible = self.query(origin, max_distance, Some(SortMode::Distance));

        match FilterKind::parse(filter_type) {
            Some(FilterKind::Distance) => match filter_value.trim().parse::<f64>() {
                Ok(limit) => visible.retain(|o| o.distance() <= limit),
                Err(_) => debug!(
                    value = filter_value,
                    "Unparseable distance filter, returning unfiltered"
                ),
            },
            Some(FilterKind::Team) => visible.retain(|o| o.team_tag() == filter_value),
            Some(FilterKind::Zone) => {
                let needle = filter_value.to_lowercase();
                visible.retain(|o| o.zone().to_lowercase().contains(&needle));
            }
            None => debug!(filter_type, "Unknown filter type, returning unfiltered"),
        }
        visible
    }

    /// Every stored observation, fresh or not.
    #[must_use]
    pub fn all(&self) -> Vec<Observation> {
        self.entries.iter().map(|e| e.observation.clone()).collect()
    }

    /// Remove one entity. Returns its observation if it was cached.
    pub fn remove(&self, id: EntityId) -> Option<Observation> {
        self.entries.remove(&id).map(|(_, e)| e.observation)
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry count, bounds and oldest capture time.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            ttl: self.ttl,
            oldest_entry: self.entries.iter().map(|e| e.observation.captured_at()).min(),
        }
    }

    /// TTL sweep followed by the size bound. `keep` (the entry just
    /// upserted) is never chosen by the size bound.
    fn cleanup(&self, now: DateTime<Utc>, keep: EntityId) {
        let _span = tracing::trace_span!(spans::CACHE_CLEANUP).entered();
        let ttl = self.ttl_delta;

        let expired: Vec<EntityId> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now, ttl))
            .map(|e| *e.key())
            .collect();
        let mut expired_count = 0u64;
        for id in expired {
            if self
                .entries
                .remove_if(&id, |_, e| e.is_expired(now, ttl))
                .is_some()
            {
                expired_count += 1;
            }
        }

        let evicted_count = if self.entries.len() > self.max_entries {
            let by_age: Vec<(EntityId, DateTime<Utc>)> = self
                .entries
                .iter()
                .filter(|e| *e.key() != keep)
                .map(|e| (*e.key(), e.last_seen))
                .collect();
            let excess = self.entries.len().saturating_sub(self.max_entries);
            self.evict_oldest(by_age, excess)
        } else {
            0
        };

        if expired_count + evicted_count > 0 {
            TrackerCounters::add(&self.ctx.counters.cache_expired, expired_count);
            TrackerCounters::add(&self.ctx.counters.cache_evicted, evicted_count);
            trace!(
                expired = expired_count,
                evicted = evicted_count,
                remaining = self.entries.len(),
                "Cache cleanup"
            );
        }
    }

    /// Remove up to `excess` entries from a `(id, last_seen)` snapshot,
    /// oldest first. An entry whose `last_seen` moved past its snapshot value
    /// is skipped and the next-oldest goes instead. Returns how many were
    /// removed.
    pub(crate) fn evict_oldest(
        &self,
        mut by_age: Vec<(EntityId, DateTime<Utc>)>,
        mut excess: usize,
    ) -> u64 {
        by_age.sort_by_key(|&(_, seen)| seen);
        let mut evicted = 0u64;
        for (id, seen) in by_age {
            if excess == 0 {
                break;
            }
            if self
                .entries
                .remove_if(&id, |_, e| e.last_seen <= seen)
                .is_some()
            {
                excess -= 1;
                evicted += 1;
            }
        }
        evicted
    }
}

/// Order observations in place. Ties keep their relative order.
pub fn sort_observations(observations: &mut [Observation], mode: SortMode) {
    let cmp: fn(&Observation, &Observation) -> Ordering = match mode {
        SortMode::Distance => |a, b| a.distance().total_cmp(&b.distance()),
        SortMode::Name => |a, b| a.name().cmp(b.name()),
        SortMode::Team => |a, b| a.team_tag().cmp(b.team_tag()),
        SortMode::Zone => |a, b| a.zone().cmp(b.zone()),
    };
    observations.sort_by(cmp);
}
