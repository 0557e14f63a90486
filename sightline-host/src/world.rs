//! In-memory world adapter.
//!
//! [`WorldSnapshot`] is the host-side view the tracker samples each tick:
//! who is watching, which entities are around, and which rectangular zones
//! (on the X/Z plane) label the map. Engines that keep their own entity
//! lists implement [`EntitySource`] and [`ZoneResolver`] directly instead.

use serde::{Deserialize, Serialize};
use sightline_core::{
    CandidateSample, EntityId, EntitySource, ObserverSample, Position, ZoneResolver,
};

/// Zone label used when no configured zone covers a position.
pub const DEFAULT_ZONE: &str = "unknown";

/// An axis-aligned zone on the X/Z plane. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Label reported for positions inside the zone.
    pub label: String,
    /// Lower X bound.
    pub min_x: f64,
    /// Lower Z bound.
    pub min_z: f64,
    /// Upper X bound.
    pub max_x: f64,
    /// Upper Z bound.
    pub max_z: f64,
}

impl Zone {
    /// Zone spanning the two corners, in any order.
    #[must_use]
    pub fn new(label: impl Into<String>, a: (f64, f64), b: (f64, f64)) -> Self {
        Self {
            label: label.into(),
            min_x: a.0.min(b.0),
            min_z: a.1.min(b.1),
            max_x: a.0.max(b.0),
            max_z: a.1.max(b.1),
        }
    }

    /// Whether `pos` falls inside the zone.
    #[must_use]
    pub fn contains(&self, pos: Position) -> bool {
        (self.min_x..=self.max_x).contains(&pos.x) && (self.min_z..=self.max_z).contains(&pos.z)
    }
}

/// Mutable snapshot of a world: observer, entities and zones.
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    observer: Option<ObserverSample>,
    entities: Vec<CandidateSample>,
    zones: Vec<Zone>,
    default_zone: String,
}

impl Default for WorldSnapshot {
    fn default() -> Self {
        Self::new(DEFAULT_ZONE)
    }
}

impl WorldSnapshot {
    /// Empty world whose unzoned positions report `default_zone`.
    #[must_use]
    pub fn new(default_zone: impl Into<String>) -> Self {
        Self {
            observer: None,
            entities: Vec::new(),
            zones: Vec::new(),
            default_zone: default_zone.into(),
        }
    }

    /// Place (or move) the observer.
    pub fn set_observer(&mut self, id: EntityId, position: Position, look: Position) {
        self.observer = Some(ObserverSample { id, position, look });
    }

    /// Remove the observer; detection cycles are skipped until one is set.
    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Add an entity and return its new id.
    pub fn spawn(&mut self, name: impl Into<String>, position: Position) -> EntityId {
        let id = EntityId::new();
        self.insert(id, name, position);
        id
    }

    /// Add or replace an entity with a known id.
    pub fn insert(&mut self, id: EntityId, name: impl Into<String>, position: Position) {
        let name = name.into();
        if let Some(existing) = self.entities.iter_mut().find(|e| e.id == id) {
            existing.name = name;
            existing.position = position;
        } else {
            self.entities.push(CandidateSample { id, name, position });
        }
    }

    /// Move an entity. Returns `false` if it is not in the world.
    pub fn move_to(&mut self, id: EntityId, position: Position) -> bool {
        match self.entities.iter_mut().find(|e| e.id == id) {
            Some(entity) => {
                entity.position = position;
                true
            }
            None => false,
        }
    }

    /// Remove an entity. Returns `false` if it was not in the world.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let before = self.entities.len();
        self.entities.retain(|e| e.id != id);
        self.entities.len() != before
    }

    /// Add a zone. Earlier zones win where zones overlap.
    pub fn add_zone(&mut self, zone: Zone) {
        self.zones.push(zone);
    }

    /// Number of entities (excluding the observer).
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl EntitySource for WorldSnapshot {
    fn observer(&self) -> Option<ObserverSample> {
        self.observer
    }

    fn candidates(&self) -> Vec<CandidateSample> {
        self.entities.clone()
    }
}

impl ZoneResolver for WorldSnapshot {
    fn zone_at(&self, position: Position) -> String {
        self.zones
            .iter()
            .find(|z| z.contains(position))
            .map_or_else(|| self.default_zone.clone(), |z| z.label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zones_resolve_first_match_then_default() {
        let mut world = WorldSnapshot::new("ocean");
        world.add_zone(Zone::new("village", (10.0, 10.0), (-10.0, -10.0)));
        world.add_zone(Zone::new("plains", (-100.0, -100.0), (100.0, 100.0)));

        assert_eq!(world.zone_at(Position::new(0.0, 70.0, 0.0)), "village");
        assert_eq!(world.zone_at(Position::new(50.0, 70.0, 0.0)), "plains");
        assert_eq!(world.zone_at(Position::new(500.0, 70.0, 0.0)), "ocean");
        // Bounds are inclusive.
        assert_eq!(world.zone_at(Position::new(10.0, 0.0, -10.0)), "village");
    }

    #[test]
    fn entity_lifecycle() {
        let mut world = WorldSnapshot::default();
        let id = world.spawn("Steve", Position::new(1.0, 64.0, 1.0));
        assert_eq!(world.entity_count(), 1);

        assert!(world.move_to(id, Position::new(5.0, 64.0, 5.0)));
        assert_eq!(world.candidates()[0].position, Position::new(5.0, 64.0, 5.0));

        world.insert(id, "Steve2", Position::new(6.0, 64.0, 6.0));
        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.candidates()[0].name, "Steve2");

        assert!(world.despawn(id));
        assert!(!world.despawn(id));
        assert!(!world.move_to(id, Position::default()));
    }

    #[test]
    fn observer_is_optional() {
        let mut world = WorldSnapshot::default();
        assert!(world.observer().is_none());

        let me = EntityId::new();
        world.set_observer(me, Position::default(), Position::new(0.0, 0.0, 1.0));
        assert_eq!(world.observer().map(|o| o.id), Some(me));

        world.clear_observer();
        assert!(world.observer().is_none());
    }

    #[test]
    fn zones_deserialize_from_json() {
        let zone: Zone = serde_json::from_str(
            r#"{"label":"spawn","min_x":-16.0,"min_z":-16.0,"max_x":16.0,"max_z":16.0}"#,
        )
        .expect("zone");
        assert!(zone.contains(Position::new(0.0, 0.0, 0.0)));
        assert!(!zone.contains(Position::new(17.0, 0.0, 0.0)));
    }
}
