//! Seams to the host world.
//!
//! The detector never talks to an engine directly. A host implements
//! [`EntitySource`] to expose who is watching and who is around, and
//! [`ZoneResolver`] to label positions.

use crate::types::{EntityId, Position};

/// The watching subject at sampling time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverSample {
    /// Observer's own id; candidates with this id are skipped.
    pub id: EntityId,
    /// Eye position.
    pub position: Position,
    /// Look vector. Need not be normalized.
    pub look: Position,
}

/// One entity near the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSample {
    /// Entity id.
    pub id: EntityId,
    /// Display name, possibly carrying a `§` team prefix.
    pub name: String,
    /// World position.
    pub position: Position,
}

/// Supplies raw sighting samples for one detection cycle.
pub trait EntitySource {
    /// The observer, or `None` when nobody is watching (no cycle runs).
    fn observer(&self) -> Option<ObserverSample>;

    /// Every entity the host considers nearby.
    fn candidates(&self) -> Vec<CandidateSample>;
}

/// Maps a position to an environment label (biome, region, room).
pub trait ZoneResolver {
    /// Zone label at `position`.
    fn zone_at(&self, position: Position) -> String;
}

impl<F> ZoneResolver for F
where
    F: Fn(Position) -> String,
{
    fn zone_at(&self, position: Position) -> String {
        self(position)
    }
}
