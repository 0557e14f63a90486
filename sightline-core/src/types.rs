//! Core type definitions for the sightline tracker.
//!
//! All persisted types are serializable; [`Observation`] is immutable once
//! built and carries its observer-relative fields precomputed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable unique identifier of a tracked entity (player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Create a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A point (or vector) in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Position {
    /// Build a position from its components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Component-wise `self - other`.
    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Dot product.
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance_to(self, other: Self) -> f64 {
        other.sub(self).length()
    }

    /// Unit vector in the same direction, or `None` for a zero vector.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len < f64::EPSILON {
            None
        } else {
            Some(Self::new(self.x / len, self.y / len, self.z / len))
        }
    }

    /// The integer block containing this position.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn block(self) -> BlockPos {
        BlockPos {
            x: self.x.floor() as i32,
            y: self.y.floor() as i32,
            z: self.z.floor() as i32,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Integer block coordinates, as stored in appearance history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPos {
    /// Block X.
    pub x: i32,
    /// Block Y.
    pub y: i32,
    /// Block Z.
    pub z: i32,
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// Coarse compass direction from the observer to an entity, on the X/Z plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// +X.
    East,
    /// +Z.
    South,
    /// -X.
    West,
    /// -Z.
    North,
}

impl Direction {
    /// Direction of `to` as seen from `from`.
    ///
    /// Uses `atan2(dz, dx)` in degrees: `[315, 45)` east, `[45, 135)` south,
    /// `[135, 225)` west, `[225, 315)` north.
    #[must_use]
    pub fn between(from: Position, to: Position) -> Self {
        let diff = to.sub(from);
        let mut angle = diff.z.atan2(diff.x).to_degrees();
        if angle < 0.0 {
            angle += 360.0;
        }
        if !(45.0..315.0).contains(&angle) {
            Self::East
        } else if angle < 135.0 {
            Self::South
        } else if angle < 225.0 {
            Self::West
        } else {
            Self::North
        }
    }

    /// Arrow glyph used in compact listings.
    #[must_use]
    pub fn arrow(self) -> &'static str {
        match self {
            Self::East => "→",
            Self::South => "↓",
            Self::West => "←",
            Self::North => "↑",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arrow())
    }
}

// ---------------------------------------------------------------------------
// Team tags
// ---------------------------------------------------------------------------

/// Team tag assigned to names without a colour prefix.
pub const DEFAULT_TEAM_TAG: &str = "§f";

/// Parse the team tag from a display name: a leading `§` plus the colour
/// code character, or [`DEFAULT_TEAM_TAG`].
#[must_use]
pub fn team_tag(name: &str) -> String {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some('§'), Some(code)) => format!("§{code}"),
        _ => DEFAULT_TEAM_TAG.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// A single positional sighting of an entity, with observer-relative
/// metadata derived at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    id: EntityId,
    name: String,
    position: Position,
    zone: String,
    captured_at: DateTime<Utc>,
    distance: f64,
    direction: Direction,
    team_tag: String,
}

impl Observation {
    /// Build an observation of `id` at `position`, seen from `observer`.
    #[must_use]
    pub fn new(
        id: EntityId,
        name: impl Into<String>,
        position: Position,
        zone: impl Into<String>,
        observer: Position,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        let team_tag = team_tag(&name);
        Self {
            id,
            name,
            position,
            zone: zone.into(),
            captured_at,
            distance: observer.distance_to(position),
            direction: Direction::between(observer, position),
            team_tag,
        }
    }

    /// Copy of this observation with distance and direction recomputed
    /// from a different observer position.
    #[must_use]
    pub fn relative_to(&self, origin: Position) -> Self {
        Self {
            distance: origin.distance_to(self.position),
            direction: Direction::between(origin, self.position),
            ..self.clone()
        }
    }

    /// Entity ID.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// World position.
    #[must_use]
    pub fn position(&self) -> Position {
        self.position
    }

    /// Zone (biome) label at capture time.
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Capture timestamp.
    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Distance to the observer.
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Compass direction from the observer.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Team tag parsed from the name.
    #[must_use]
    pub fn team_tag(&self) -> &str {
        &self.team_tag
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1} blocks) {} {}",
            self.name, self.distance, self.direction, self.zone
        )
    }
}
