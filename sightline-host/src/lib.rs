//! # sightline-host: Host Integration for Sightline
//!
//! This crate wires the engine-agnostic `sightline-core` components into
//! something a game client or server can drive.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │                 Host loop                │
//! │   ┌──────────────┐     ┌──────────────┐  │
//! │   │ WorldSnapshot│────▶│   Tracker    │  │
//! │   └──────────────┘     └──────┬───────┘  │
//! │                               ▼          │
//! │        ┌────────────────────────────┐    │
//! │        │       sightline-core       │    │
//! │        │ Detector · Cache · Stats   │    │
//! │        └────────────────────────────┘    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `world`: in-memory [`EntitySource`](sightline_core::EntitySource) and
//!   [`ZoneResolver`](sightline_core::ZoneResolver) with rectangular zones
//! - `tracker`: the application root (tick entry point, listings, stats
//!   commands, status, autosave lifecycle)
//! - `logging`: `tracing-subscriber` setup driven by `[general]` config

pub mod logging;
pub mod tracker;
pub mod world;

pub use tracker::{Tracker, TrackerStatus};
pub use world::{WorldSnapshot, Zone};
