//! Shared coordinate types for the regionstore workspace.
//!
//! # Invariants
//! - A chunk belongs to exactly one region: `floor(x / R), floor(z / R)`.
//! - Linear keys are unique per chunk within one region.

mod types;

pub use types::{ChunkCoord, DEFAULT_REGION_SIDE, MAX_REGION_SIDE, RegionCoord};
