use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Region side length, in chunks, used when no configuration overrides it.
pub const DEFAULT_REGION_SIDE: i32 = 32;
/// Largest supported region side. Keeps [`ChunkCoord::linear_key`] inside
/// `i64` for every `i32` layer.
pub const MAX_REGION_SIDE: i32 = 1 << 15;

/// Identifies one chunk in the world grid. `y` is the vertical chunk layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, z: i32, y: i32) -> Self {
        Self { x, z, y }
    }

    /// Chunk containing a world-space position, for chunks of
    /// `width` x `width` x `height` world units.
    pub fn containing(pos: Vec3, width: f32, height: f32) -> Self {
        Self {
            x: (pos.x / width).floor() as i32,
            z: (pos.z / width).floor() as i32,
            y: (pos.y / height).floor() as i32,
        }
    }

    /// Region owning this chunk. Uses floor division, so negative
    /// coordinates map to negative regions.
    pub fn region(&self, side: i32) -> RegionCoord {
        RegionCoord {
            x: self.x.div_euclid(side),
            z: self.z.div_euclid(side),
        }
    }

    /// Key of this chunk inside its region's index.
    ///
    /// Horizontal coordinates are made region-local and the vertical layer is
    /// folded in, so two layers of one column never share a key. For `y == 0`
    /// this is `z * side + x` over local coordinates. `side` must be in
    /// `1..=MAX_REGION_SIDE`.
    pub fn linear_key(&self, side: i32) -> i64 {
        let side = i64::from(side);
        let lx = i64::from(self.x).rem_euclid(side);
        let lz = i64::from(self.z).rem_euclid(side);
        (i64::from(self.y) * side + lz) * side + lx
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.z, self.y)
    }
}

/// Identifies one square region of chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionCoord {
    pub x: i32,
    pub z: i32,
}

impl RegionCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Whether `coord` falls inside this region for the given side length.
    pub fn contains(&self, coord: ChunkCoord, side: i32) -> bool {
        coord.region(side) == *self
    }

    /// File stem shared by the region's data, index and hole files.
    pub fn file_stem(&self) -> String {
        format!("r{}x{}", self.x, self.z)
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}x{}", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn region_uses_floor_division() {
        assert_eq!(ChunkCoord::new(5, 5, 0).region(32), RegionCoord::new(0, 0));
        assert_eq!(ChunkCoord::new(32, 0, 0).region(32), RegionCoord::new(1, 0));
        assert_eq!(ChunkCoord::new(-1, -32, 0).region(32), RegionCoord::new(-1, -1));
        assert_eq!(ChunkCoord::new(-33, 31, 4).region(32), RegionCoord::new(-2, 0));
    }

    #[test]
    fn region_contains() {
        let region = RegionCoord::new(1, 0);
        assert!(region.contains(ChunkCoord::new(40, 3, 0), 32));
        assert!(!region.contains(ChunkCoord::new(5, 3, 0), 32));
    }

    #[test]
    fn linear_key_matches_flat_layout_on_layer_zero() {
        let c = ChunkCoord::new(5, 7, 0);
        assert_eq!(c.linear_key(32), 7 * 32 + 5);
        // Same local position in another region.
        let c = ChunkCoord::new(32 + 5, -32 + 7, 0);
        assert_eq!(c.linear_key(32), 7 * 32 + 5);
    }

    #[test]
    fn linear_key_unique_within_region() {
        let mut seen = HashSet::new();
        for y in -2..3 {
            for z in 0..8 {
                for x in 0..8 {
                    assert!(seen.insert(ChunkCoord::new(x, z, y).linear_key(8)));
                }
            }
        }
        assert_eq!(seen.len(), 5 * 8 * 8);
    }

    #[test]
    fn linear_key_fits_at_largest_side() {
        let side = MAX_REGION_SIDE;
        let top = ChunkCoord::new(side - 1, side - 1, i32::MAX);
        let bottom = ChunkCoord::new(0, 0, i32::MIN);
        assert!(top.linear_key(side) > 0);
        assert!(bottom.linear_key(side) < 0);
        assert_ne!(
            ChunkCoord::new(0, 0, 4).linear_key(side),
            ChunkCoord::new(0, 0, 5).linear_key(side)
        );
    }

    #[test]
    fn containing_position() {
        let c = ChunkCoord::containing(Vec3::new(17.0, -1.0, -0.5), 16.0, 100.0);
        assert_eq!(c, ChunkCoord::new(1, -1, -1));
    }

    #[test]
    fn file_stem_format() {
        assert_eq!(RegionCoord::new(-1, 3).file_stem(), "r-1x3");
    }
}
