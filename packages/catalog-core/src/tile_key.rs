//! Hierarchical quadtree tile addressing.
//!
//! A [`TileKey`] identifies a tile by its `level` (depth in the quadtree,
//! `0..LEVEL_COUNT`) and a Morton-coded `quadkey`. This mirrors the `TileKey`
//! wire contract described in spec §3: `parent`, `child`, `is_parent_of`,
//! `is_child_of`, and the depth-bounded sub-quadkey used by the binary
//! quadtree index (spec §4.4).

use std::fmt;

/// Maximum supported tile level. Two bits of level plus `2*level` bits of
/// Morton code must fit in a `u64` quadkey; 31 keeps headroom for the
/// `HereTile`-style root-relative encoding used by the blob format.
pub const LEVEL_COUNT: u32 = 32;

/// A hierarchical quadtree tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    level: u32,
    quadkey: u64,
}

impl TileKey {
    /// Tile at the given level with the given Morton-coded quadkey.
    ///
    /// # Panics
    ///
    /// Panics if `level >= LEVEL_COUNT`.
    #[must_use]
    pub fn new(level: u32, quadkey: u64) -> Self {
        assert!(level < LEVEL_COUNT, "level {level} out of range [0, {LEVEL_COUNT})");
        Self { level, quadkey }
    }

    /// The root tile (level 0, quadkey 0).
    #[must_use]
    pub const fn root() -> Self {
        Self { level: 0, quadkey: 0 }
    }

    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub const fn quadkey(&self) -> u64 {
        self.quadkey
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    /// Parent tile, or `self` if already root.
    #[must_use]
    pub fn parent(&self) -> Self {
        if self.level == 0 {
            return *self;
        }
        Self {
            level: self.level - 1,
            quadkey: self.quadkey >> 2,
        }
    }

    /// The `index`-th child (`0..4`) of this tile.
    ///
    /// # Panics
    ///
    /// Panics if `index >= 4` or the resulting level would overflow.
    #[must_use]
    pub fn child(&self, index: u8) -> Self {
        assert!(index < 4, "child index {index} out of range [0, 4)");
        Self::new(self.level + 1, (self.quadkey << 2) | u64::from(index))
    }

    /// Whether `self` is a (possibly indirect) parent of `other`.
    #[must_use]
    pub fn is_parent_of(&self, other: &Self) -> bool {
        other.is_child_of(self)
    }

    /// Whether `self` is a (possibly indirect) child of `other`.
    #[must_use]
    pub fn is_child_of(&self, other: &Self) -> bool {
        if self.level <= other.level {
            return false;
        }
        let shift = self.level - other.level;
        self.quadkey >> shift == other.quadkey
    }

    /// Sub-quadkey of `self` relative to `root`, as stored in the binary
    /// quadtree blob (spec §3). `self` must be at or below `root`'s level
    /// and within `root`'s subtree; the result is the bits added below
    /// `root`, with a leading 1 marking the depth (so depth 0 encodes as
    /// `1`, matching the source SDK's `HereTile` sub-quad convention).
    #[must_use]
    pub fn added_sub_here_tile(&self, root: &Self) -> Option<u16> {
        if !self.is_child_of(root) && self != root {
            return None;
        }
        let depth = self.level - root.level;
        if depth > 4 {
            return None;
        }
        let relative = self.quadkey - (root.quadkey << (2 * depth));
        let marker = 1u64 << (2 * depth);
        Some(u16::try_from(marker | relative).expect("depth <= 4 fits in u16"))
    }

    /// Inverse of [`Self::added_sub_here_tile`]: reconstructs the
    /// descendant tile from a root and a sub-quadkey read out of a blob.
    #[must_use]
    pub fn from_sub_here_tile(root: &Self, sub_quadkey: u16) -> Self {
        let sub = u64::from(sub_quadkey);
        let depth = (63 - sub.leading_zeros()) / 2;
        let marker = 1u64 << (2 * depth);
        let relative = sub - marker;
        Self::new(root.level + depth, (root.quadkey << (2 * depth)) + relative)
    }

    /// Returns `self` re-rooted at `new_level`, truncating or
    /// (zero-)extending the quadkey as needed. Used by the prefetch
    /// engine's level-promotion step (spec §4.8).
    #[must_use]
    pub fn changed_level_to(&self, new_level: u32) -> Self {
        if new_level == self.level {
            return *self;
        }
        if new_level < self.level {
            let shift = self.level - new_level;
            Self::new(new_level, self.quadkey >> shift)
        } else {
            let shift = new_level - self.level;
            Self::new(new_level, self.quadkey << shift)
        }
    }

    #[must_use]
    pub fn changed_level_by(&self, delta: i32) -> Self {
        let new_level = (i64::from(self.level) + i64::from(delta)).max(0) as u32;
        self.changed_level_to(new_level)
    }

    /// Full Morton-coded 64-bit key as stored in the quadtree blob's
    /// `root_quadkey` / `parent_entries[].quadkey` fields: level in the top
    /// byte, quadkey in the low bits (the "HERE tile" convention).
    #[must_use]
    pub fn to_quadkey64(&self) -> u64 {
        (u64::from(self.level) << 58) | self.quadkey
    }

    #[must_use]
    pub fn from_quadkey64(key: u64) -> Self {
        let level = (key >> 58) as u32;
        let quadkey = key & ((1u64 << 58) - 1);
        Self { level, quadkey }
    }

    /// Nearest ancestor whose level is a multiple of `step` (used to find
    /// the root of the depth-4 quadtree blob covering this tile).
    #[must_use]
    pub fn nearest_aligned_ancestor(&self, step: u32) -> Self {
        let aligned_level = (self.level / step) * step;
        self.changed_level_to(aligned_level)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.level, self.quadkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_child_roundtrip() {
        let root = TileKey::root();
        let child = root.child(2);
        assert_eq!(child.level(), 1);
        assert_eq!(child.parent(), root);
        assert!(root.is_parent_of(&child));
        assert!(child.is_child_of(&root));
    }

    #[test]
    fn grandchild_relationships() {
        let root = TileKey::root();
        let child = root.child(1);
        let grandchild = child.child(3);
        assert!(root.is_parent_of(&grandchild));
        assert!(grandchild.is_child_of(&root));
        assert!(!grandchild.is_parent_of(&root));
    }

    #[test]
    fn unrelated_tiles_are_not_parent_child() {
        let a = TileKey::root().child(0);
        let b = TileKey::root().child(1);
        assert!(!a.is_parent_of(&b));
        assert!(!b.is_child_of(&a));
    }

    #[test]
    fn sub_here_tile_roundtrip() {
        let root = TileKey::new(4, 7);
        let descendant = root.child(2).child(0).child(3);
        let sub = descendant.added_sub_here_tile(&root).unwrap();
        let recovered = TileKey::from_sub_here_tile(&root, sub);
        assert_eq!(recovered, descendant);
    }

    #[test]
    fn sub_here_tile_at_root_is_marker_one() {
        let root = TileKey::new(2, 5);
        assert_eq!(root.added_sub_here_tile(&root), Some(1));
    }

    #[test]
    fn changed_level_to_truncates_and_extends() {
        let tile = TileKey::new(5, 0b10_11_01);
        let up = tile.changed_level_to(3);
        assert_eq!(up.level(), 3);
        assert_eq!(up, tile.parent().parent());

        let down = up.changed_level_to(5);
        assert_eq!(down.level(), 5);
    }

    #[test]
    fn quadkey64_roundtrip() {
        let tile = TileKey::new(9, 123_456);
        let packed = tile.to_quadkey64();
        assert_eq!(TileKey::from_quadkey64(packed), tile);
    }

    #[test]
    fn nearest_aligned_ancestor_rounds_down() {
        let tile = TileKey::new(10, 0);
        assert_eq!(tile.nearest_aligned_ancestor(4).level(), 8);
        let tile2 = TileKey::new(8, 0);
        assert_eq!(tile2.nearest_aligned_ancestor(4).level(), 8);
    }
}
