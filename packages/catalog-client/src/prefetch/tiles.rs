//! Tile root slicing and filtering for the tile-prefetch pipeline
//! (spec §4.8).

use catalog_core::TileKey;
use std::collections::BTreeMap;

use crate::quadtree::IndexData;

const QUADTREE_DEPTH: u32 = 4;
const ROOT_GRANULARITY: u32 = QUADTREE_DEPTH + 1;

/// Computes the minimal set of depth-4-subtree roots (and the fetch depth
/// requested at each) that together cover every tile in `tiles` within
/// `[min_level, max_level]`.
#[must_use]
pub fn slice_tile_roots(tiles: &[TileKey], min_level: u32, max_level: u32) -> BTreeMap<TileKey, u32> {
    let mut roots = BTreeMap::new();
    for &tile in tiles {
        let effective_min = if tile.level() < min_level { min_level } else { tile.level() };
        let aligned_min = align_min(effective_min, max_level);
        let root = tile.changed_level_to(aligned_min);
        let depth = max_level.saturating_sub(aligned_min);
        split_along_path(root, depth, &tile, min_level, &mut roots);
    }
    roots
}

/// Lowers `min_level` toward 0 until `max_level - min + 1` is a multiple
/// of [`ROOT_GRANULARITY`] (depth 4 plus the root level itself).
fn align_min(min_level: u32, max_level: u32) -> u32 {
    let mut lo = min_level;
    loop {
        let span = max_level.saturating_sub(lo) + 1;
        if span % ROOT_GRANULARITY == 0 || lo == 0 {
            return lo;
        }
        lo -= 1;
    }
}

/// Recursively splits a root whose requested depth exceeds 4, descending
/// toward `target` one depth-4 hop at a time and discarding subroots that
/// fall entirely above the user's minimum level.
fn split_along_path(root: TileKey, depth: u32, target: &TileKey, min_level: u32, out: &mut BTreeMap<TileKey, u32>) {
    if depth <= QUADTREE_DEPTH {
        out.entry(root).and_modify(|d| *d = (*d).max(depth)).or_insert(depth);
        return;
    }
    if root.level() + QUADTREE_DEPTH < min_level {
        return;
    }
    out.entry(root).and_modify(|d| *d = (*d).max(QUADTREE_DEPTH)).or_insert(QUADTREE_DEPTH);

    let next_level = root.level() + QUADTREE_DEPTH;
    let next_root = target.changed_level_to(next_level);
    split_along_path(next_root, depth - QUADTREE_DEPTH, target, min_level, out);
}

/// Drops entries outside `[min_level, max_level]` that are also unrelated
/// (neither ancestor nor descendant) to every user-requested tile.
#[must_use]
pub fn filter_by_level(items: Vec<IndexData>, min_level: u32, max_level: u32, user_tiles: &[TileKey]) -> Vec<IndexData> {
    items
        .into_iter()
        .filter(|item| {
            let level = item.tile.level();
            if level < min_level || level > max_level {
                return false;
            }
            user_tiles
                .iter()
                .any(|user| *user == item.tile || item.tile.is_parent_of(user) || item.tile.is_child_of(user))
        })
        .collect()
}

/// Keeps only entries matching the user's explicit tile list. When
/// `aggregated`, a missing user tile is resolved to its nearest loaded
/// ancestor; otherwise (or if no ancestor is loaded) it is recorded with
/// `None` so the caller can surface a per-tile NotFound.
#[must_use]
pub fn filter_by_list(items: &[IndexData], user_tiles: &[TileKey], aggregated: bool) -> Vec<(TileKey, Option<IndexData>)> {
    let mut result = Vec::with_capacity(user_tiles.len());
    for &tile in user_tiles {
        if let Some(found) = items.iter().find(|item| item.tile == tile) {
            result.push((tile, Some(found.clone())));
            continue;
        }
        let mut resolved = None;
        if aggregated {
            let mut ancestor = tile;
            while !ancestor.is_root() {
                ancestor = ancestor.parent();
                if let Some(found) = items.iter().find(|item| item.tile == ancestor) {
                    resolved = Some(found.clone());
                    break;
                }
            }
        }
        result.push((tile, resolved));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_tile_roots_covers_single_tile_within_depth_4() {
        let tile = TileKey::new(6, 0b10_11_01_10);
        let roots = slice_tile_roots(&[tile], 0, 9);
        assert!(!roots.is_empty());
        for (root, depth) in &roots {
            assert!(*depth <= QUADTREE_DEPTH);
            assert!(tile.is_child_of(root) || *root == tile);
        }
    }

    #[test]
    fn filter_by_level_drops_unrelated_and_out_of_range() {
        let user_tile = TileKey::new(5, 3);
        let matching = fake_index(user_tile);
        let unrelated = fake_index(TileKey::new(5, 99));
        let filtered = filter_by_level(vec![matching.clone(), unrelated], 0, 10, &[user_tile]);
        assert_eq!(filtered, vec![matching]);
    }

    #[test]
    fn filter_by_list_aggregates_to_nearest_loaded_ancestor() {
        let root = TileKey::root();
        let child = root.child(1);
        let grandchild = child.child(2);
        let loaded = fake_index(child);
        let result = filter_by_list(&[loaded.clone()], &[grandchild], true);
        assert_eq!(result, vec![(grandchild, Some(loaded))]);
    }

    #[test]
    fn filter_by_list_without_aggregation_reports_none() {
        let root = TileKey::root();
        let child = root.child(1);
        let grandchild = child.child(2);
        let loaded = fake_index(child);
        let result = filter_by_list(&[loaded], &[grandchild], false);
        assert_eq!(result, vec![(grandchild, None)]);
    }

    fn fake_index(tile: TileKey) -> IndexData {
        IndexData {
            tile,
            version: 1,
            data_size: 0,
            compressed_data_size: 0,
            data_handle: "h".to_string(),
            checksum: None,
            additional_metadata: None,
            crc: None,
        }
    }
}
