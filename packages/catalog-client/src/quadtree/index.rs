//! Binary quadtree index blob: encode/decode and `find`/`get_index_data`
//! (spec §3, §4.4).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use catalog_core::messages::{ParentQuadDto, QuadTreeResponse, SubQuadDto};
use catalog_core::model::{CatalogVersion, FieldMask};
use catalog_core::{ApiError, TileKey};

const BLOB_VERSION: u16 = 0;
const SUB_ENTRY_SIZE: usize = 6;
const PARENT_ENTRY_SIZE: usize = 12;

/// A single decoded quadtree entry (spec §3's tag-area fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexData {
    pub tile: TileKey,
    pub version: CatalogVersion,
    pub data_size: i64,
    pub compressed_data_size: i64,
    pub data_handle: String,
    pub checksum: Option<String>,
    pub additional_metadata: Option<String>,
    pub crc: Option<String>,
}

struct SubEntry {
    sub_quadkey: u16,
    tag_offset: u32,
}

struct ParentEntry {
    quadkey: u64,
    tag_offset: u32,
}

/// A parsed quadtree index blob: the root tile, depth, and sorted
/// sub/parent entry tables, plus the raw tag area for lazy decoding.
pub struct QuadTreeIndex {
    root: TileKey,
    depth: u8,
    subs: Vec<SubEntry>,
    parents: Vec<ParentEntry>,
    tag_area: Bytes,
}

fn io_error(message: impl Into<String>) -> ApiError {
    ApiError::invalid_argument(message)
}

impl QuadTreeIndex {
    /// Builds an index from a SAX-parsed `subQuads`/`parentQuads` response,
    /// sorting entries per spec §4.4's invariants.
    #[must_use]
    pub fn from_response(root: TileKey, depth: u8, response: QuadTreeResponse) -> Self {
        let mut subs_src: Vec<(u16, SubQuadDto)> = response
            .sub_quads
            .into_iter()
            .filter_map(|dto| dto.sub_quad_key.parse::<u16>().ok().map(|k| (k, dto)))
            .collect();
        subs_src.sort_by_key(|(k, _)| *k);

        let mut parents_src: Vec<(u64, ParentQuadDto)> = response
            .parent_quads
            .into_iter()
            .filter_map(|dto| dto.quad_key.parse::<u64>().ok().map(|k| (k, dto)))
            .collect();
        parents_src.sort_by_key(|(k, _)| *k);

        let mut tag_area = BytesMut::new();
        let mut subs = Vec::with_capacity(subs_src.len());
        for (sub_quadkey, dto) in subs_src {
            let offset = tag_area.len() as u32;
            write_tag(&mut tag_area, dto.version, dto.data_size, dto.compressed_data_size, &dto.data_handle, dto.checksum.as_deref(), dto.additional_metadata.as_deref(), dto.crc.as_deref());
            subs.push(SubEntry { sub_quadkey, tag_offset: offset });
        }
        let mut parents = Vec::with_capacity(parents_src.len());
        for (quadkey, dto) in parents_src {
            let offset = tag_area.len() as u32;
            write_tag(&mut tag_area, dto.version, dto.data_size, dto.compressed_data_size, &dto.data_handle, dto.checksum.as_deref(), dto.additional_metadata.as_deref(), dto.crc.as_deref());
            parents.push(ParentEntry { quadkey, tag_offset: offset });
        }

        Self {
            root,
            depth,
            subs,
            parents,
            tag_area: tag_area.freeze(),
        }
    }

    #[must_use]
    pub fn root(&self) -> TileKey {
        self.root
    }

    /// Serializes to the spec §3 binary layout.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64_le(self.root.to_quadkey64());
        buf.put_u16_le(BLOB_VERSION);
        buf.put_i8(self.depth as i8);
        buf.put_u8(self.parents.len() as u8);
        buf.put_u16_le(self.subs.len() as u16);
        for sub in &self.subs {
            buf.put_u16_le(sub.sub_quadkey);
            buf.put_u32_le(sub.tag_offset);
        }
        for parent in &self.parents {
            buf.put_u64_le(parent.quadkey);
            buf.put_u32_le(parent.tag_offset);
        }
        buf.put(self.tag_area.clone());
        buf.freeze()
    }

    /// Parses the spec §3 binary layout.
    pub fn decode(mut bytes: Bytes) -> Result<Self, ApiError> {
        if bytes.len() < 14 {
            return Err(io_error("quadtree blob shorter than fixed header"));
        }
        let root_quadkey = bytes.get_u64_le();
        let _blob_version = bytes.get_u16_le();
        let depth = bytes.get_i8() as u8;
        let parent_count = bytes.get_u8() as usize;
        let subkey_count = bytes.get_u16_le() as usize;

        if bytes.len() < subkey_count * SUB_ENTRY_SIZE + parent_count * PARENT_ENTRY_SIZE {
            return Err(io_error("quadtree blob truncated before entry tables"));
        }

        let mut subs = Vec::with_capacity(subkey_count);
        for _ in 0..subkey_count {
            let sub_quadkey = bytes.get_u16_le();
            let tag_offset = bytes.get_u32_le();
            subs.push(SubEntry { sub_quadkey, tag_offset });
        }
        let mut parents = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            let quadkey = bytes.get_u64_le();
            let tag_offset = bytes.get_u32_le();
            parents.push(ParentEntry { quadkey, tag_offset });
        }

        Ok(Self {
            root: TileKey::from_quadkey64(root_quadkey),
            depth,
            subs,
            parents,
            tag_area: bytes,
        })
    }

    fn decode_entry(&self, tile: TileKey, tag_offset: u32, next_offset: Option<u32>) -> IndexData {
        let start = tag_offset as usize;
        let end = next_offset.map_or(self.tag_area.len(), |o| o as usize);
        let mut cursor = self.tag_area.slice(start..end);

        let version = cursor.get_u64_le() as CatalogVersion;
        let data_size = cursor.get_i64_le();
        let compressed_data_size = cursor.get_i64_le();
        let data_handle = read_cstring(&mut cursor);
        let checksum = read_optional_cstring(&mut cursor);
        let additional_metadata = read_optional_cstring(&mut cursor);
        let crc = read_optional_cstring(&mut cursor);

        IndexData {
            tile,
            version,
            data_size,
            compressed_data_size,
            data_handle,
            checksum,
            additional_metadata,
            crc,
        }
    }

    /// `find(tile, aggregated)` (spec §4.4).
    #[must_use]
    pub fn find(&self, tile: TileKey, aggregated: bool) -> Option<IndexData> {
        if tile.level() >= self.root.level() {
            if let Some(sub_quadkey) = tile.added_sub_here_tile(&self.root) {
                if let Ok(idx) = self.subs.binary_search_by_key(&sub_quadkey, |e| e.sub_quadkey) {
                    let next = self.subs.get(idx + 1).map(|e| e.tag_offset).or_else(|| self.parents.first().map(|e| e.tag_offset));
                    return Some(self.decode_entry(tile, self.subs[idx].tag_offset, next));
                }
            }
        } else {
            let quadkey64 = tile.to_quadkey64();
            if let Ok(idx) = self.parents.binary_search_by_key(&quadkey64, |e| e.quadkey) {
                let next = self.parents.get(idx + 1).map(|e| e.tag_offset);
                return Some(self.decode_entry(tile, self.parents[idx].tag_offset, next));
            }
        }

        if !aggregated {
            return None;
        }
        self.find_aggregated(tile)
    }

    fn find_aggregated(&self, tile: TileKey) -> Option<IndexData> {
        for (idx, entry) in self.subs.iter().enumerate().rev() {
            let candidate = TileKey::from_sub_here_tile(&self.root, entry.sub_quadkey);
            if candidate.is_parent_of(&tile) {
                let next = self.subs.get(idx + 1).map(|e| e.tag_offset).or_else(|| self.parents.first().map(|e| e.tag_offset));
                return Some(self.decode_entry(candidate, entry.tag_offset, next));
            }
        }
        for (idx, entry) in self.parents.iter().enumerate().rev() {
            let candidate = TileKey::from_quadkey64(entry.quadkey);
            if candidate.is_parent_of(&tile) {
                let next = self.parents.get(idx + 1).map(|e| e.tag_offset);
                return Some(self.decode_entry(candidate, entry.tag_offset, next));
            }
        }
        None
    }

    /// `get_index_data(field_mask)` (spec §4.4): every entry in the
    /// subtree, honouring which optional string fields to materialize.
    #[must_use]
    pub fn get_index_data(&self, field_mask: FieldMask) -> Vec<IndexData> {
        let mut out = Vec::with_capacity(self.subs.len() + self.parents.len());
        for (idx, entry) in self.subs.iter().enumerate() {
            let tile = TileKey::from_sub_here_tile(&self.root, entry.sub_quadkey);
            let next = self.subs.get(idx + 1).map(|e| e.tag_offset).or_else(|| self.parents.first().map(|e| e.tag_offset));
            let mut data = self.decode_entry(tile, entry.tag_offset, next);
            apply_field_mask(&mut data, field_mask);
            out.push(data);
        }
        for (idx, entry) in self.parents.iter().enumerate() {
            let tile = TileKey::from_quadkey64(entry.quadkey);
            let next = self.parents.get(idx + 1).map(|e| e.tag_offset);
            let mut data = self.decode_entry(tile, entry.tag_offset, next);
            apply_field_mask(&mut data, field_mask);
            out.push(data);
        }
        out
    }
}

fn apply_field_mask(data: &mut IndexData, mask: FieldMask) {
    if !mask.contains(FieldMask::DATA_HANDLE) {
        data.data_handle.clear();
    }
    if !mask.contains(FieldMask::ADDITIONAL_METADATA) {
        data.additional_metadata = None;
    }
    if !mask.contains(FieldMask::CRC) {
        data.crc = None;
    }
    if !mask.contains(FieldMask::CHECKSUM) {
        data.checksum = None;
    }
}

#[allow(clippy::too_many_arguments)]
fn write_tag(
    buf: &mut BytesMut,
    version: CatalogVersion,
    data_size: Option<i64>,
    compressed_data_size: Option<i64>,
    data_handle: &str,
    checksum: Option<&str>,
    additional_metadata: Option<&str>,
    crc: Option<&str>,
) {
    buf.put_u64_le(version as u64);
    buf.put_i64_le(data_size.unwrap_or(-1));
    buf.put_i64_le(compressed_data_size.unwrap_or(-1));
    write_cstring(buf, data_handle);
    write_cstring(buf, checksum.unwrap_or(""));
    write_cstring(buf, additional_metadata.unwrap_or(""));
    write_cstring(buf, crc.unwrap_or(""));
}

fn write_cstring(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

fn read_cstring(cursor: &mut Bytes) -> String {
    let nul = cursor.iter().position(|&b| b == 0).unwrap_or(cursor.len());
    let s = String::from_utf8_lossy(&cursor[..nul]).into_owned();
    cursor.advance((nul + 1).min(cursor.len()));
    s
}

/// As [`read_cstring`], but returns `None` without consuming anything if
/// the cursor is already exhausted (spec §4.4: "the trailing `crc` string
/// is optional on read ... treated as absent").
fn read_optional_cstring(cursor: &mut Bytes) -> Option<String> {
    if cursor.is_empty() {
        return None;
    }
    let s = read_cstring(cursor);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> QuadTreeResponse {
        QuadTreeResponse {
            sub_quads: vec![
                SubQuadDto {
                    sub_quad_key: "1".to_string(),
                    version: 3,
                    data_handle: "h0".to_string(),
                    data_size: Some(100),
                    compressed_data_size: Some(50),
                    checksum: Some("chk0".to_string()),
                    additional_metadata: None,
                    crc: Some("crc0".to_string()),
                },
                SubQuadDto {
                    sub_quad_key: "7".to_string(),
                    version: 3,
                    data_handle: "h1".to_string(),
                    data_size: Some(200),
                    compressed_data_size: None,
                    checksum: None,
                    additional_metadata: Some("meta1".to_string()),
                    crc: None,
                },
            ],
            parent_quads: vec![],
        }
    }

    #[test]
    fn encode_decode_roundtrip_finds_entries() {
        let root = TileKey::new(4, 1);
        let index = QuadTreeIndex::from_response(root, 4, sample_response());
        let encoded = index.encode();
        let decoded = QuadTreeIndex::decode(encoded).unwrap();

        let root_child = TileKey::from_sub_here_tile(&root, 7);
        let entry = decoded.find(root_child, false).unwrap();
        assert_eq!(entry.data_handle, "h1");
        assert_eq!(entry.data_size, 200);
        assert_eq!(entry.additional_metadata.as_deref(), Some("meta1"));
        assert!(entry.crc.is_none());
    }

    #[test]
    fn find_misses_unknown_tile() {
        let root = TileKey::new(4, 1);
        let index = QuadTreeIndex::from_response(root, 4, sample_response());
        let unrelated = TileKey::new(4, 99);
        assert!(index.find(unrelated, false).is_none());
    }

    #[test]
    fn get_index_data_respects_field_mask() {
        let root = TileKey::new(4, 1);
        let index = QuadTreeIndex::from_response(root, 4, sample_response());
        let all = index.get_index_data(FieldMask::ALL);
        assert_eq!(all.len(), 2);
        let minimal = index.get_index_data(FieldMask::DATA_HANDLE);
        assert!(minimal.iter().all(|e| e.crc.is_none() && e.additional_metadata.is_none()));
    }
}
