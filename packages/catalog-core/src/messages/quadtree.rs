//! `GET /layers/{layer}/versions/{v}/quadkeys/{tile}/depths/{d}` response
//! (spec §4.4/§6). Deserialized by the streaming SAX parser in
//! `catalog-client::quadtree::sax`, not by `serde_json` directly, but the
//! shape is documented here as the contract the SAX handler must produce.

use serde::{Deserialize, Serialize};

use crate::model::CatalogVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuadDto {
    #[serde(rename = "subQuadKey")]
    pub sub_quad_key: String,
    pub version: CatalogVersion,
    #[serde(rename = "dataHandle")]
    pub data_handle: String,
    #[serde(rename = "dataSize", skip_serializing_if = "Option::is_none")]
    pub data_size: Option<i64>,
    #[serde(rename = "compressedDataSize", skip_serializing_if = "Option::is_none")]
    pub compressed_data_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(rename = "additionalMetadata", skip_serializing_if = "Option::is_none")]
    pub additional_metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentQuadDto {
    #[serde(rename = "partition")]
    pub quad_key: String,
    pub version: CatalogVersion,
    #[serde(rename = "dataHandle")]
    pub data_handle: String,
    #[serde(rename = "dataSize", skip_serializing_if = "Option::is_none")]
    pub data_size: Option<i64>,
    #[serde(rename = "compressedDataSize", skip_serializing_if = "Option::is_none")]
    pub compressed_data_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(rename = "additionalMetadata", skip_serializing_if = "Option::is_none")]
    pub additional_metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuadTreeResponse {
    #[serde(rename = "subQuads", default)]
    pub sub_quads: Vec<SubQuadDto>,
    #[serde(rename = "parentQuads", default)]
    pub parent_quads: Vec<ParentQuadDto>,
}
