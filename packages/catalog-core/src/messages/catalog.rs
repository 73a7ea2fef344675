//! `GET /versions/latest?startVersion=-1` response (spec §6).

use serde::{Deserialize, Serialize};

use crate::model::CatalogVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestVersionResponse {
    pub version: CatalogVersion,
}
