//! `GET /lookup/v1/.../apis/{api}/{version}` response (spec §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub api: String,
    pub version: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
}
