//! Latest catalog version lookup (spec §2, §3: "fetched ... latched via
//! atomic compare-and-swap").

use catalog_core::messages::LatestVersionResponse;
use catalog_core::{ApiError, CatalogVersion};
use std::collections::BTreeMap;

use super::RepositoryContext;
use crate::http::cancellation::CancellationContext;
use crate::http::{ApiRequest, Method};

const METADATA_API: &str = "metadata";
const METADATA_API_VERSION: &str = "v1";

#[derive(Clone)]
pub struct CatalogRepository {
    ctx: RepositoryContext,
}

impl CatalogRepository {
    #[must_use]
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    /// `GET /versions/latest?startVersion=-1`.
    pub async fn get_latest_version(&self, cancel: CancellationContext) -> Result<CatalogVersion, ApiError> {
        let base_url = self
            .ctx
            .resolver
            .resolve(&self.ctx.catalog, METADATA_API, METADATA_API_VERSION)
            .await?;

        let request = ApiRequest {
            base_url,
            path: "/versions/latest".to_string(),
            method: Method::Get,
            query: vec![("startVersion".to_string(), "-1".to_string())],
            headers: BTreeMap::new(),
            body: bytes::Bytes::new(),
            content_type: None,
        };

        let (_, _, body, _) = self.ctx.http.call_api(request, cancel).await?;
        let response: LatestVersionResponse =
            serde_json::from_slice(&body).map_err(|err| ApiError::invalid_argument(format!("malformed latest-version response: {err}")))?;
        Ok(response.version)
    }
}
