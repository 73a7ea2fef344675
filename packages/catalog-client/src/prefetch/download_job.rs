//! Download stage of the prefetch pipeline: fan out one task per
//! `(item_key, data_handle)`, report progress, and aggregate per-item
//! outcomes (spec §4.8 "DownloadJob").

use catalog_core::{ApiError, CatalogVersion, FetchOption};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::http::cancellation::CancellationContext;
use crate::repositories::{DataRepository, DataRequest};

/// One `{processed, total, bytes}` progress tick, emitted after each item
/// completes (spec §4.8).
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub processed: usize,
    pub total: usize,
    pub bytes: u64,
}

pub struct DownloadOutcome {
    pub item_key: String,
    pub result: Result<(), ApiError>,
}

/// Downloads every `(item_key, data_handle)` pair concurrently, caching
/// each on success. A cancellation aborts the whole job; individual
/// download failures are reported per-item instead (spec §4.8 "Error
/// policy").
pub async fn run_download_job(
    data_repository: &DataRepository,
    items: Vec<(String, String)>,
    version: CatalogVersion,
    on_progress: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
    cancel: CancellationContext,
) -> Result<Vec<DownloadOutcome>, ApiError> {
    let total = items.len();
    let processed = Arc::new(AtomicU64::new(0));
    let mut join_set = JoinSet::new();

    for (item_key, data_handle) in items {
        let data_repository = data_repository.clone();
        let cancel = cancel.clone();
        let processed = Arc::clone(&processed);
        let on_progress = on_progress.clone();
        join_set.spawn(async move {
            if cancel.is_cancelled() {
                return DownloadOutcome {
                    item_key,
                    result: Err(ApiError::cancelled()),
                };
            }
            let request = DataRequest {
                partition_id: None,
                data_handle: data_handle.clone(),
            };
            let result = data_repository
                .get_versioned_data(request, version, FetchOption::OnlineIfNotFound, cancel)
                .await;
            let bytes = result.as_ref().map(bytes::Bytes::len).unwrap_or(0) as u64;
            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(callback) = &on_progress {
                callback(ProgressEvent {
                    processed: done as usize,
                    total,
                    bytes,
                });
            }
            DownloadOutcome {
                item_key,
                result: result.map(|_| ()),
            }
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        let outcome = joined.map_err(|err| ApiError::new(catalog_core::ErrorKind::Unknown, -1, format!("download task panicked: {err}")))?;
        if outcome.result.as_ref().is_err_and(ApiError::is_cancelled) {
            join_set.abort_all();
            return Err(ApiError::cancelled());
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
