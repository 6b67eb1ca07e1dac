//! Orchestrates Query -> Batch Detail Fetch + History -> Normalizer into a
//! canonical work-item set, applying the degraded-but-succeeds policy from
//! spec.md §7.

use crate::batch_fetch::BatchFetcher;
use crate::cancellation::CancellationToken;
use crate::history::HistoryFetcher;
use crate::http_client::{HttpClient, HttpError};
use crate::models::{ValidationError, WorkItem};
use crate::normalizer;
use crate::progress::ProgressSender;
use crate::query::QueryStage;
use chrono::Utc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("too many batches failed: {failed}/{total} batches unsuccessful")]
    TooManyFailures { failed: usize, total: usize },
}

pub struct IngestionOutcome {
    pub work_items: Vec<WorkItem>,
    pub validation_errors: Vec<ValidationError>,
    pub cancelled: bool,
    /// true when between 50% (inclusive) and 100% of batches succeeded.
    pub degraded: bool,
}

pub struct IngestionParams {
    pub lookback_days: i64,
    pub history_limit: Option<u32>,
    pub concurrency: usize,
}

pub async fn run(
    client: &HttpClient,
    project: &str,
    params: IngestionParams,
    token: &CancellationToken,
    progress: Option<&ProgressSender>,
) -> Result<IngestionOutcome, IngestionError> {
    let now = Utc::now();

    client.verify_project(project, token).await?;
    info!(project, "project verified");

    let query_stage = QueryStage::new(client, project);
    let ids = query_stage.run(params.lookback_days, now, token).await?;
    info!(candidate_count = ids.len(), "query stage complete");

    let batch_fetcher = BatchFetcher::new(client, project, params.concurrency);
    let batch_result = batch_fetcher.fetch_all(&ids, token, progress).await;

    let total_batches = ids.len().div_ceil(crate::batch_fetch::MAX_BATCH_SIZE).max(1);
    let failed = batch_result.failed_batches.len();
    if failed > 0 {
        warn!(failed, total = total_batches, "some detail batches failed");
    }
    if total_batches > 0 && (total_batches - failed) * 2 < total_batches {
        return Err(IngestionError::TooManyFailures {
            failed,
            total: total_batches,
        });
    }
    let degraded = failed > 0;

    if batch_result.cancelled || token.is_cancelled() {
        let work_items = normalize_without_history(&batch_result.details, client.base_url(), project);
        return Ok(IngestionOutcome {
            work_items: work_items.0,
            validation_errors: work_items.1,
            cancelled: true,
            degraded,
        });
    }

    let detail_ids: Vec<i64> = batch_result.details.iter().map(|d| d.id).collect();
    let history_semaphore = batch_fetcher.semaphore();
    let history_fetcher = HistoryFetcher::new(client, history_semaphore, params.history_limit);
    let history_results = history_fetcher.fetch_all(&detail_ids, token, progress).await;

    let mut work_items = Vec::with_capacity(batch_result.details.len());
    let mut validation_errors = Vec::new();

    for detail in &batch_result.details {
        let history = history_results
            .iter()
            .find(|(id, _)| *id == detail.id)
            .and_then(|(_, result)| result.as_ref().ok())
            .cloned()
            .unwrap_or_default();

        match normalizer::normalize(detail, &history, client.base_url(), project) {
            Ok(item) => work_items.push(item),
            Err(err) => validation_errors.push(err),
        }
    }

    info!(
        normalized = work_items.len(),
        validation_errors = validation_errors.len(),
        degraded,
        "ingestion complete"
    );

    Ok(IngestionOutcome {
        work_items,
        validation_errors,
        cancelled: token.is_cancelled(),
        degraded,
    })
}

fn normalize_without_history(
    details: &[crate::batch_fetch::RawDetail],
    organization_url: &str,
    project: &str,
) -> (Vec<WorkItem>, Vec<ValidationError>) {
    let mut work_items = Vec::new();
    let mut errors = Vec::new();
    for detail in details {
        match normalizer::normalize(detail, &[], organization_url, project) {
            Ok(item) => work_items.push(item),
            Err(err) => errors.push(err),
        }
    }
    (work_items, errors)
}
