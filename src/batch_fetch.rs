//! Batch Detail Fetcher (C3): split IDs into batches of <=200, fetch details
//! concurrently through a bounded worker pool.

use crate::cancellation::CancellationToken;
use crate::http_client::{HttpClient, HttpError};
use crate::progress::{emit, Phase, ProgressEvent, ProgressSender};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub const MAX_BATCH_SIZE: usize = 200;
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Raw per-item fields as returned by the workitems detail endpoint, prior
/// to normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDetail {
    pub id: i64,
    pub fields: RawFields,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFields {
    #[serde(rename = "System.Title")]
    pub title: String,
    #[serde(rename = "System.WorkItemType")]
    pub work_item_type: String,
    #[serde(rename = "System.State")]
    pub state: String,
    #[serde(rename = "System.AssignedTo")]
    pub assigned_to: Option<AssignedTo>,
    #[serde(rename = "System.CreatedDate")]
    pub created_date: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "Microsoft.VSTS.Common.ClosedDate")]
    pub closed_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "Microsoft.VSTS.Common.Priority")]
    pub priority: Option<i32>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.StoryPoints")]
    pub story_points: Option<f64>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.CompletedWork")]
    pub effort_hours: Option<f64>,
    #[serde(rename = "System.Tags")]
    pub tags: Option<String>,
    #[serde(rename = "System.IterationPath")]
    pub iteration_path: Option<String>,
    #[serde(rename = "System.AreaPath")]
    pub area_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignedTo {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    value: Vec<RawDetail>,
}

/// Summary of a fetch run: successful details in submission order, plus the
/// indices of any batches that failed terminally after retries.
pub struct BatchFetchResult {
    pub details: Vec<RawDetail>,
    pub failed_batches: Vec<usize>,
    pub cancelled: bool,
}

pub struct BatchFetcher<'a> {
    client: &'a HttpClient,
    project: String,
    semaphore: Arc<Semaphore>,
}

impl<'a> BatchFetcher<'a> {
    pub fn new(client: &'a HttpClient, project: impl Into<String>, concurrency: usize) -> Self {
        Self {
            client,
            project: project.into(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    pub async fn fetch_all(
        &self,
        ids: &[i64],
        token: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> BatchFetchResult {
        let batches: Vec<&[i64]> = ids.chunks(MAX_BATCH_SIZE).collect();
        let total = batches.len();
        emit(progress, ProgressEvent::Phase(Phase::BatchFetch));

        let mut handles = Vec::with_capacity(total);
        for (idx, batch) in batches.into_iter().enumerate() {
            let permit = self.semaphore.clone();
            let batch_ids = batch.to_vec();
            let project = self.project.clone();
            let client = self.client;
            let token = token.clone();
            handles.push(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                if token.is_cancelled() {
                    return (idx, Err(HttpError::Cancelled));
                }
                (idx, fetch_batch(client, &project, &batch_ids, &token).await)
            });
        }

        let mut results: Vec<(usize, Result<Vec<RawDetail>, HttpError>)> =
            futures::future::join_all(handles).await;
        results.sort_by_key(|(idx, _)| *idx);

        let mut details = Vec::new();
        let mut failed_batches = Vec::new();
        let mut cancelled = false;
        let mut done = 0usize;
        for (idx, result) in results {
            match result {
                Ok(batch_details) => {
                    done += 1;
                    debug!(batch = idx, items = batch_details.len(), "batch fetched");
                    details.extend(batch_details);
                }
                Err(HttpError::Cancelled) => {
                    cancelled = true;
                }
                Err(e) => {
                    warn!(batch = idx, error = %e, "batch failed terminally");
                    failed_batches.push(idx);
                }
            }
            emit(
                progress,
                ProgressEvent::Progress {
                    phase: Phase::BatchFetch,
                    done,
                    total,
                    items: details.len(),
                },
            );
        }

        BatchFetchResult {
            details,
            failed_batches,
            cancelled,
        }
    }
}

async fn fetch_batch(
    client: &HttpClient,
    project: &str,
    ids: &[i64],
    token: &CancellationToken,
) -> Result<Vec<RawDetail>, HttpError> {
    let csv = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let path = format!("/{project}/_apis/wit/workitems");
    let query = [("ids", csv), ("$expand", "relations".to_string())];
    let value = client.get_json(&path, &query, token).await?;
    let response: DetailResponse = serde_json::from_value(value).map_err(|e| HttpError::Transient {
        attempts: 1,
        message: format!("malformed detail response: {e}"),
    })?;
    Ok(response.value)
}
