//! History Fetcher (C4): per-item revision history, tenant-scoped endpoint.

use crate::cancellation::CancellationToken;
use crate::http_client::{HttpClient, HttpError};
use crate::models::HistoryEntry;
use crate::progress::{emit, Phase, ProgressEvent, ProgressSender};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct Revision {
    fields: RevisionFields,
}

#[derive(Debug, Deserialize)]
struct RevisionFields {
    #[serde(rename = "System.State")]
    state: Option<String>,
    #[serde(rename = "System.ChangedBy")]
    changed_by: Option<ChangedBy>,
    #[serde(rename = "System.ChangedDate")]
    changed_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
struct ChangedBy {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    value: Vec<Revision>,
}

pub struct HistoryFetcher<'a> {
    client: &'a HttpClient,
    semaphore: Arc<Semaphore>,
    history_limit: Option<u32>,
}

impl<'a> HistoryFetcher<'a> {
    pub fn new(client: &'a HttpClient, semaphore: Arc<Semaphore>, history_limit: Option<u32>) -> Self {
        Self {
            client,
            semaphore,
            history_limit,
        }
    }

    pub async fn fetch_all(
        &self,
        ids: &[i64],
        token: &CancellationToken,
        progress: Option<&ProgressSender>,
    ) -> Vec<(i64, Result<Vec<HistoryEntry>, HttpError>)> {
        let total = ids.len();
        emit(progress, ProgressEvent::Phase(Phase::History));

        let futures = ids.iter().map(|&id| {
            let permit = self.semaphore.clone();
            let token = token.clone();
            async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                if token.is_cancelled() {
                    return (id, Err(HttpError::Cancelled));
                }
                (id, self.fetch_one(id, &token).await)
            }
        });

        let results = futures::future::join_all(futures).await;
        for (done, (id, result)) in results.iter().enumerate() {
            if let Err(e) = result {
                warn!(item_id = id, error = %e, "history fetch failed");
            }
            emit(
                progress,
                ProgressEvent::Progress {
                    phase: Phase::History,
                    done: done + 1,
                    total,
                    items: done + 1,
                },
            );
        }
        results
    }

    async fn fetch_one(
        &self,
        id: i64,
        token: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, HttpError> {
        let path = format!("/_apis/wit/workitems/{id}/updates");
        let query: Vec<(&str, String)> = self
            .history_limit
            .map(|n| vec![("$top", n.to_string())])
            .unwrap_or_default();
        let value = self.client.get_json(&path, &query, token).await?;
        let response: UpdatesResponse =
            serde_json::from_value(value).map_err(|e| HttpError::Transient {
                attempts: 1,
                message: format!("malformed updates response: {e}"),
            })?;

        let mut entries = Vec::new();
        let mut last_date: Option<chrono::DateTime<chrono::Utc>> = None;
        for rev in response.value {
            let Some(state) = rev.fields.state else {
                continue;
            };
            let Some(changed_date) = rev.fields.changed_date else {
                return Err(HttpError::Transient {
                    attempts: 1,
                    message: format!("item {id} has a revision with no changed_date"),
                });
            };
            if let Some(last) = last_date {
                if changed_date < last {
                    return Err(HttpError::Transient {
                        attempts: 1,
                        message: format!("item {id} has out-of-order revision history"),
                    });
                }
            }
            last_date = Some(changed_date);
            entries.push(HistoryEntry {
                state,
                changed_by: rev.fields.changed_by.and_then(|c| c.display_name),
                changed_date,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_maps_to_top_query_param() {
        let limit = Some(50u32);
        let query: Vec<(&str, String)> = limit
            .map(|n| vec![("$top", n.to_string())])
            .unwrap_or_default();
        assert_eq!(query, vec![("$top", "50".to_string())]);
    }
}
