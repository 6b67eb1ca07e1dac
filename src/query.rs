//! Query stage (C2): turn a lookback window into candidate work-item IDs.

use crate::cancellation::CancellationToken;
use crate::http_client::{HttpClient, HttpError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;

/// The documented per-query result cap of the WIQL endpoint.
const RESULT_CAP: usize = 19_999;

pub struct QueryStage<'a> {
    client: &'a HttpClient,
    project: String,
}

impl<'a> QueryStage<'a> {
    pub fn new(client: &'a HttpClient, project: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
        }
    }

    /// Returns candidate IDs changed within `lookback_days` of `now`, deduped,
    /// preserving descending-`ChangedDate` order, paging by halving the
    /// window when a single page would exceed `RESULT_CAP`.
    pub async fn run(
        &self,
        lookback_days: i64,
        now: DateTime<Utc>,
        token: &CancellationToken,
    ) -> Result<Vec<i64>, HttpError> {
        let window_start = now - ChronoDuration::days(lookback_days);
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        self.page(window_start, now, &mut seen, &mut ordered, token)
            .await?;
        Ok(ordered)
    }

    fn page<'b>(
        &'b self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        seen: &'b mut HashSet<i64>,
        ordered: &'b mut Vec<i64>,
        token: &'b CancellationToken,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), HttpError>> + 'b>> {
        Box::pin(async move {
            if token.is_cancelled() {
                return Err(HttpError::Cancelled);
            }

            let ids = self.fetch_window(from, to, token).await?;
            if ids.len() < RESULT_CAP || to <= from {
                for id in ids {
                    if seen.insert(id) {
                        ordered.push(id);
                    }
                }
                return Ok(());
            }

            debug!(
                from = %from,
                to = %to,
                count = ids.len(),
                "window exceeded result cap, halving"
            );
            let mid = from + (to - from) / 2;
            // Narrow the window from the far edge: recurse on the newer half
            // first (preserves descending-ChangedDate ordering), then older.
            self.page(mid, to, &mut *seen, &mut *ordered, token).await?;
            self.page(from, mid, &mut *seen, &mut *ordered, token).await?;
            Ok(())
        })
    }

    async fn fetch_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        token: &CancellationToken,
    ) -> Result<Vec<i64>, HttpError> {
        let wiql = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = '{project}' \
             AND [System.ChangedDate] >= '{from}' AND [System.ChangedDate] < '{to}' \
             ORDER BY [System.ChangedDate] DESC",
            project = self.project,
            from = from.format("%Y-%m-%dT%H:%M:%SZ"),
            to = to.format("%Y-%m-%dT%H:%M:%SZ"),
        );

        let path = format!("/{}/_apis/wit/wiql", self.project);
        let body: serde_json::Value = self
            .client
            .post_json(&path, json!({ "query": wiql }), token)
            .await?;

        let ids = body
            .get("workItems")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("id").and_then(|id| id.as_i64()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_cap_matches_documented_endpoint_limit() {
        assert_eq!(RESULT_CAP, 19_999);
    }
}
