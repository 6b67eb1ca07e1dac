//! Authenticated, retrying, cancellable HTTP client (C1).
//!
//! Basic auth with an empty username and the PAT as password, per Azure
//! DevOps convention. Retries are dispatched on a result value rather than
//! exceptions: every attempt resolves to one of `RequestOutcome`'s variants
//! and the retry loop matches on it.

use crate::cancellation::CancellationToken;
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(8);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The Azure DevOps REST API version every request in this crate is pinned
/// to (spec.md §6). Appended centrally here rather than by each caller so
/// no call site can drift from it.
const API_VERSION: &str = "7.1";

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("authentication rejected ({status})")]
    AuthFailed { status: u16 },
    #[error("resource not found: {path}")]
    NotFound { path: String },
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("client error {status}: {message}")]
    ClientError { status: u16, message: String },
}

/// Outcome of a single attempt, used to dispatch the retry loop (spec.md
/// §9: "replace exception-driven control flow with a result value that
/// encodes {Ok, RetryableErr, TerminalErr, Cancelled}").
enum RequestOutcome {
    Success(reqwest::Response),
    Retryable { message: String, retry_after: Option<Duration> },
    Terminal(HttpError),
    Cancelled,
}

pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    pat: String,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, pat: impl Into<String>) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("flow-metrics/", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| HttpError::Transient {
                attempts: 0,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            pat: pat.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Confirms the project exists and the PAT can see it, via the project
    /// verification endpoint (spec.md §6: `GET {org_url}/_apis/projects/{project}`).
    pub async fn verify_project(&self, project: &str, token: &CancellationToken) -> Result<(), HttpError> {
        let path = format!("/_apis/projects/{project}");
        self.get_json(&path, &[], token).await?;
        Ok(())
    }

    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: &CancellationToken,
    ) -> Result<Value, HttpError> {
        self.do_request::<Value>(Method::GET, path, query, None, token)
            .await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        token: &CancellationToken,
    ) -> Result<T, HttpError> {
        self.do_request(Method::POST, path, &[], Some(body), token)
            .await
    }

    async fn do_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        token: &CancellationToken,
    ) -> Result<T, HttpError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if token.is_cancelled() {
                return Err(HttpError::Cancelled);
            }

            let mut req = self
                .client
                .request(method.clone(), &url)
                .basic_auth("", Some(&self.pat))
                .query(query)
                .query(&[("api-version", API_VERSION)]);
            if let Some(ref b) = body {
                req = req.json(b);
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => RequestOutcome::Cancelled,
                result = req.send() => self.classify(result, &url).await,
            };

            match outcome {
                RequestOutcome::Success(resp) => {
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| HttpError::Transient {
                            attempts: attempt,
                            message: format!("failed to decode response body: {e}"),
                        });
                }
                RequestOutcome::Cancelled => return Err(HttpError::Cancelled),
                RequestOutcome::Terminal(err) => return Err(err),
                RequestOutcome::Retryable { message, retry_after } => {
                    if attempt >= MAX_ATTEMPTS {
                        warn!(url = %url, attempt, "retries exhausted");
                        return Err(HttpError::Transient {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = backoff_delay(attempt).max(retry_after.unwrap_or_default());
                    debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(HttpError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn classify(
        &self,
        result: Result<reqwest::Response, reqwest::Error>,
        url: &str,
    ) -> RequestOutcome {
        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                return RequestOutcome::Retryable {
                    message: format!("network error calling {url}: {e}"),
                    retry_after: None,
                }
            }
        };

        let status = resp.status();
        if status.is_success() {
            return RequestOutcome::Success(resp);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RequestOutcome::Terminal(HttpError::AuthFailed {
                    status: status.as_u16(),
                })
            }
            StatusCode::NOT_FOUND => RequestOutcome::Terminal(HttpError::NotFound {
                path: url.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                RequestOutcome::Retryable {
                    message: "rate limited (429)".to_string(),
                    retry_after,
                }
            }
            StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => RequestOutcome::Retryable {
                message: format!("server error {status}"),
                retry_after: None,
            },
            _ => {
                let body_status = status.as_u16();
                let message = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                RequestOutcome::Terminal(HttpError::ClientError {
                    status: body_status,
                    message,
                })
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF.saturating_mul(1 << (attempt.saturating_sub(1)).min(16));
    let capped = exp.min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4 + 1);
    capped + Duration::from_millis(jitter_ms)
}
