//! Error taxonomy shared across ingestion, calculation, and the HTTP API.
//!
//! Mirrors the categorize-then-contextualize split the rest of the crate
//! relies on: callers match on `FlowMetricsError` variants to decide retry
//! vs. abort vs. degrade, rather than parsing message strings.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FlowMetricsError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("authentication failed against {organization}/{project}")]
    AuthError {
        organization: String,
        project: String,
    },

    #[error("transient I/O error: {0}")]
    TransientIoError(#[source] std::io::Error),

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("data validation failed for work item {id}: {message}")]
    DataValidationError { id: i64, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error [{trace_id}]: {message}")]
    InternalError { trace_id: Uuid, message: String },
}

impl FlowMetricsError {
    pub fn internal(message: impl Into<String>) -> Self {
        FlowMetricsError::InternalError {
            trace_id: Uuid::new_v4(),
            message: message.into(),
        }
    }

    /// Whether an operation encountering this error should be retried by a
    /// caller that hasn't already exhausted the HTTP-client's own retry
    /// budget (used by ingestion's batch-level retry policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowMetricsError::TransientIoError(_) | FlowMetricsError::RateLimited { .. }
        )
    }
}

impl From<crate::config::ConfigError> for FlowMetricsError {
    fn from(e: crate::config::ConfigError) -> Self {
        FlowMetricsError::ConfigError(e.to_string())
    }
}

impl From<crate::http_client::HttpError> for FlowMetricsError {
    fn from(e: crate::http_client::HttpError) -> Self {
        match e {
            crate::http_client::HttpError::Cancelled => FlowMetricsError::Cancelled,
            crate::http_client::HttpError::AuthFailed { .. } => FlowMetricsError::AuthError {
                organization: String::new(),
                project: String::new(),
            },
            crate::http_client::HttpError::RateLimited { .. } => FlowMetricsError::RateLimited {
                retry_after_secs: None,
            },
            other => FlowMetricsError::internal(other.to_string()),
        }
    }
}

impl From<crate::ingestion::IngestionError> for FlowMetricsError {
    fn from(e: crate::ingestion::IngestionError) -> Self {
        match e {
            crate::ingestion::IngestionError::Http(http) => http.into(),
            other => FlowMetricsError::internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FlowMetricsError {
    fn from(e: std::io::Error) -> Self {
        FlowMetricsError::TransientIoError(e)
    }
}

/// The exit-code family the CLI maps errors onto (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCategory {
    Success = 0,
    Failure = 1,
    ConfigOrAuth = 2,
    Cancelled = 130,
}

impl From<&FlowMetricsError> for ExitCategory {
    fn from(err: &FlowMetricsError) -> Self {
        match err {
            FlowMetricsError::ConfigError(_) | FlowMetricsError::AuthError { .. } => {
                ExitCategory::ConfigOrAuth
            }
            FlowMetricsError::Cancelled => ExitCategory::Cancelled,
            _ => ExitCategory::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FlowMetricsError::RateLimited {
            retry_after_secs: Some(5)
        }
        .is_retryable());
        assert!(!FlowMetricsError::Cancelled.is_retryable());
    }

    #[test]
    fn exit_category_maps_config_and_auth_to_2() {
        let e = FlowMetricsError::ConfigError("missing PAT".into());
        assert_eq!(ExitCategory::from(&e), ExitCategory::ConfigOrAuth);
        let e = FlowMetricsError::AuthError {
            organization: "org".into(),
            project: "proj".into(),
        };
        assert_eq!(ExitCategory::from(&e), ExitCategory::ConfigOrAuth);
    }

    #[test]
    fn exit_category_maps_cancelled_to_130() {
        assert_eq!(
            ExitCategory::from(&FlowMetricsError::Cancelled),
            ExitCategory::Cancelled
        );
    }

    #[test]
    fn internal_error_carries_trace_id() {
        let e = FlowMetricsError::internal("boom");
        match e {
            FlowMetricsError::InternalError { trace_id, .. } => assert_ne!(trace_id, Uuid::nil()),
            _ => panic!("wrong variant"),
        }
    }
}
