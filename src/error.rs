//! Error types for the template catalog and matching engine.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, TemplateError>;

/// Errors raised by a [`TemplateStore`](crate::store::TemplateStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("template not found: {0}")]
    NotFound(Uuid),

    #[error("lineage not found: {0}")]
    LineageNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("backend error: {0}")]
    Backend(String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Crate-level error surfaced to callers of the engine, version manager and
/// maintenance service.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service unavailable: {service}: {reason}")]
    ServiceUnavailable {
        service: &'static str,
        reason: String,
    },

    #[error("{service} timed out after {after_ms}ms")]
    Timeout { service: &'static str, after_ms: u64 },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("malformed rule expression on template {template_id}: {reason}")]
    MalformedRule { template_id: Uuid, reason: String },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TemplateError {
    pub fn unavailable(service: &'static str, reason: impl ToString) -> Self {
        Self::ServiceUnavailable {
            service,
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServiceUnavailable { .. } | Self::Timeout { .. } | Self::Conflict(_) => true,
            Self::Store(StoreError::Conflict(_)) => true,
            _ => false,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::MalformedRule { .. } => 422,
            Self::Conflict(_) => 409,
            Self::ServiceUnavailable { .. } => 503,
            Self::Timeout { .. } => 504,
            Self::Cancelled(_) => 499,
            Self::Store(StoreError::NotFound(_)) | Self::Store(StoreError::LineageNotFound(_)) => {
                404
            }
            Self::Store(StoreError::Conflict(_)) => 409,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_not_found() {
        assert_eq!(TemplateError::NotFound("x".into()).http_status(), 404);
        let id = Uuid::new_v4();
        assert_eq!(TemplateError::from(StoreError::NotFound(id)).http_status(), 404);
    }

    #[test]
    fn http_status_unavailable_and_timeout() {
        assert_eq!(
            TemplateError::unavailable("semantic matcher", "down").http_status(),
            503
        );
        let timeout = TemplateError::Timeout {
            service: "rule evaluator",
            after_ms: 10,
        };
        assert_eq!(timeout.http_status(), 504);
    }

    #[test]
    fn retryable_variants() {
        assert!(TemplateError::unavailable("x", "y").is_retryable());
        assert!(TemplateError::Conflict("x".into()).is_retryable());
        assert!(TemplateError::from(StoreError::Conflict("x".into())).is_retryable());
        assert!(!TemplateError::InvalidInput("x".into()).is_retryable());
        assert!(!TemplateError::Cancelled("x".into()).is_retryable());
    }

    #[test]
    fn display_service_unavailable() {
        let e = TemplateError::unavailable("text analyzer", "connection refused");
        assert_eq!(
            e.to_string(),
            "service unavailable: text analyzer: connection refused"
        );
    }

    #[test]
    fn display_internal() {
        let e = TemplateError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(e.to_string(), "internal: boom");
    }
}
