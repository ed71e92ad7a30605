//! Error types for the phenotype library server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Ontology edge {parent} -> {child} would create a cycle")]
    Cycle { parent: i64, child: i64 },

    #[error("The site is in read-only mode")]
    ReadOnly,

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PermissionDenied(_) | Error::ReadOnly => StatusCode::FORBIDDEN,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::Validation(_) | Error::Cycle { .. } => StatusCode::BAD_REQUEST,
            Error::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Database(_) | Error::Internal(_) | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Connection-level failures that are safe to retry for idempotent reads.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DependencyUnavailable(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Error::DependencyUnavailable(err.to_string())
            }
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Database(other),
        }
    }
}

impl From<phenolib_core::Error> for Error {
    fn from(err: phenolib_core::Error) -> Self {
        use phenolib_core::Error as Core;
        match err {
            Core::NotFound(msg) => Error::NotFound(msg),
            Core::PermissionDenied(msg) => Error::PermissionDenied(msg),
            Core::InvalidState(msg) => Error::InvalidState(msg),
            Core::Validation(msg) => Error::Validation(msg),
            Core::Cycle { parent, child } => Error::Cycle { parent, child },
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Validation(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Error::Database(_) | Error::Internal(_) | Error::Other(_) => {
                tracing::error!("Internal error: {}", self);
                "Internal server error".to_string()
            }
            Error::DependencyUnavailable(_) => {
                tracing::warn!("Dependency unavailable: {}", self);
                "Service temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "status": "false",
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_documented_status_codes() {
        let cases = [
            (Error::NotFound("PH1".into()), StatusCode::NOT_FOUND),
            (Error::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (Error::Unauthenticated, StatusCode::UNAUTHORIZED),
            (Error::InvalidState("x".into()), StatusCode::CONFLICT),
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::Cycle { parent: 1, child: 2 }, StatusCode::BAD_REQUEST),
            (Error::ReadOnly, StatusCode::FORBIDDEN),
            (
                Error::DependencyUnavailable("db".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[test]
    fn pool_timeouts_are_transient() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
        let err: Error = sqlx::Error::Protocol("bad".into()).into();
        assert!(!err.is_transient());
    }

    #[test]
    fn core_cycle_error_is_preserved() {
        let err: Error = phenolib_core::Error::Cycle { parent: 3, child: 1 }.into();
        assert!(matches!(err, Error::Cycle { parent: 3, child: 1 }));
    }
}
