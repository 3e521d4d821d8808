use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures seen by the indexer.
///
/// Only [`Error::NotFound`] is expected during normal operation. Transient and
/// store failures leave the residency ledger untouched, so the affected file or
/// identifier is picked up again on a later cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("document store returned status {status}: {message}")]
    Store { status: u16, message: String },

    #[error("malformed row: {0}")]
    MalformedRow(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether retrying on a later cycle may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) | Error::Io(_) => true,
            Error::Store { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::Transient(_) => "Unavailable",
            Error::Store { .. } => "StoreError",
            Error::MalformedRow(_) | Error::InvalidInput(_) => "InvalidInput",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "InternalError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Transient(_) | Error::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::MalformedRow(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transient(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error_type(),
            message: self.to_string(),
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("connection reset".to_string()).is_transient());
        assert!(
            Error::Store {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_transient()
        );
        assert!(
            !Error::Store {
                status: 400,
                message: "mapper_parsing_exception".to_string()
            }
            .is_transient()
        );
        assert!(!Error::NotFound("abc".to_string()).is_transient());
        assert!(Error::NotFound("abc".to_string()).is_not_found());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::Transient("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::InvalidInput("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
