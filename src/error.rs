use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::donors::repo::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("username is already taken")]
    UsernameTaken,

    #[error("user is not registered")]
    NotRegistered,

    #[error("username or password is incorrect")]
    BadCredentials,

    #[error("no donor matches the requested blood type and location")]
    NoMatch,

    #[error("no donor is registered under that username")]
    UnknownUser,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("profile belongs to another donor")]
    Forbidden,

    #[error("store unavailable, request was not applied: {0}")]
    StoreUnavailable(String),

    #[error("store did not confirm the outcome, request may have been applied: {0}")]
    OutcomeUnknown(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::OutcomeUnknown(msg) => AppError::OutcomeUnknown(msg),
            // username is the only natural key on donors
            StoreError::Conflict(_) => AppError::UsernameTaken,
            other => AppError::Store(other),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    retryable: bool,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::UsernameTaken => "username_taken",
            AppError::NotRegistered => "not_registered",
            AppError::BadCredentials => "bad_credentials",
            AppError::NoMatch => "no_match",
            AppError::UnknownUser => "unknown_user",
            AppError::InvalidToken => "invalid_token",
            AppError::Forbidden => "forbidden",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::OutcomeUnknown(_) => "outcome_unknown",
            AppError::Store(_) | AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BadCredentials | AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotRegistered | AppError::NoMatch | AppError::UnknownUser => {
                StatusCode::NOT_FOUND
            }
            AppError::UsernameTaken => StatusCode::CONFLICT,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::OutcomeUnknown(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Safe to resend as is. An unknown outcome is not: the first attempt may
    /// already have been applied.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "request failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_outcomes_are_client_errors() {
        assert_eq!(AppError::NoMatch.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::UnknownUser.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NotRegistered.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::UsernameTaken.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::BadCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn store_errors_keep_applied_vs_unknown_apart() {
        let unavailable = AppError::from(StoreError::Unavailable("down".into()));
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(unavailable.is_retryable());

        let unknown = AppError::from(StoreError::OutcomeUnknown("timeout".into()));
        assert_eq!(unknown.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(!unknown.is_retryable());
    }

    #[test]
    fn unique_violation_maps_to_username_taken() {
        let e = AppError::from(StoreError::Conflict("donors_username_key".into()));
        assert!(matches!(e, AppError::UsernameTaken));
    }

    #[test]
    fn corrupt_records_are_internal() {
        let e = AppError::from(StoreError::Corrupt("bad row".into()));
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code(), "internal");
    }
}
