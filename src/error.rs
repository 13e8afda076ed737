use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

use crate::{boletos::BoletoError, kv::KvError, storage::StorageError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "insufficient permissions")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            other => {
                error!(error = %other, "database error");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "database error")
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(_) => AppError::not_found(),
            other => AppError::internal(other),
        }
    }
}

impl From<BoletoError> for AppError {
    fn from(value: BoletoError) -> Self {
        match value {
            BoletoError::InvalidSignature => AppError::unauthorized(),
            other => AppError::bad_request(other.to_string()),
        }
    }
}

impl From<KvError> for AppError {
    fn from(value: KvError) -> Self {
        AppError::internal(value)
    }
}

/// Maps a unique-constraint violation to 409 and everything else through the default path.
pub fn conflict_on_unique(err: diesel::result::Error, message: &str) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => AppError::conflict(message),
        other => AppError::from(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    #[test]
    fn database_errors_do_not_leak_their_detail() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("value too long for type character varying(100)".to_string()),
        );
        let app_error = AppError::from(err);
        assert_eq!(app_error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app_error.message, "database error");

        assert_eq!(AppError::from(DieselError::NotFound).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unique_violations_become_conflicts() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key".to_string()),
        );
        let app_error = conflict_on_unique(err, "email already registered");
        assert_eq!(app_error.status(), StatusCode::CONFLICT);
        assert_eq!(app_error.message, "email already registered");
    }

    #[test]
    fn boleto_errors_map_to_client_statuses() {
        assert_eq!(
            AppError::from(BoletoError::InvalidSignature).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(BoletoError::FieldTooLong { field: "barCode", max: 100 }).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
