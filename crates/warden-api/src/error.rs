//! Error types for the HTTP front end

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use warden_common::store::StoreError;
use warden_lifecycle::ReconcileError;

use crate::auth::AuthError;

/// Result type for handler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for handler operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No authenticator accepted the request
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// No policy grants the request, or the target does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The request or a collaborator call was rejected
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Server-side failure
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid server configuration (TLS material, bind address)
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Message returned to the client
    fn message(&self) -> &str {
        match self {
            Error::Unauthorized(m)
            | Error::NotFound(m)
            | Error::BadRequest(m)
            | Error::Internal(m)
            | Error::Config(m) => m,
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Body is a bare JSON string
        (self.status(), axum::Json(self.message().to_string())).into_response()
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Unauthorized(e.to_string())
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::BadRequest(e.to_string())
    }
}

impl From<ReconcileError> for Error {
    fn from(e: ReconcileError) -> Self {
        Error::BadRequest(e.to_string())
    }
}
