//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`; service errors
//! convert into `HttpAppError` and render as [`ErrorResponse`] bodies.

use axum::{
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mediaflow_infra::ErrorResponse;
use mediaflow_services::IssuerError;
use serde::de::DeserializeOwned;

#[derive(Debug)]
pub enum HttpAppError {
    Issuer(IssuerError),
    InvalidBody(String),
}

impl From<IssuerError> for HttpAppError {
    fn from(err: IssuerError) -> Self {
        HttpAppError::Issuer(err)
    }
}

impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        HttpAppError::InvalidBody(format!("Invalid request body: {}", rejection.body_text()))
    }
}

/// JSON body extractor that answers malformed bodies with our error shape.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        Ok(ValidatedJson(inner))
    }
}

impl HttpAppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            HttpAppError::InvalidBody(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            HttpAppError::Issuer(err) => match err {
                IssuerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
                IssuerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                IssuerError::StorageUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
                }
                IssuerError::QueuePublish { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE")
                }
                IssuerError::Repository(e) if e.is_recoverable() => {
                    (StatusCode::SERVICE_UNAVAILABLE, "DATABASE_UNAVAILABLE")
                }
                IssuerError::Repository(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
                }
                IssuerError::IdAllocation(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ID_ALLOCATION_FAILED")
                }
            },
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            HttpAppError::InvalidBody(_) => false,
            HttpAppError::Issuer(err) => err.is_recoverable(),
        }
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            HttpAppError::InvalidBody(msg) => msg.clone(),
            HttpAppError::Issuer(err) if status.is_server_error() => {
                tracing::error!(error = %err, code, "Request failed");
                // Backend details stay in the logs.
                match err {
                    IssuerError::StorageUnavailable(_) => "Storage is temporarily unavailable",
                    IssuerError::QueuePublish { .. } => "Processing queue is temporarily unavailable",
                    IssuerError::Repository(_) => "Database is temporarily unavailable",
                    _ => "Internal server error",
                }
                .to_string()
            }
            HttpAppError::Issuer(err) => {
                tracing::debug!(error = %err, code, "Request rejected");
                err.to_string()
            }
        };

        let body = ErrorResponse::new(message, code, self.is_recoverable());
        (status, Json(body)).into_response()
    }
}
