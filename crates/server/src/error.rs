use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use search::SearchError;
use serde::{Deserialize, Serialize};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server-side failures. Everything caller-visible flattens into the
/// `{code, message, retryable}` envelope; the search taxonomy carries its
/// own codes, the rest map to `InvalidRequest` or `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

/// The wire envelope for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ServerError {
    fn envelope(&self) -> ErrorEnvelope {
        match self {
            ServerError::Search(e) => ErrorEnvelope {
                code: e.code().to_owned(),
                message: e.to_string(),
                retryable: e.retryable(),
            },
            ServerError::BadRequest(msg) => ErrorEnvelope {
                code: "InvalidRequest".into(),
                message: msg.clone(),
                retryable: false,
            },
            ServerError::Config(msg) | ServerError::Internal(msg) => ErrorEnvelope {
                code: "Internal".into(),
                message: msg.clone(),
                retryable: true,
            },
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Search(e) => search_status(e),
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Config(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn search_status(error: &SearchError) -> StatusCode {
    match error {
        SearchError::InvalidRequest(_) | SearchError::QueryEmpty => StatusCode::BAD_REQUEST,
        SearchError::IndexNotReady
        | SearchError::ModelMismatch(_)
        | SearchError::EmbeddingFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        SearchError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
        // 499: client closed request / deadline hit, nginx convention.
        SearchError::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        SearchError::NotFound(_) => StatusCode::NOT_FOUND,
        SearchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let envelope = self.envelope();
        (status, Json(envelope)).into_response()
    }
}

impl From<registry::RegistryError> for ServerError {
    fn from(e: registry::RegistryError) -> Self {
        ServerError::Internal(e.to_string())
    }
}

impl From<axum::extract::rejection::JsonRejection> for ServerError {
    fn from(e: axum::extract::rejection::JsonRejection) -> Self {
        ServerError::BadRequest(e.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for ServerError {
    fn from(e: axum::extract::rejection::QueryRejection) -> Self {
        ServerError::BadRequest(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_errors_map_to_spec_statuses() {
        assert_eq!(
            search_status(&SearchError::QueryEmpty),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            search_status(&SearchError::IndexNotReady),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            search_status(&SearchError::Overloaded),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(search_status(&SearchError::Cancelled).as_u16(), 499);
        assert_eq!(
            search_status(&SearchError::NotFound("tool 9".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn envelope_carries_code_and_retryability() {
        let err = ServerError::Search(SearchError::Overloaded);
        let envelope = err.envelope();
        assert_eq!(envelope.code, "Overloaded");
        assert!(envelope.retryable);

        let err = ServerError::BadRequest("unknown field".into());
        let envelope = err.envelope();
        assert_eq!(envelope.code, "InvalidRequest");
        assert!(!envelope.retryable);
    }
}
