use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use matchday_shared::ProtocolError;
use matchday_store::StoreError;

use crate::delivery::DeliveryError;
use crate::hub::HubError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many messages, slow down")]
    TooManyRequests,

    #[error("Message store unavailable")]
    StoreUnavailable(#[source] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("Record not found".into()),
            e if e.is_validation() => ServerError::BadRequest(e.to_string()),
            e => ServerError::StoreUnavailable(e),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::BadRequest(err.to_string())
    }
}

impl From<DeliveryError> for ServerError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Persistence(e) => ServerError::from(e),
            DeliveryError::UnknownReceiver(_) => ServerError::NotFound(err.to_string()),
            validation => ServerError::BadRequest(validation.to_string()),
        }
    }
}

impl From<HubError> for ServerError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::NotAParticipant { .. } => ServerError::Forbidden(err.to_string()),
            HubError::UnknownConnection(_) => ServerError::Internal(err.to_string()),
        }
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ServerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show a client. Storage and internal failures are logged
    /// here and replaced with a generic message.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::StoreUnavailable(e) => {
                tracing::error!(error = %e, "Message store failure");
                "Message store unavailable, please try again".to_string()
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.public_message(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}
