//! Error taxonomy for order creation, payment verification and webhook
//! reconciliation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),

    #[error("no valid items")]
    NoValidItems,

    #[error("insufficient stock for product {0}")]
    InsufficientStock(i64),

    #[error("payment verification failed")]
    PaymentVerificationFailed,

    #[error("payment gateway unavailable")]
    GatewayUnavailable,

    #[error("order cannot be cancelled")]
    CannotCancel,

    #[error("order not found")]
    NotFound,

    #[error("invalid webhook signature")]
    InvalidWebhookSignature,

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::NoValidItems
            | Self::InsufficientStock(_)
            | Self::PaymentVerificationFailed
            | Self::CannotCancel
            | Self::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            // Retryable: the intent was never persisted, the client may try again.
            Self::GatewayUnavailable => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Never leak driver errors to the caller.
            Self::Database(err) => {
                tracing::error!(error = %err, "database failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(OrderError::NoValidItems.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            OrderError::InsufficientStock(7).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(OrderError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            OrderError::GatewayUnavailable.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            OrderError::Database(sqlx::Error::PoolClosed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
