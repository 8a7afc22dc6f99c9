use crate::ports::RepositoryError;
use crate::services::{CoordinatorError, LedgerError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Payment(#[from] CoordinatorError),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Payment(err.into())
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl AppError {
    /// HTTP status, stable machine-readable code, and whether a retry may succeed.
    fn classify(&self) -> (StatusCode, &'static str, bool) {
        use CoordinatorError as C;
        match self {
            AppError::Payment(err) => {
                let retryable = err.is_retryable();
                let (status, code) = match err {
                    C::InsufficientBalance { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_balance")
                    }
                    C::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
                    C::GatewayRejected(_) => (StatusCode::PAYMENT_REQUIRED, "gateway_rejected"),
                    C::GatewayUnavailable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "gateway_unavailable")
                    }
                    C::GatewayNotConfigured(_) => (StatusCode::NOT_FOUND, "gateway_not_configured"),
                    C::WebhookSignatureInvalid => {
                        (StatusCode::UNAUTHORIZED, "webhook_signature_invalid")
                    }
                    C::MalformedWebhook(_) => (StatusCode::BAD_REQUEST, "malformed_webhook"),
                    C::AmountMismatch { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "amount_mismatch")
                    }
                    C::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    C::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
                    C::CampaignNotPayable { .. } => (StatusCode::CONFLICT, "campaign_not_payable"),
                    C::AlreadyPaid(_) => (StatusCode::CONFLICT, "already_paid"),
                    C::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                    C::Conflict(_) => (StatusCode::CONFLICT, "concurrent_update"),
                    C::Campaign(_) => (StatusCode::BAD_GATEWAY, "campaign_service_error"),
                    C::Ledger(LedgerError::BalanceOverflow { .. }) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "balance_limit_exceeded")
                    }
                    C::Ledger(LedgerError::InvalidAmount(_)) => {
                        (StatusCode::BAD_REQUEST, "validation_error")
                    }
                    C::Ledger(_) | C::Repository(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                    }
                };
                (status, code, retryable)
            }
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", true),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_error", false),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", false),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthenticated", false),
            AppError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", false),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, retryable) = self.classify();

        // Storage details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, code, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": code,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}
