//! Maps `ExchangeError` to the fixed JSON error shape spec.md §6 requires,
//! following the teacher's pattern (`simple_handlers.rs`) of a single place
//! where internal errors become a stable response rather than leaking
//! `Display` output.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use exchange_core::ExchangeError;
use serde_json::json;

pub struct ApiError(pub ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let category = self.0.category();
        let status = match self.0 {
            ExchangeError::Validation(_) | ExchangeError::Precondition(_) => StatusCode::BAD_REQUEST,
            ExchangeError::Authorization => StatusCode::UNAUTHORIZED,
            ExchangeError::Conflict(_) => StatusCode::CONFLICT,
            ExchangeError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            ExchangeError::External(_) => StatusCode::BAD_GATEWAY,
            ExchangeError::Integrity { .. } | ExchangeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, category, "internal error surfaced to caller");
        }

        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "internal server error".to_string(),
            _ => self.0.to_string(),
        };

        (status, Json(json!({ "error": category, "message": message }))).into_response()
    }
}
