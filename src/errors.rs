use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::BookingStatus;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("missing required fields: {0}")]
    MissingFields(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid pricing: {0}")]
    InvalidPricingConfig(String),

    #[error("invalid payment settings: {0}")]
    InvalidPaymentConfig(String),

    #[error("invalid booking settings: {0}")]
    InvalidBookingConfig(String),

    #[error("invalid cancellation policy: {0}")]
    InvalidCancellationConfig(String),

    #[error("invalid availability: {0}")]
    InvalidAvailabilityConfig(String),

    #[error("{0}")]
    BookingWindowViolation(String),

    #[error("end time must be after start time")]
    InvalidTimeRange,

    #[error("service is not available on {0}")]
    ServiceUnavailable(String),

    #[error("not enough capacity: requested {requested}, remaining {remaining}")]
    InsufficientCapacity { requested: u32, remaining: i64 },

    #[error("payment method and details are required for online payment")]
    PaymentDetailsRequired,

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("cannot {requested} a booking that is {current}")]
    InvalidStateTransition {
        current: BookingStatus,
        requested: &'static str,
    },

    #[error("cancellation is not allowed for this service")]
    CancellationNotAllowed,

    #[error("unauthorized")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MissingFields(_) => "missing_fields",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::InvalidPricingConfig(_) => "invalid_pricing_config",
            AppError::InvalidPaymentConfig(_) => "invalid_payment_config",
            AppError::InvalidBookingConfig(_) => "invalid_booking_config",
            AppError::InvalidCancellationConfig(_) => "invalid_cancellation_config",
            AppError::InvalidAvailabilityConfig(_) => "invalid_availability_config",
            AppError::BookingWindowViolation(_) => "booking_window_violation",
            AppError::InvalidTimeRange => "invalid_time_range",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::InsufficientCapacity { .. } => "insufficient_capacity",
            AppError::PaymentDetailsRequired => "payment_details_required",
            AppError::PaymentFailed(_) => "payment_failed",
            AppError::InvalidStateTransition { .. } => "invalid_state_transition",
            AppError::CancellationNotAllowed => "cancellation_not_allowed",
            AppError::Unauthorized => "unauthorized",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::FORBIDDEN,
            AppError::InsufficientCapacity { .. }
            | AppError::ServiceUnavailable(_)
            | AppError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            AppError::PaymentDetailsRequired | AppError::PaymentFailed(_) => {
                StatusCode::PAYMENT_REQUIRED
            }
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                "internal error".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({ "error": self.kind(), "message": message });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transition_message_names_both_states() {
        let err = AppError::InvalidStateTransition {
            current: BookingStatus::Completed,
            requested: "approve",
        };
        assert_eq!(err.to_string(), "cannot approve a booking that is completed");
        assert_eq!(err.kind(), "invalid_state_transition");
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = AppError::Internal(anyhow::anyhow!("disk on fire at /var/db"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_domain_statuses() {
        assert_eq!(
            AppError::InsufficientCapacity { requested: 3, remaining: 1 }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::PaymentDetailsRequired.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(AppError::InvalidTimeRange.status(), StatusCode::BAD_REQUEST);
    }
}
