pub mod bookings;
pub mod health;
pub mod services;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::services::identity::Actor;
use crate::state::AppState;

/// Identity asserted by the upstream gateway.
pub fn actor(headers: &HeaderMap) -> AppResult<Actor> {
    let system = headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("system"));
    if system {
        return Ok(Actor::System);
    }

    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(Actor::user)
        .ok_or(AppError::Unauthorized)
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/services", post(services::create_service))
        .route(
            "/api/services/:id",
            get(services::get_service).delete(services::delete_service),
        )
        .route("/api/services/:id/info", post(services::update_info))
        .route("/api/services/:id/pricing", post(services::update_pricing))
        .route(
            "/api/services/:id/payment-settings",
            post(services::update_payment_settings),
        )
        .route(
            "/api/services/:id/booking-settings",
            post(services::update_booking_settings),
        )
        .route(
            "/api/services/:id/cancellation-policy",
            post(services::update_cancellation_policy),
        )
        .route(
            "/api/services/:id/availability",
            get(services::get_availability).post(services::update_availability),
        )
        .route(
            "/api/services/:id/bookings",
            get(bookings::list_for_service),
        )
        .route(
            "/api/businesses/:id/services",
            get(services::list_by_business),
        )
        .route(
            "/api/categories/:category/services",
            get(services::list_by_category),
        )
        .route("/api/bookings", post(bookings::create_booking))
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/approve", post(bookings::approve))
        .route("/api/bookings/:id/reject", post(bookings::reject))
        .route("/api/bookings/:id/cancel", post(bookings::cancel))
        .route("/api/bookings/:id/confirm", post(bookings::confirm))
        .route("/api/bookings/:id/complete", post(bookings::complete))
        .route("/api/bookings/:id/no-show", post(bookings::mark_no_show))
        .route("/api/bookings/:id/refund", post(bookings::refund))
        .route("/api/bookings/:id/expire", post(bookings::expire))
        .route("/api/users/:id/bookings", get(bookings::list_for_user))
        .with_state(state)
}
