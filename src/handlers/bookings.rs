use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{actor, PageQuery};
use crate::errors::AppResult;
use crate::models::{Booking, Page};
use crate::services::booking::NewBooking;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
    pub amount: Option<Decimal>,
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewBooking>,
) -> AppResult<(StatusCode, Json<Booking>)> {
    let actor = actor(&headers)?;
    let booking = state.bookings.create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    Ok(Json(state.bookings.get(&actor, &id)?))
}

// GET /api/users/:id/bookings?page=
pub async fn list_for_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<Booking>>> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .bookings
            .list_for_user(&actor, &user_id, query.page())?,
    ))
}

// GET /api/services/:id/bookings?page=
pub async fn list_for_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<Booking>>> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .bookings
            .list_for_service(&actor, &service_id, query.page())?,
    ))
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    Ok(Json(state.bookings.approve(&actor, &id)?))
}

pub async fn reject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.bookings.reject(&actor, &id, reason)?))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(state.bookings.cancel(&actor, &id, reason)?))
}

pub async fn confirm(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    Ok(Json(state.bookings.confirm(&actor, &id)?))
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    Ok(Json(state.bookings.complete(&actor, &id)?))
}

pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    Ok(Json(state.bookings.mark_no_show(&actor, &id)?))
}

// POST /api/bookings/:id/refund  {"amount": "10.00"} or empty for the full refundable amount
pub async fn refund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<RefundBody>>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    let amount = body.and_then(|Json(b)| b.amount);
    Ok(Json(state.bookings.process_refund(&actor, &id, amount)?))
}

// POST /api/bookings/:id/expire  (scheduler callback, x-actor: system)
pub async fn expire(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<Booking>> {
    let actor = actor(&headers)?;
    Ok(Json(state.bookings.expire(&actor, &id)?))
}
