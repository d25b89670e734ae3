use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{actor, PageQuery};
use crate::errors::AppResult;
use crate::models::{
    Availability, AvailabilityReport, BookingSettings, CancellationPolicy, Page, PaymentSettings,
    Pricing, Service,
};
use crate::services::catalog::{NewService, ServiceInfoUpdate};
use crate::state::AppState;

// POST /api/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NewService>,
) -> AppResult<(StatusCode, Json<Service>)> {
    let actor = actor(&headers)?;
    let service = state.catalog.create_service(&actor, req)?;
    Ok((StatusCode::CREATED, Json(service)))
}

// GET /api/services/:id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Service>> {
    Ok(Json(state.catalog.get_service(&id)?))
}

// DELETE /api/services/:id
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let actor = actor(&headers)?;
    state.catalog.delete_service(&actor, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<NaiveDate>,
}

// GET /api/services/:id/availability?date=YYYY-MM-DD
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<AvailabilityReport>> {
    Ok(Json(state.catalog.get_availability(&id, query.date)?))
}

// GET /api/businesses/:id/services?page=
pub async fn list_by_business(
    State(state): State<Arc<AppState>>,
    Path(business_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<Service>>> {
    Ok(Json(
        state.catalog.list_by_business(&business_id, query.page())?,
    ))
}

// GET /api/categories/:category/services?page=
pub async fn list_by_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<Service>>> {
    Ok(Json(state.catalog.list_by_category(&category, query.page())?))
}

pub async fn update_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<ServiceInfoUpdate>,
) -> AppResult<Json<Service>> {
    let actor = actor(&headers)?;
    Ok(Json(state.catalog.update_info(&actor, &id, update)?))
}

pub async fn update_pricing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(pricing): Json<Pricing>,
) -> AppResult<Json<Service>> {
    let actor = actor(&headers)?;
    Ok(Json(state.catalog.update_pricing(&actor, &id, pricing)?))
}

pub async fn update_payment_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(settings): Json<PaymentSettings>,
) -> AppResult<Json<Service>> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .catalog
            .update_payment_settings(&actor, &id, settings)?,
    ))
}

pub async fn update_booking_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(settings): Json<BookingSettings>,
) -> AppResult<Json<Service>> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .catalog
            .update_booking_settings(&actor, &id, settings)?,
    ))
}

pub async fn update_cancellation_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(policy): Json<CancellationPolicy>,
) -> AppResult<Json<Service>> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .catalog
            .update_cancellation_policy(&actor, &id, policy)?,
    ))
}

pub async fn update_availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(availability): Json<Availability>,
) -> AppResult<Json<Service>> {
    let actor = actor(&headers)?;
    Ok(Json(
        state
            .catalog
            .update_availability(&actor, &id, availability)?,
    ))
}
