use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::actor_id;
use crate::errors::AppResult;
use crate::models::{Booking, BookingFilter};
use crate::services::lifecycle::{CreateBookingRequest, DayAvailability};
use crate::state::AppState;

// GET /api/availability
#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub dog_id: Option<i64>,
}

pub async fn availability(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<DayAvailability>> {
    let user_id = actor_id(&headers)?;
    let day = state
        .engine
        .availability(user_id, query.date, query.dog_id)
        .await?;
    Ok(Json(day))
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> AppResult<(StatusCode, Json<Booking>)> {
    let user_id = actor_id(&headers)?;
    let booking = state.engine.create(user_id, req).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<BookingFilter>,
) -> AppResult<Json<Vec<Booking>>> {
    let user_id = actor_id(&headers)?;
    Ok(Json(state.engine.list_own(user_id, filter).await?))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<Json<Booking>> {
    let user_id = actor_id(&headers)?;
    Ok(Json(state.engine.get(user_id, id).await?))
}

// PUT /api/bookings/:id/cancel
#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    req: Option<Json<CancelRequest>>,
) -> AppResult<Json<Booking>> {
    let user_id = actor_id(&headers)?;
    let reason = req.and_then(|Json(r)| r.reason);
    Ok(Json(state.engine.cancel_by_user(user_id, id, reason).await?))
}

// PUT /api/bookings/:id/notes
#[derive(Deserialize)]
pub struct NotesRequest {
    pub notes: String,
}

pub async fn add_notes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<NotesRequest>,
) -> AppResult<Json<Booking>> {
    let user_id = actor_id(&headers)?;
    Ok(Json(state.engine.add_notes(user_id, id, req.notes).await?))
}
