use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use super::actor_id;
use crate::errors::AppResult;
use crate::models::{
    BlockedDate, Booking, BookingFilter, BookingTimeRule, DayType, Holiday, NewBlockedDate,
    NewHoliday, RuleInput, Settings, User,
};
use crate::services::lifecycle::MoveBookingRequest;
use crate::state::AppState;

async fn require_admin(state: &AppState, headers: &HeaderMap) -> AppResult<User> {
    let user_id = actor_id(headers)?;
    state.engine.require_admin(user_id).await
}

#[derive(Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

// GET /api/admin/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<BookingFilter>,
) -> AppResult<Json<Vec<Booking>>> {
    let admin_id = actor_id(&headers)?;
    Ok(Json(state.engine.list_all(admin_id, filter).await?))
}

// POST /api/admin/bookings/:id/approve
pub async fn approve_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<Json<Booking>> {
    let admin_id = actor_id(&headers)?;
    Ok(Json(state.engine.approve(admin_id, id).await?))
}

// POST /api/admin/bookings/:id/reject
pub async fn reject_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<ReasonRequest>,
) -> AppResult<Json<Booking>> {
    let admin_id = actor_id(&headers)?;
    Ok(Json(state.engine.reject(admin_id, id, req.reason).await?))
}

// POST /api/admin/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<ReasonRequest>,
) -> AppResult<Json<Booking>> {
    let admin_id = actor_id(&headers)?;
    Ok(Json(state.engine.cancel_by_admin(admin_id, id, req.reason).await?))
}

// POST /api/admin/bookings/:id/move
pub async fn move_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<MoveBookingRequest>,
) -> AppResult<Json<Booking>> {
    let admin_id = actor_id(&headers)?;
    Ok(Json(state.engine.move_booking(admin_id, id, req).await?))
}

// GET /api/admin/rules
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<BTreeMap<DayType, Vec<BookingTimeRule>>>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.config_service.rules().await?))
}

// POST /api/admin/rules
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<RuleInput>,
) -> AppResult<(StatusCode, Json<BookingTimeRule>)> {
    require_admin(&state, &headers).await?;
    let rule = state.config_service.create_rule(input).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

// PUT /api/admin/rules/:id
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<RuleInput>,
) -> AppResult<StatusCode> {
    require_admin(&state, &headers).await?;
    state.config_service.update_rule(id, input).await?;
    Ok(StatusCode::NO_CONTENT)
}

// DELETE /api/admin/rules/:id
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    require_admin(&state, &headers).await?;
    state.config_service.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/admin/blocked-dates
pub async fn list_blocked_dates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<BlockedDate>>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.config_service.blocked_dates().await?))
}

// POST /api/admin/blocked-dates
pub async fn block_date(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut block): Json<NewBlockedDate>,
) -> AppResult<(StatusCode, Json<BlockedDate>)> {
    let admin = require_admin(&state, &headers).await?;
    block.created_by = admin.id;
    let created = state.config_service.block_date(block).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// DELETE /api/admin/blocked-dates/:id
pub async fn unblock_date(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    require_admin(&state, &headers).await?;
    state.config_service.unblock_date(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/admin/holidays
#[derive(Deserialize)]
pub struct HolidaysQuery {
    pub year: Option<i32>,
}

pub async fn list_holidays(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HolidaysQuery>,
) -> AppResult<Json<Vec<Holiday>>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.config_service.holidays(query.year).await?))
}

// POST /api/admin/holidays
pub async fn add_holiday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(holiday): Json<NewHoliday>,
) -> AppResult<(StatusCode, Json<Holiday>)> {
    let admin = require_admin(&state, &headers).await?;
    let created = state.config_service.add_holiday(holiday, admin.id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// DELETE /api/admin/holidays/:id
pub async fn remove_holiday(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    require_admin(&state, &headers).await?;
    state.config_service.remove_holiday(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/admin/settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<Settings>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.config_service.settings().await?))
}

// PUT /api/admin/settings/:key
#[derive(Deserialize)]
pub struct SettingValue {
    pub value: String,
}

pub async fn put_setting(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(req): Json<SettingValue>,
) -> AppResult<Json<Settings>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.config_service.put_setting(&key, &req.value).await?))
}
