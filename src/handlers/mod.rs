pub mod admin;
pub mod bookings;
pub mod health;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Header carrying the acting user's id, set by the upstream auth gateway.
pub const USER_HEADER: &str = "x-user-id";

fn actor_id(headers: &HeaderMap) -> AppResult<i64> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or(AppError::Unauthorized)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/availability", get(bookings::availability))
        .route(
            "/api/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/cancel", put(bookings::cancel_booking))
        .route("/api/bookings/:id/notes", put(bookings::add_notes))
        .route("/api/admin/bookings", get(admin::list_bookings))
        .route("/api/admin/bookings/:id/approve", post(admin::approve_booking))
        .route("/api/admin/bookings/:id/reject", post(admin::reject_booking))
        .route("/api/admin/bookings/:id/cancel", post(admin::cancel_booking))
        .route("/api/admin/bookings/:id/move", post(admin::move_booking))
        .route("/api/admin/rules", get(admin::list_rules).post(admin::create_rule))
        .route(
            "/api/admin/rules/:id",
            put(admin::update_rule).delete(admin::delete_rule),
        )
        .route(
            "/api/admin/blocked-dates",
            get(admin::list_blocked_dates).post(admin::block_date),
        )
        .route("/api/admin/blocked-dates/:id", delete(admin::unblock_date))
        .route(
            "/api/admin/holidays",
            get(admin::list_holidays).post(admin::add_holiday),
        )
        .route("/api/admin/holidays/:id", delete(admin::remove_holiday))
        .route("/api/admin/settings", get(admin::get_settings))
        .route("/api/admin/settings/:key", put(admin::put_setting))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
