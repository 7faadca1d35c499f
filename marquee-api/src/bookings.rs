use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use marquee_booking::{BookingHistory, BookingView};
use marquee_core::{Booking, Id};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub user_id: Id,
    pub screening_id: Id,
    pub seat_ids: Vec<Id>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/users/{id}/bookings", get(booking_history))
}

async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = state
        .reservations
        .create_booking(req.user_id, req.screening_id, &req.seat_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Id>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(state.reservations.get_booking(booking_id).await?))
}

async fn booking_history(
    State(state): State<AppState>,
    Path(user_id): Path<Id>,
    Query(page): Query<HistoryQuery>,
) -> Result<Json<BookingHistory>, AppError> {
    Ok(Json(
        state
            .reservations
            .booking_history(user_id, page.limit, page.offset)
            .await?,
    ))
}
