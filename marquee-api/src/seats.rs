use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use marquee_core::models::SeatAvailability;
use marquee_core::Id;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SeatMapResponse {
    pub screening_id: Id,
    pub seats: Vec<SeatAvailability>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/screenings/{id}/seats", get(get_seats))
}

/// GET /v1/screenings/{id}/seats
async fn get_seats(
    State(state): State<AppState>,
    Path(screening_id): Path<Id>,
) -> Result<Json<SeatMapResponse>, AppError> {
    let seats = state.seats.get_seats(screening_id).await?;
    Ok(Json(SeatMapResponse { screening_id, seats }))
}
