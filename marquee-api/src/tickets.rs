use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use marquee_core::models::TicketView;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/tickets/verify", get(verify_ticket))
}

/// Target of the URL printed in every ticket QR code.
async fn verify_ticket(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<TicketView>, AppError> {
    Ok(Json(state.tickets.verify(query.token).await?))
}
