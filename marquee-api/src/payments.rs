use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use marquee_core::payment::PaymentMethod;
use marquee_core::Id;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub booking_id: Id,
    pub payment_method: Id,
    /// Minor currency units.
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub payment_id: Id,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payment-methods", get(list_payment_methods))
        .route("/v1/payments", post(create_payment))
}

async fn list_payment_methods(State(state): State<AppState>) -> Result<Json<Vec<PaymentMethod>>, AppError> {
    Ok(Json(state.payments.list_payment_methods().await?))
}

/// POST /v1/payments
/// Safe to repeat: while the booking's payment is still pending the same id comes back.
async fn create_payment(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Json<CreatePaymentResponse>, AppError> {
    let payment_id = state
        .payments
        .create_payment(req.booking_id, req.payment_method, req.amount)
        .await?;
    Ok(Json(CreatePaymentResponse { payment_id }))
}
