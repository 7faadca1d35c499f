use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

use marquee_core::payment::PaymentStatus;
use marquee_core::Id;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    pub payment_id: Id,
    pub status: PaymentStatus,
    pub transaction_id: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentCallbackAck {
    pub payment_id: Id,
    /// Set only when this delivery settled the payment as successful.
    pub booking_id: Option<Id>,
    pub tickets_queued: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_callback))
}

/// POST /v1/webhooks/payments
/// Gateways retry until they get a 2xx, so duplicates are expected and acknowledged.
async fn handle_payment_callback(
    State(state): State<AppState>,
    Json(payload): Json<PaymentCallback>,
) -> Result<Json<PaymentCallbackAck>, AppError> {
    tracing::info!(
        payment_id = payload.payment_id,
        status = %payload.status,
        "Received payment callback"
    );

    let booking_id = state
        .payments
        .update_payment(payload.payment_id, payload.status, &payload.transaction_id)
        .await?;

    let tickets_queued = match booking_id {
        Some(id) => state.dispatcher.dispatch_tickets(id).await,
        None => false,
    };

    Ok(Json(PaymentCallbackAck {
        payment_id: payload.payment_id,
        booking_id,
        tickets_queued,
    }))
}
