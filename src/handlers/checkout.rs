use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    entities::order::PaymentMethod,
    errors::ServiceError,
    models::{Cart, ShippingAddress},
    services::{
        checkout::{CheckoutOutcome, CheckoutRequest},
        orders::CustomerSnapshot,
        payments::VerificationResult,
    },
    AppState,
};

/// Checkout submission body. The attempt id makes resubmission after a
/// transient failure idempotent; clients keep it stable per cart
/// submission.
#[derive(Debug, Deserialize)]
pub struct CheckoutSubmission {
    #[serde(default = "Uuid::new_v4")]
    pub attempt_id: Uuid,
    pub customer: CustomerSnapshot,
    pub cart: Cart,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

/// Completed-payment callback from the gateway, relayed by the client
/// payment UI.
#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentFailureReport {
    pub order_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutcomeBody {
    success: bool,
    outcome: &'static str,
    retry_safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

/// Maps a checkout outcome onto the HTTP surface. The outcome code and the
/// retry flag are the contract; the status code mirrors them for plain
/// HTTP clients.
fn outcome_response(outcome: CheckoutOutcome) -> Response {
    let code = outcome.code();
    let retry_safe = outcome.retry_safe();
    let (status, message, data) = match outcome {
        CheckoutOutcome::Success { order } => (
            StatusCode::OK,
            None,
            Some(json!({ "order": order })),
        ),
        CheckoutOutcome::AwaitingPayment { order_id, intent } => (
            StatusCode::OK,
            None,
            Some(json!({ "order_id": order_id, "intent": intent })),
        ),
        CheckoutOutcome::NeedsCartCleanup { message } => {
            (StatusCode::UNPROCESSABLE_ENTITY, Some(message), None)
        }
        CheckoutOutcome::Invalid { message } => (StatusCode::BAD_REQUEST, Some(message), None),
        CheckoutOutcome::PaymentDeclined { message } => {
            (StatusCode::PAYMENT_REQUIRED, Some(message), None)
        }
        CheckoutOutcome::VerificationPendingSupport { message } => {
            (StatusCode::CONFLICT, Some(message), None)
        }
        CheckoutOutcome::RetryableError { message } => {
            (StatusCode::SERVICE_UNAVAILABLE, Some(message), None)
        }
    };

    let body = OutcomeBody {
        success: status == StatusCode::OK,
        outcome: code,
        retry_safe,
        message,
        data,
    };
    (status, Json(body)).into_response()
}

/// POST /api/v1/checkout
pub async fn submit_checkout(
    State(state): State<AppState>,
    Json(submission): Json<CheckoutSubmission>,
) -> Result<Response, ServiceError> {
    let request = CheckoutRequest {
        customer: submission.customer,
        cart: submission.cart,
        shipping_address: submission.shipping_address,
        payment_method: submission.payment_method,
    };

    let outcome = state
        .checkout_service
        .place_order(submission.attempt_id, request)
        .await?;
    Ok(outcome_response(outcome))
}

/// POST /api/v1/payments/callback
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Response, ServiceError> {
    let result = VerificationResult {
        gateway_order_id: callback.gateway_order_id,
        gateway_payment_id: callback.gateway_payment_id,
        signature: callback.signature,
    };

    let outcome = state
        .checkout_service
        .confirm_payment(callback.order_id, result)
        .await?;
    Ok(outcome_response(outcome))
}

/// POST /api/v1/payments/failure
pub async fn payment_failure(
    State(state): State<AppState>,
    Json(report): Json<PaymentFailureReport>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .checkout_service
        .record_payment_failure(report.order_id, report.reason)
        .await?;
    Ok(outcome_response(outcome))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state
        .order_store
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "data": order })),
    )
        .into_response())
}
