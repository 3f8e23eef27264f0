pub mod checkout;

use axum::{routing::get, routing::post, Json, Router};
use serde_json::json;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/checkout", post(checkout::submit_checkout))
        .route("/api/v1/payments/callback", post(checkout::payment_callback))
        .route("/api/v1/payments/failure", post(checkout::payment_failure))
        .route("/api/v1/orders/:id", get(checkout::get_order))
        .with_state(state)
}
