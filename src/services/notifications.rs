use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::services::orders::OrderResponse;

/// Order-confirmation side channel. Best-effort by contract: callers log
/// failures and never let them block order completion.
#[async_trait]
pub trait ConfirmationSender: Send + Sync {
    async fn send_order_confirmation(&self, order: &OrderResponse) -> Result<(), ServiceError>;
}

/// Posts a confirmation summary to a configured webhook with a short
/// timeout.
pub struct WebhookConfirmationSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookConfirmationSender {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConfirmationSender for WebhookConfirmationSender {
    async fn send_order_confirmation(&self, order: &OrderResponse) -> Result<(), ServiceError> {
        let payload = json!({
            "type": "order.confirmation",
            "order_id": order.id,
            "order_number": order.order_number,
            "customer_email": order.customer_email,
            "customer_name": order.customer_name,
            "total_amount": order.total_amount,
            "currency": order.currency,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                ServiceError::InternalError(format!("Confirmation webhook unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::InternalError(format!(
                "Confirmation webhook returned {}",
                response.status()
            )));
        }

        info!(order_id = %order.id, "Order confirmation delivered");
        Ok(())
    }
}

/// Fallback sender used when no webhook is configured.
pub struct LogConfirmationSender;

#[async_trait]
impl ConfirmationSender for LogConfirmationSender {
    async fn send_order_confirmation(&self, order: &OrderResponse) -> Result<(), ServiceError> {
        warn!(
            order_id = %order.id,
            customer_email = %order.customer_email,
            "No notification channel configured; confirmation logged only"
        );
        Ok(())
    }
}
