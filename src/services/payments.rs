use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// Gateway-side payment intent. Immutable once created; handed to the
/// client UI to complete payment out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub gateway_order_id: String,
    pub order_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
}

/// Completed-payment callback payload. Ephemeral; consumed exactly once by
/// the verify operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

/// External payment gateway boundary.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a gateway-side intent for the given amount. No local state
    /// is mutated; transport failures map to `GatewayUnavailable`.
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentIntent, ServiceError>;

    /// Checks a completed-payment callback. Rejects when the callback
    /// references a different order than expected, independent of signature
    /// validity, then recomputes the HMAC and compares constant-time.
    async fn verify(
        &self,
        result: &VerificationResult,
        expected_gateway_order_id: &str,
    ) -> Result<(), ServiceError>;
}

/// Converts a decimal amount to gateway minor units (paise).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let minor = amount * Decimal::from(100);
    if !minor.fract().is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "Amount {} has sub-minor-unit precision",
            amount
        )));
    }
    minor.to_i64().ok_or_else(|| {
        ServiceError::ValidationError(format!("Amount {} is out of range", amount))
    })
}

/// Signature over `"{gateway_order_id}|{gateway_payment_id}"` with the
/// server-held secret, hex encoded. This is what the gateway sends in its
/// completed-payment callback.
pub fn compute_signature(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{}|{}", gateway_order_id, gateway_payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[derive(Debug, Serialize)]
struct CreateGatewayOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: String,
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

/// HTTP implementation against the external gateway's orders API.
/// The signing secret is held here and never leaves the process.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            key_id: cfg.key_id.clone(),
            key_secret: cfg.key_secret.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(order_id = %order_id, amount_minor = amount_minor))]
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let body = CreateGatewayOrderBody {
            amount: amount_minor,
            currency,
            receipt: order_id.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("Gateway intent creation failed: {}", e);
                ServiceError::GatewayUnavailable(if e.is_timeout() {
                    "Gateway request timed out".to_string()
                } else {
                    "Gateway could not be reached".to_string()
                })
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(status = %status, "Gateway rejected intent creation");
            return Err(ServiceError::GatewayUnavailable(format!(
                "Gateway returned {}",
                status
            )));
        }

        let gateway_order: GatewayOrderResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayUnavailable(format!("Gateway response unreadable: {}", e))
        })?;

        info!(gateway_order_id = %gateway_order.id, "Payment intent created");
        Ok(PaymentIntent {
            gateway_order_id: gateway_order.id,
            order_id,
            amount_minor: gateway_order.amount,
            currency: gateway_order.currency,
        })
    }

    #[instrument(skip(self, result), fields(gateway_order_id = %result.gateway_order_id))]
    async fn verify(
        &self,
        result: &VerificationResult,
        expected_gateway_order_id: &str,
    ) -> Result<(), ServiceError> {
        // Cross-order replay guard: a callback for another order is invalid
        // no matter how its signature checks out.
        if result.gateway_order_id != expected_gateway_order_id {
            return Err(ServiceError::SignatureMismatch(
                "Callback references a different order".to_string(),
            ));
        }

        let expected = compute_signature(
            &self.key_secret,
            &result.gateway_order_id,
            &result.gateway_payment_id,
        );
        if !constant_time_eq(&expected, &result.signature) {
            return Err(ServiceError::SignatureMismatch(
                "Callback signature does not match".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    const SECRET: &str = "test_secret_key_of_adequate_length";

    fn gateway() -> HttpPaymentGateway {
        HttpPaymentGateway::new(&GatewayConfig {
            key_id: "key_test".into(),
            key_secret: SECRET.into(),
            base_url: "https://gateway.invalid".into(),
            timeout_secs: 1,
        })
        .expect("gateway construction")
    }

    fn signed_result(gateway_order_id: &str, payment_id: &str) -> VerificationResult {
        VerificationResult {
            gateway_order_id: gateway_order_id.into(),
            gateway_payment_id: payment_id.into(),
            signature: compute_signature(SECRET, gateway_order_id, payment_id),
        }
    }

    #[tokio::test]
    async fn valid_signature_verifies() {
        let result = signed_result("order_G123", "pay_H456");
        assert!(gateway().verify(&result, "order_G123").await.is_ok());
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let mut result = signed_result("order_G123", "pay_H456");
        result.signature = compute_signature(SECRET, "order_G123", "pay_OTHER");
        let err = gateway().verify(&result, "order_G123").await.unwrap_err();
        assert_matches!(err, ServiceError::SignatureMismatch(_));
    }

    #[tokio::test]
    async fn mismatched_order_id_is_rejected_despite_valid_signature() {
        // Signature is genuine for order_G999; replaying it against
        // order_G123 must still fail.
        let result = signed_result("order_G999", "pay_H456");
        let err = gateway().verify(&result, "order_G123").await.unwrap_err();
        assert_matches!(err, ServiceError::SignatureMismatch(_));
    }

    #[test]
    fn signature_is_stable_hex() {
        let sig = compute_signature(SECRET, "order_G123", "pay_H456");
        assert_eq!(sig, compute_signature(SECRET, "order_G123", "pay_H456"));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(499)).unwrap(), 49900);
        assert_eq!(to_minor_units(dec!(9.99)).unwrap(), 999);
        assert!(to_minor_units(dec!(0.001)).is_err());
    }
}
