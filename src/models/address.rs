use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Postal codes are a fixed-length numeric string (6-digit PIN).
static POSTAL_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{6}$").expect("postal code pattern"));

/// Phone numbers are the 10-digit subscriber number, no country prefix.
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{10}$").expect("phone pattern"));

/// Shipping address as captured at checkout. A validated copy is
/// snapshotted onto the order; profile edits never touch past orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub district: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl ShippingAddress {
    /// Trims every field and checks the fixed-digit postal/phone shapes and
    /// required fields. Pure, no I/O; failures are resolved client-side and
    /// never reach the order store.
    pub fn validate(&self) -> Result<ShippingAddress, ServiceError> {
        let normalized = ShippingAddress {
            recipient: self.recipient.trim().to_string(),
            phone: self.phone.trim().to_string(),
            street: self.street.trim().to_string(),
            city: self.city.trim().to_string(),
            district: self.district.trim().to_string(),
            state: self.state.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            country: self.country.trim().to_string(),
        };

        for (field, value) in [
            ("recipient", &normalized.recipient),
            ("street", &normalized.street),
            ("city", &normalized.city),
            ("state", &normalized.state),
            ("country", &normalized.country),
        ] {
            if value.is_empty() {
                return Err(ServiceError::ValidationError(format!(
                    "Address field '{}' is required",
                    field
                )));
            }
        }

        if !POSTAL_CODE_RE.is_match(&normalized.postal_code) {
            return Err(ServiceError::ValidationError(
                "Postal code must be exactly 6 digits".to_string(),
            ));
        }

        if !PHONE_RE.is_match(&normalized.phone) {
            return Err(ServiceError::ValidationError(
                "Phone number must be exactly 10 digits".to_string(),
            ));
        }

        Ok(normalized)
    }
}
