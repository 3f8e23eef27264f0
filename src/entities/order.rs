use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable order record. Orders are append-only financial records: rows are
/// created once by the order store and mutated only through status
/// transitions; cancellation is a status value, never a deletion.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub order_number: String,

    /// Checkout attempt that created this order. Unique, so one attempt can
    /// never produce two orders, and a resubmitted attempt resolves to the
    /// same order even after a process restart.
    #[sea_orm(unique)]
    pub checkout_attempt_id: Uuid,

    pub customer_id: Uuid,

    // Contact snapshot copied at creation time; later profile edits must
    // not retroactively alter historical orders.
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,

    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,

    /// Gateway-side order id, set once an intent exists. Used to correlate
    /// payment callbacks to the order they belong to.
    #[sea_orm(nullable)]
    pub gateway_order_id: Option<String>,

    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub currency: String,

    /// Shipping address snapshot, serialized JSON
    pub shipping_address: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order lifecycle states driven by the reconciliation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "awaiting_payment")]
    AwaitingPayment,
    /// A gateway callback is being checked against the server-held secret.
    #[sea_orm(string_value = "verifying")]
    Verifying,
    #[sea_orm(string_value = "finalized")]
    Finalized,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
    #[sea_orm(string_value = "verification_failed")]
    VerificationFailed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finalized | Self::PaymentFailed | Self::VerificationFailed | Self::Cancelled
        )
    }

    /// Position in the forward-only lifecycle; transitions may never move
    /// to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::AwaitingPayment => 1,
            Self::Verifying => 2,
            Self::Finalized
            | Self::PaymentFailed
            | Self::VerificationFailed
            | Self::Cancelled => 3,
        }
    }
}

/// Payment settlement states. Forward-only: Pending may move to any settled
/// state, settled states never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "verified")]
    Verified,
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Collected outside the gateway flow (cash on delivery).
    #[sea_orm(string_value = "deferred")]
    Deferred,
}

impl PaymentStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash on delivery; finalized synchronously with payment deferred
    #[sea_orm(string_value = "cash")]
    Cash,
    /// Wallet/UPI instant transfer through the gateway
    #[sea_orm(string_value = "upi")]
    Upi,
    /// Card payment through the gateway redirect flow
    #[sea_orm(string_value = "card")]
    Card,
}

impl PaymentMethod {
    /// Whether this method settles through the external gateway.
    pub fn uses_gateway(self) -> bool {
        !matches!(self, Self::Cash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_outrank_active_states() {
        assert!(OrderStatus::Created.rank() < OrderStatus::AwaitingPayment.rank());
        assert!(OrderStatus::AwaitingPayment.rank() < OrderStatus::Finalized.rank());
        assert!(OrderStatus::Finalized.is_terminal());
        assert!(OrderStatus::VerificationFailed.is_terminal());
        assert!(!OrderStatus::AwaitingPayment.is_terminal());
    }

    #[test]
    fn cash_skips_the_gateway() {
        assert!(!PaymentMethod::Cash.uses_gateway());
        assert!(PaymentMethod::Upi.uses_gateway());
        assert!(PaymentMethod::Card.uses_gateway());
    }
}
