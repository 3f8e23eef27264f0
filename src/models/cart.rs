use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cart entry as submitted by the client. The product id is a string
/// on purpose: carts carried across a catalog migration can reference ids
/// in a format the current catalog no longer resolves, and those must be
/// detected rather than fail deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CartItem {
    /// Product id parsed against the catalog's canonical id scheme.
    pub fn canonical_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.product_id).ok()
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Transient cart passed explicitly into checkout. Owned by the client
/// session; never persisted, only consumed to build an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Entries whose product id does not match the canonical id format.
    ///
    /// This is a guard, not a filter: if any entry is stale the whole
    /// checkout attempt must short-circuit to the cleanup path, because a
    /// cart with unresolvable references would either fail non-atomically
    /// mid-pipeline or persist corrupt snapshots.
    pub fn stale_items(&self) -> Vec<&CartItem> {
        self.items
            .iter()
            .filter(|item| item.canonical_id().is_none())
            .collect()
    }

    pub fn has_stale_items(&self) -> bool {
        !self.stale_items().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(id: &str, price: Decimal, qty: i32) -> CartItem {
        CartItem {
            product_id: id.to_string(),
            name: "Widget".into(),
            unit_price: price,
            quantity: qty,
            image_url: None,
        }
    }

    #[test]
    fn subtotal_sums_line_totals() {
        let cart = Cart {
            items: vec![
                item(&Uuid::new_v4().to_string(), dec!(499), 2),
                item(&Uuid::new_v4().to_string(), dec!(150), 1),
            ],
        };
        assert_eq!(cart.subtotal(), dec!(1148));
    }

    #[test]
    fn well_formed_ids_are_not_flagged() {
        let cart = Cart {
            items: vec![item(&Uuid::new_v4().to_string(), dec!(10), 1)],
        };
        assert!(!cart.has_stale_items());
    }

    #[test]
    fn legacy_ids_are_flagged_as_stale() {
        let cart = Cart {
            items: vec![
                item(&Uuid::new_v4().to_string(), dec!(10), 1),
                item("-NxLegacyFirebaseKey42", dec!(20), 1),
            ],
        };
        let stale = cart.stale_items();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].product_id, "-NxLegacyFirebaseKey42");
    }

    #[test]
    fn empty_string_id_is_stale() {
        let cart = Cart {
            items: vec![item("", dec!(10), 1)],
        };
        assert!(cart.has_stale_items());
    }
}
