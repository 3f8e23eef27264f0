use crate::{
    db::DbPool,
    entities::{
        order::{
            self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
            OrderStatus, PaymentMethod, PaymentStatus,
        },
        order_item::{
            self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
            Model as OrderItemModel,
        },
        product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::ShippingAddress,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Customer contact copied onto the order at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerSnapshot {
    pub id: Uuid,
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub name: String,
    #[validate(email(message = "Customer email must be valid"))]
    pub email: String,
    #[validate(length(min = 10, max = 10, message = "Customer phone must be 10 digits"))]
    pub phone: String,
}

/// One line of the order snapshot, resolved to a canonical product id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    /// Checkout attempt this order belongs to; enforced unique by the
    /// store so one attempt can never create two orders.
    pub attempt_id: Uuid,
    #[validate]
    pub customer: CustomerSnapshot,
    pub shipping_address: ShippingAddress,
    #[validate(length(min = 1, message = "Order must contain at least one line item"))]
    pub line_items: Vec<OrderLineInput>,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub checkout_attempt_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub gateway_order_id: Option<String>,
    pub total_amount: Decimal,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub line_items: Vec<OrderLineResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

/// Durable order store consumed by the reconciliation orchestrator.
///
/// `create_order` is atomic: availability is checked and decremented for
/// every line inside one transaction, so partial reservation is impossible.
/// There is deliberately no separate "check availability" call to trust
/// later; the check-then-act race is closed inside the store.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError>;

    /// Looks up the order a checkout attempt created, if any. This is the
    /// durable side of attempt idempotency: a resubmitted attempt resolves
    /// here instead of creating a second order.
    async fn get_order_by_attempt(
        &self,
        attempt_id: Uuid,
    ) -> Result<Option<OrderResponse>, ServiceError>;

    /// Records the gateway-side order id for callback correlation.
    /// Idempotent: recording the same id again is a no-op.
    async fn record_payment_intent(
        &self,
        order_id: Uuid,
        gateway_order_id: &str,
    ) -> Result<(), ServiceError>;

    /// Monotonic, idempotent status update: re-applying the current target
    /// is a no-op success, backward transitions are rejected.
    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<OrderResponse, ServiceError>;
}

/// Whether a requested transition applies, is a no-op, or is illegal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Apply,
    NoOp,
}

/// Forward-only transition check shared by the store implementation.
pub(crate) fn check_transition(
    current: (OrderStatus, PaymentStatus),
    target: (OrderStatus, PaymentStatus),
) -> Result<Transition, ServiceError> {
    let (cur_status, cur_payment) = current;
    let (new_status, new_payment) = target;

    if cur_status == new_status && cur_payment == new_payment {
        return Ok(Transition::NoOp);
    }

    if cur_status.is_terminal() {
        return Err(ServiceError::InvalidOperation(format!(
            "Order is already {:?} and cannot transition to {:?}",
            cur_status, new_status
        )));
    }

    if new_status.rank() < cur_status.rank() {
        return Err(ServiceError::InvalidOperation(format!(
            "Order status cannot move backward from {:?} to {:?}",
            cur_status, new_status
        )));
    }

    if cur_payment.is_settled() && cur_payment != new_payment {
        return Err(ServiceError::InvalidOperation(format!(
            "Payment status is settled as {:?} and cannot become {:?}",
            cur_payment, new_payment
        )));
    }

    Ok(Transition::Apply)
}

/// Order total as the sum of line totals; the one place it is computed.
pub fn compute_total(lines: &[OrderLineInput]) -> Decimal {
    lines
        .iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum()
}

/// Sea-ORM backed order store.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send(event).await;
        }
    }

    fn to_response(
        &self,
        model: OrderModel,
        items: Vec<OrderItemModel>,
    ) -> Result<OrderResponse, ServiceError> {
        let shipping_address: ShippingAddress = serde_json::from_str(&model.shipping_address)
            .map_err(|e| {
                ServiceError::InternalError(format!("Stored shipping address is corrupt: {}", e))
            })?;

        Ok(OrderResponse {
            id: model.id,
            order_number: model.order_number,
            checkout_attempt_id: model.checkout_attempt_id,
            customer_id: model.customer_id,
            customer_name: model.customer_name,
            customer_email: model.customer_email,
            customer_phone: model.customer_phone,
            status: model.status,
            payment_status: model.payment_status,
            payment_method: model.payment_method,
            gateway_order_id: model.gateway_order_id,
            total_amount: model.total_amount,
            currency: model.currency,
            shipping_address,
            line_items: items
                .into_iter()
                .map(|item| OrderLineResponse {
                    product_id: item.product_id,
                    name: item.name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    line_total: item.line_total,
                })
                .collect(),
            created_at: model.created_at,
            updated_at: model.updated_at,
            version: model.version,
        })
    }

    async fn load(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id).one(&*self.db).await?;
        match order {
            Some(model) => {
                let items = OrderItemEntity::find()
                    .filter(order_item::Column::OrderId.eq(order_id))
                    .all(&*self.db)
                    .await?;
                Ok(Some(self.to_response(model, items)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderStore for OrderService {
    #[instrument(skip(self, request), fields(customer_id = %request.customer.id))]
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        for line in &request.line_items {
            if line.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for '{}' must be at least 1",
                    line.name
                )));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Unit price for '{}' cannot be negative",
                    line.name
                )));
            }
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let total = compute_total(&request.line_items);

        let address_json = serde_json::to_string(&request.shipping_address)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        // Compare-and-decrement per line. A row only matches while enough
        // stock remains, so concurrent checkouts racing for the same
        // inventory cannot both succeed; zero rows affected means the item
        // is gone or short, and the whole transaction rolls back.
        for line in &request.line_items {
            let result = product::Entity::update_many()
                .col_expr(
                    product::Column::Available,
                    Expr::col(product::Column::Available).sub(line.quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(
                    product::Column::Id
                        .eq(line.product_id)
                        .and(product::Column::Available.gte(line.quantity)),
                )
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                warn!(
                    order_id = %order_id,
                    product_id = %line.product_id,
                    "Item unavailable during order creation"
                );
                return Err(ServiceError::ItemUnavailable(format!(
                    "'{}' is no longer available in the requested quantity",
                    line.name
                )));
            }
        }

        let order_active = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(format!(
                "ORD-{}",
                order_id.to_string()[..8].to_uppercase()
            )),
            checkout_attempt_id: Set(request.attempt_id),
            customer_id: Set(request.customer.id),
            customer_name: Set(request.customer.name.clone()),
            customer_email: Set(request.customer.email.clone()),
            customer_phone: Set(request.customer.phone.clone()),
            status: Set(OrderStatus::Created),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(request.payment_method),
            gateway_order_id: Set(None),
            total_amount: Set(total),
            currency: Set(request.currency.clone()),
            shipping_address: Set(address_json),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order_model = order_active.insert(&txn).await?;

        let mut item_models = Vec::with_capacity(request.line_items.len());
        for line in &request.line_items {
            let item = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                line_total: Set(line.unit_price * Decimal::from(line.quantity)),
                image_url: Set(line.image_url.clone()),
                created_at: Set(now),
            };
            item_models.push(item.insert(&txn).await?);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, total = %total, "Order created");
        self.publish(Event::OrderCreated(order_id)).await;

        self.to_response(order_model, item_models)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        self.load(order_id).await
    }

    #[instrument(skip(self), fields(attempt_id = %attempt_id))]
    async fn get_order_by_attempt(
        &self,
        attempt_id: Uuid,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::CheckoutAttemptId.eq(attempt_id))
            .one(&*self.db)
            .await?;
        match order {
            Some(model) => {
                let items = OrderItemEntity::find()
                    .filter(order_item::Column::OrderId.eq(model.id))
                    .all(&*self.db)
                    .await?;
                Ok(Some(self.to_response(model, items)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn record_payment_intent(
        &self,
        order_id: Uuid,
        gateway_order_id: &str,
    ) -> Result<(), ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        match &order.gateway_order_id {
            Some(existing) if existing == gateway_order_id => return Ok(()),
            Some(existing) => {
                return Err(ServiceError::InvalidOperation(format!(
                    "Order already has payment intent {}",
                    existing
                )));
            }
            None => {}
        }

        let mut active: OrderActiveModel = order.into();
        active.gateway_order_id = Set(Some(gateway_order_id.to_string()));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        info!(order_id = %order_id, gateway_order_id = %gateway_order_id, "Payment intent recorded");
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id, status = ?status, payment_status = ?payment_status))]
    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        match check_transition(
            (order.status, order.payment_status),
            (status, payment_status),
        )? {
            Transition::NoOp => {
                let items = OrderItemEntity::find()
                    .filter(order_item::Column::OrderId.eq(order_id))
                    .all(&txn)
                    .await?;
                txn.commit().await?;
                return self.to_response(order, items);
            }
            Transition::Apply => {}
        }

        // Optimistic write: the update only matches the version this
        // transition was checked against. A concurrent writer that got in
        // between bumps the version, the filter matches nothing, and this
        // stale transition is rejected instead of overwriting theirs.
        let observed_version = order.version;
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(status))
            .col_expr(order::Column::PaymentStatus, Expr::value(payment_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(order::Column::Version, Expr::value(observed_version + 1))
            .filter(
                order::Column::Id
                    .eq(order_id)
                    .and(order::Column::Version.eq(observed_version)),
            )
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            warn!(order_id = %order_id, version = observed_version, "Concurrent status update detected");
            return Err(ServiceError::InvalidOperation(
                "Order was updated concurrently; transition not applied".to_string(),
            ));
        }

        let updated = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        txn.commit().await?;

        info!(order_id = %order_id, status = ?status, payment_status = ?payment_status, "Order status updated");
        self.publish(Event::OrderStatusChanged {
            order_id,
            status,
            payment_status,
        })
        .await;

        self.to_response(updated, items)
    }
}
