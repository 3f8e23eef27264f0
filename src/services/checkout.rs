use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{Cart, ShippingAddress},
    services::{
        notifications::ConfirmationSender,
        orders::{CreateOrderRequest, CustomerSnapshot, OrderLineInput, OrderResponse, OrderStore},
        payments::{to_minor_units, PaymentGateway, PaymentIntent, VerificationResult},
    },
};

/// One checkout submission from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub customer: CustomerSnapshot,
    pub cart: Cart,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

/// Outcome of a checkout or verification step, the contract with the UI
/// adapter. Every terminal failure states whether a retry is safe, since
/// conflating retryable and non-retryable failures risks duplicate payment
/// capture.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum CheckoutOutcome {
    /// Order is finalized; confirmation dispatched best-effort.
    Success { order: Box<OrderResponse> },
    /// Order created and gateway intent ready for the client payment UI.
    AwaitingPayment {
        order_id: Uuid,
        intent: PaymentIntent,
    },
    /// Stale cart entries or inventory drift. The caller should purge the
    /// cart and return to the catalog; nothing was charged.
    NeedsCartCleanup { message: String },
    /// Locally-fixable input problem; nothing was sent to the store.
    Invalid { message: String },
    /// The gateway reported the payment as failed.
    PaymentDeclined { message: String },
    /// Payment may have been captured but could not be verified. Not safe
    /// to retry; requires support-assisted reconciliation.
    VerificationPendingSupport { message: String },
    /// Transient infrastructure failure. Retrying re-uses the same order.
    RetryableError { message: String },
}

impl CheckoutOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::AwaitingPayment { .. } => "awaiting-payment",
            Self::NeedsCartCleanup { .. } => "needs-cart-cleanup",
            Self::Invalid { .. } => "invalid",
            Self::PaymentDeclined { .. } => "payment-declined",
            Self::VerificationPendingSupport { .. } => "verification-pending-support",
            Self::RetryableError { .. } => "retryable-error",
        }
    }

    /// Whether the client may resubmit without risking a duplicate order or
    /// duplicate capture.
    pub fn retry_safe(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. } | Self::RetryableError { .. } | Self::PaymentDeclined { .. }
        )
    }
}

/// Drives an order from cart submission to a terminal state, coordinating
/// the order store, the payment gateway and the confirmation side channel.
///
/// All collaborators are injected; the orchestrator holds no presentation
/// concerns and returns outcomes for an adapter layer to render.
pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    confirmations: Arc<dyn ConfirmationSender>,
    events: EventSender,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        confirmations: Arc<dyn ConfirmationSender>,
        events: EventSender,
        currency: String,
    ) -> Self {
        Self {
            store,
            gateway,
            confirmations,
            events,
            currency,
        }
    }

    /// Creates (or resumes) the order for a checkout attempt and moves it
    /// as far along the lifecycle as the payment method allows.
    #[instrument(skip(self, request), fields(attempt_id = %attempt_id, method = ?request.payment_method))]
    pub async fn place_order(
        &self,
        attempt_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if request.cart.is_empty() {
            return Ok(CheckoutOutcome::Invalid {
                message: "Cart is empty".to_string(),
            });
        }

        // Stale-cart guard comes before everything else: a cart referencing
        // ids the catalog no longer resolves must never reach order
        // creation.
        if request.cart.has_stale_items() {
            let count = request.cart.stale_items().len();
            self.events
                .send(Event::CheckoutRejected {
                    reason: format!("{} stale cart item(s)", count),
                })
                .await;
            return Ok(CheckoutOutcome::NeedsCartCleanup {
                message: "Your cart contains items from an older version of the catalog. \
                          Please clear it and shop again."
                    .to_string(),
            });
        }

        let address = match request.shipping_address.validate() {
            Ok(address) => address,
            Err(ServiceError::ValidationError(message)) => {
                return Ok(CheckoutOutcome::Invalid { message });
            }
            Err(e) => return Err(e),
        };

        let order = match self.resolve_order(attempt_id, &request, address).await? {
            Ok(order) => order,
            Err(outcome) => return Ok(outcome),
        };

        // A resubmit of an attempt whose order already finalized is a plain
        // duplicate; nothing to redo, and in particular no second
        // confirmation dispatch.
        if order.status == OrderStatus::Finalized {
            info!(order_id = %order.id, "Resubmitted attempt resolved to a finalized order");
            return Ok(CheckoutOutcome::Success {
                order: Box::new(order),
            });
        }

        // A resumed attempt that already holds a payment intent returns the
        // recorded one; creating a second would orphan the intent the
        // customer may already be paying against.
        if let Some(gateway_order_id) = order.gateway_order_id.clone() {
            info!(order_id = %order.id, "Resuming attempt with its recorded payment intent");
            let intent = PaymentIntent {
                gateway_order_id,
                order_id: order.id,
                amount_minor: to_minor_units(order.total_amount)?,
                currency: order.currency.clone(),
            };
            return Ok(CheckoutOutcome::AwaitingPayment {
                order_id: order.id,
                intent,
            });
        }

        if !request.payment_method.uses_gateway() {
            // Cash on delivery settles outside the gateway; the order is
            // finalized synchronously with payment deferred.
            let order = self
                .store
                .update_status(order.id, OrderStatus::Finalized, PaymentStatus::Deferred)
                .await?;
            self.finish(&order).await;
            return Ok(CheckoutOutcome::Success {
                order: Box::new(order),
            });
        }

        let order = self
            .store
            .update_status(order.id, OrderStatus::AwaitingPayment, PaymentStatus::Pending)
            .await?;

        let amount_minor = to_minor_units(order.total_amount)?;
        match self
            .gateway
            .create_intent(order.id, amount_minor, &self.currency)
            .await
        {
            Ok(intent) => {
                self.store
                    .record_payment_intent(order.id, &intent.gateway_order_id)
                    .await?;
                Ok(CheckoutOutcome::AwaitingPayment {
                    order_id: order.id,
                    intent,
                })
            }
            Err(ServiceError::GatewayUnavailable(message)) => {
                // The order stays AwaitingPayment; a retry resumes this
                // attempt and re-uses the same order id.
                warn!(order_id = %order.id, "Intent creation failed: {}", message);
                Ok(CheckoutOutcome::RetryableError {
                    message: format!("Payment could not be started: {}. Please try again.", message),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Handles the gateway's completed-payment callback.
    #[instrument(skip(self, result), fields(order_id = %order_id))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        result: VerificationResult,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        // Duplicate callback delivery: verifying an already-finalized order
        // is a no-op success.
        match order.status {
            OrderStatus::Finalized => {
                info!(order_id = %order_id, "Duplicate verification callback ignored");
                return Ok(CheckoutOutcome::Success {
                    order: Box::new(order),
                });
            }
            OrderStatus::VerificationFailed => {
                return Ok(self.support_outcome());
            }
            OrderStatus::PaymentFailed | OrderStatus::Cancelled => {
                return Ok(CheckoutOutcome::PaymentDeclined {
                    message: "This order's payment has already failed".to_string(),
                });
            }
            _ => {}
        }

        let expected_gateway_order_id = order.gateway_order_id.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("Order has no payment intent to verify".to_string())
        })?;

        let order = self
            .store
            .update_status(order.id, OrderStatus::Verifying, PaymentStatus::Pending)
            .await?;

        match self.gateway.verify(&result, &expected_gateway_order_id).await {
            Ok(()) => {
                let order = self
                    .store
                    .update_status(order.id, OrderStatus::Finalized, PaymentStatus::Verified)
                    .await?;
                self.finish(&order).await;
                Ok(CheckoutOutcome::Success {
                    order: Box::new(order),
                })
            }
            // A timeout while verifying is treated exactly like a mismatch:
            // funds may have been captured, so only support can resolve it.
            Err(ServiceError::SignatureMismatch(message))
            | Err(ServiceError::GatewayUnavailable(message)) => {
                warn!(order_id = %order.id, "Payment verification failed: {}", message);
                self.store
                    .update_status(
                        order.id,
                        OrderStatus::VerificationFailed,
                        PaymentStatus::Failed,
                    )
                    .await?;
                self.events
                    .send(Event::PaymentVerificationFailed(order.id))
                    .await;
                Ok(self.support_outcome())
            }
            Err(e) => Err(e),
        }
    }

    /// Records a gateway-reported payment failure (declined or abandoned).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn record_payment_failure(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status == OrderStatus::Finalized {
            // A failure report racing a successful verification loses.
            return Ok(CheckoutOutcome::Success {
                order: Box::new(order),
            });
        }

        self.store
            .update_status(order.id, OrderStatus::PaymentFailed, PaymentStatus::Failed)
            .await?;

        Ok(CheckoutOutcome::PaymentDeclined {
            message: reason.unwrap_or_else(|| "Payment was declined".to_string()),
        })
    }

    /// Creates the order for this attempt at most once. The attempt id is
    /// stored on the order row under a unique constraint, so a resubmitted
    /// attempt resolves to the already-created order even after a restart.
    async fn resolve_order(
        &self,
        attempt_id: Uuid,
        request: &CheckoutRequest,
        address: ShippingAddress,
    ) -> Result<Result<OrderResponse, CheckoutOutcome>, ServiceError> {
        if let Some(order) = self.store.get_order_by_attempt(attempt_id).await? {
            info!(attempt_id = %attempt_id, order_id = %order.id, "Resuming checkout attempt");
            return Ok(Ok(order));
        }

        let mut line_items = Vec::with_capacity(request.cart.items.len());
        for item in &request.cart.items {
            let product_id = item.canonical_id().ok_or_else(|| {
                // stale_items() ran first; reaching this means a guard bug
                ServiceError::InternalError(format!(
                    "Unsanitized cart item '{}' reached order creation",
                    item.product_id
                ))
            })?;
            line_items.push(OrderLineInput {
                product_id,
                name: item.name.clone(),
                unit_price: item.unit_price,
                quantity: item.quantity,
                image_url: item.image_url.clone(),
            });
        }

        let create = CreateOrderRequest {
            attempt_id,
            customer: request.customer.clone(),
            shipping_address: address,
            line_items,
            payment_method: request.payment_method,
            currency: self.currency.clone(),
        };

        match self.store.create_order(create).await {
            Ok(order) => Ok(Ok(order)),
            // Inventory drift between browse time and checkout time is an
            // expected, recoverable condition: purge and redirect, never a
            // hard failure. The gateway is not contacted.
            Err(ServiceError::ItemUnavailable(message)) => {
                self.events
                    .send(Event::CheckoutRejected {
                        reason: message.clone(),
                    })
                    .await;
                Ok(Err(CheckoutOutcome::NeedsCartCleanup {
                    message: format!(
                        "{}. Please clear your cart and shop again.",
                        message.trim_end_matches('.')
                    ),
                }))
            }
            Err(ServiceError::ValidationError(message)) => {
                Ok(Err(CheckoutOutcome::Invalid { message }))
            }
            Err(e) => Err(e),
        }
    }

    /// Terminal success path: publish events and dispatch the confirmation
    /// without blocking the caller.
    async fn finish(&self, order: &OrderResponse) {
        self.events.send(Event::OrderFinalized(order.id)).await;

        let sender = self.confirmations.clone();
        let order = order.clone();
        tokio::spawn(async move {
            if let Err(e) = sender.send_order_confirmation(&order).await {
                warn!(order_id = %order.id, "Order confirmation failed: {}", e);
            }
        });
    }

    fn support_outcome(&self) -> CheckoutOutcome {
        CheckoutOutcome::VerificationPendingSupport {
            message: "Your payment was received by the gateway but could not be verified. \
                      Do not retry the payment; please contact support with your order number."
                .to_string(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}
