//! End-to-end tests for the checkout reconciliation flow.
//!
//! The orchestrator is exercised against in-memory collaborators so the
//! full lifecycle runs without a database or a live gateway:
//! - Cash orders finalizing without any gateway involvement
//! - Stale-cart and inventory-drift self-healing paths
//! - Gateway outages and idempotent retry of the same attempt
//! - Callback verification, replay rejection, duplicate delivery
//! - Best-effort confirmation dispatch

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use storefront_api::{
    entities::order::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    events::EventSender,
    models::{Cart, CartItem, ShippingAddress},
    services::{
        checkout::{CheckoutOutcome, CheckoutRequest, CheckoutService},
        notifications::ConfirmationSender,
        orders::{
            CreateOrderRequest, CustomerSnapshot, OrderLineResponse, OrderResponse, OrderStore,
        },
        payments::{compute_signature, PaymentGateway, PaymentIntent, VerificationResult},
    },
};

const GATEWAY_SECRET: &str = "integration_test_gateway_secret";

// ==================== Mock collaborators ====================

#[derive(Default)]
struct MockOrderStore {
    orders: Mutex<Vec<OrderResponse>>,
    stock: Mutex<Vec<(Uuid, i32)>>,
    create_calls: AtomicUsize,
}

impl MockOrderStore {
    fn with_stock(stock: Vec<(Uuid, i32)>) -> Self {
        Self {
            stock: Mutex::new(stock),
            ..Default::default()
        }
    }

    fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn order(&self, order_id: Uuid) -> Option<OrderResponse> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
    }
}

#[async_trait]
impl OrderStore for MockOrderStore {
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut stock = self.stock.lock().unwrap();
        for line in &request.line_items {
            let available = stock
                .iter()
                .find(|(id, _)| *id == line.product_id)
                .map(|(_, qty)| *qty)
                .unwrap_or(0);
            if available < line.quantity {
                return Err(ServiceError::ItemUnavailable(format!(
                    "'{}' is no longer available in the requested quantity",
                    line.name
                )));
            }
        }
        for line in &request.line_items {
            if let Some(entry) = stock.iter_mut().find(|(id, _)| *id == line.product_id) {
                entry.1 -= line.quantity;
            }
        }
        drop(stock);

        let order_id = Uuid::new_v4();
        let total: Decimal = request
            .line_items
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();
        let order = OrderResponse {
            id: order_id,
            order_number: format!("ORD-{}", order_id.to_string()[..8].to_uppercase()),
            checkout_attempt_id: request.attempt_id,
            customer_id: request.customer.id,
            customer_name: request.customer.name,
            customer_email: request.customer.email,
            customer_phone: request.customer.phone,
            status: OrderStatus::Created,
            payment_status: PaymentStatus::Pending,
            payment_method: request.payment_method,
            gateway_order_id: None,
            total_amount: total,
            currency: request.currency,
            shipping_address: request.shipping_address,
            line_items: request
                .line_items
                .iter()
                .map(|l| OrderLineResponse {
                    product_id: l.product_id,
                    name: l.name.clone(),
                    unit_price: l.unit_price,
                    quantity: l.quantity,
                    line_total: l.unit_price * Decimal::from(l.quantity),
                })
                .collect(),
            created_at: chrono::Utc::now(),
            updated_at: None,
            version: 1,
        };
        self.orders.lock().unwrap().push(order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        Ok(self.order(order_id))
    }

    async fn get_order_by_attempt(
        &self,
        attempt_id: Uuid,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.checkout_attempt_id == attempt_id)
            .cloned())
    }

    async fn record_payment_intent(
        &self,
        order_id: Uuid,
        gateway_order_id: &str,
    ) -> Result<(), ServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        order.gateway_order_id = Some(gateway_order_id.to_string());
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status == status && order.payment_status == payment_status {
            return Ok(order.clone());
        }
        if order.status.is_terminal() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order is already {:?}",
                order.status
            )));
        }
        order.status = status;
        order.payment_status = payment_status;
        order.version += 1;
        Ok(order.clone())
    }
}

struct MockGateway {
    intent_calls: AtomicUsize,
    fail_next_intent: AtomicBool,
}

impl MockGateway {
    fn new() -> Self {
        Self {
            intent_calls: AtomicUsize::new(0),
            fail_next_intent: AtomicBool::new(false),
        }
    }

    fn failing_first() -> Self {
        let gateway = Self::new();
        gateway.fail_next_intent.store(true, Ordering::SeqCst);
        gateway
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let call = self.intent_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_intent.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(PaymentIntent {
            gateway_order_id: format!("order_MOCK{}", call),
            order_id,
            amount_minor,
            currency: currency.to_string(),
        })
    }

    async fn verify(
        &self,
        result: &VerificationResult,
        expected_gateway_order_id: &str,
    ) -> Result<(), ServiceError> {
        if result.gateway_order_id != expected_gateway_order_id {
            return Err(ServiceError::SignatureMismatch(
                "Callback references a different order".to_string(),
            ));
        }
        let expected = compute_signature(
            GATEWAY_SECRET,
            &result.gateway_order_id,
            &result.gateway_payment_id,
        );
        if expected != result.signature {
            return Err(ServiceError::SignatureMismatch(
                "Callback signature does not match".to_string(),
            ));
        }
        Ok(())
    }
}

struct MockConfirmationSender {
    sent: Mutex<Vec<Uuid>>,
    fail: bool,
}

impl MockConfirmationSender {
    fn new(fail: bool) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail,
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ConfirmationSender for MockConfirmationSender {
    async fn send_order_confirmation(&self, order: &OrderResponse) -> Result<(), ServiceError> {
        if self.fail {
            return Err(ServiceError::InternalError(
                "notification channel down".to_string(),
            ));
        }
        self.sent.lock().unwrap().push(order.id);
        Ok(())
    }
}

// ==================== Test harness ====================

struct Harness {
    service: CheckoutService,
    store: Arc<MockOrderStore>,
    gateway: Arc<MockGateway>,
    confirmations: Arc<MockConfirmationSender>,
}

fn harness_with(store: MockOrderStore, gateway: MockGateway, fail_notify: bool) -> Harness {
    let store = Arc::new(store);
    let gateway = Arc::new(gateway);
    let confirmations = Arc::new(MockConfirmationSender::new(fail_notify));
    let (events, mut rx) = EventSender::channel(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let service = CheckoutService::new(
        store.clone(),
        gateway.clone(),
        confirmations.clone(),
        events,
        "INR".to_string(),
    );
    Harness {
        service,
        store,
        gateway,
        confirmations,
    }
}

fn address() -> ShippingAddress {
    ShippingAddress {
        recipient: "Asha Rao".into(),
        phone: "9876543210".into(),
        street: "12 MG Road".into(),
        city: "Bengaluru".into(),
        district: "Bengaluru Urban".into(),
        state: "Karnataka".into(),
        postal_code: "560001".into(),
        country: "IN".into(),
    }
}

fn customer() -> CustomerSnapshot {
    CustomerSnapshot {
        id: Uuid::new_v4(),
        name: "Asha Rao".into(),
        email: "asha@example.com".into(),
        phone: "9876543210".into(),
    }
}

fn cart_item(product_id: &str, price: Decimal, qty: i32) -> CartItem {
    CartItem {
        product_id: product_id.to_string(),
        name: "Ceramic Mug".into(),
        unit_price: price,
        quantity: qty,
        image_url: None,
    }
}

fn request(cart: Cart, method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        customer: customer(),
        cart,
        shipping_address: address(),
        payment_method: method,
    }
}

fn signed_callback(gateway_order_id: &str, payment_id: &str) -> VerificationResult {
    VerificationResult {
        gateway_order_id: gateway_order_id.to_string(),
        gateway_payment_id: payment_id.to_string(),
        signature: compute_signature(GATEWAY_SECRET, gateway_order_id, payment_id),
    }
}

/// Lets spawned fire-and-forget tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ==================== Order placement ====================

#[tokio::test]
async fn cash_order_finalizes_without_gateway() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 10)]),
        MockGateway::new(),
        false,
    );

    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(499), 2)],
    };
    let outcome = h
        .service
        .place_order(Uuid::new_v4(), request(cart, PaymentMethod::Cash))
        .await
        .unwrap();

    let order = match outcome {
        CheckoutOutcome::Success { order } => order,
        other => panic!("expected success, got {:?}", other.code()),
    };
    assert_eq!(order.total_amount, dec!(998));
    assert_eq!(order.status, OrderStatus::Finalized);
    assert_eq!(order.payment_status, PaymentStatus::Deferred);
    assert_eq!(h.gateway.intent_calls.load(Ordering::SeqCst), 0);

    settle().await;
    assert_eq!(h.confirmations.sent_count(), 1);
}

#[tokio::test]
async fn empty_cart_is_rejected_up_front() {
    let h = harness_with(MockOrderStore::default(), MockGateway::new(), false);

    let outcome = h
        .service
        .place_order(
            Uuid::new_v4(),
            request(Cart { items: vec![] }, PaymentMethod::Cash),
        )
        .await
        .unwrap();

    assert_eq!(outcome.code(), "invalid");
    assert!(outcome.retry_safe());
    assert_eq!(h.store.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_cart_id_short_circuits_before_order_creation() {
    let h = harness_with(MockOrderStore::default(), MockGateway::new(), false);

    let cart = Cart {
        items: vec![cart_item("-NxLegacyKey42", dec!(499), 1)],
    };
    let outcome = h
        .service
        .place_order(Uuid::new_v4(), request(cart, PaymentMethod::Cash))
        .await
        .unwrap();

    assert_eq!(outcome.code(), "needs-cart-cleanup");
    assert_eq!(h.store.create_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.order_count(), 0);
}

#[tokio::test]
async fn one_stale_item_blocks_the_whole_cart() {
    let good_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(good_id, 10)]),
        MockGateway::new(),
        false,
    );

    let cart = Cart {
        items: vec![
            cart_item(&good_id.to_string(), dec!(250), 1),
            cart_item("not-a-uuid", dec!(100), 1),
        ],
    };
    let outcome = h
        .service
        .place_order(Uuid::new_v4(), request(cart, PaymentMethod::Upi))
        .await
        .unwrap();

    // All-or-nothing: the resolvable item is not ordered either.
    assert_eq!(outcome.code(), "needs-cart-cleanup");
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.gateway.intent_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unavailable_item_routes_to_cleanup_without_gateway_call() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 1)]),
        MockGateway::new(),
        false,
    );

    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(250), 3)],
    };
    let outcome = h
        .service
        .place_order(Uuid::new_v4(), request(cart, PaymentMethod::Upi))
        .await
        .unwrap();

    assert_eq!(outcome.code(), "needs-cart-cleanup");
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.gateway.intent_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_postal_code_never_reaches_the_store() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );

    let mut req = request(
        Cart {
            items: vec![cart_item(&product_id.to_string(), dec!(100), 1)],
        },
        PaymentMethod::Cash,
    );
    req.shipping_address.postal_code = "5600".into();

    let outcome = h.service.place_order(Uuid::new_v4(), req).await.unwrap();
    assert_eq!(outcome.code(), "invalid");
    assert!(outcome.retry_safe());
    assert_eq!(h.store.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gateway_order_reaches_awaiting_payment_with_intent() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );

    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(499), 2)],
    };
    let outcome = h
        .service
        .place_order(Uuid::new_v4(), request(cart, PaymentMethod::Upi))
        .await
        .unwrap();

    let (order_id, intent) = match outcome {
        CheckoutOutcome::AwaitingPayment { order_id, intent } => (order_id, intent),
        other => panic!("expected awaiting-payment, got {:?}", other.code()),
    };
    assert_eq!(intent.amount_minor, 99800);
    assert_eq!(intent.currency, "INR");

    let stored = h.store.order(order_id).unwrap();
    assert_eq!(stored.status, OrderStatus::AwaitingPayment);
    assert_eq!(
        stored.gateway_order_id.as_deref(),
        Some(intent.gateway_order_id.as_str())
    );
}

// ==================== Retry idempotency ====================

#[tokio::test]
async fn gateway_outage_retry_reuses_the_same_order() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::failing_first(),
        false,
    );

    let attempt_id = Uuid::new_v4();
    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(300), 1)],
    };

    let outcome = h
        .service
        .place_order(attempt_id, request(cart.clone(), PaymentMethod::Card))
        .await
        .unwrap();
    assert_eq!(outcome.code(), "retryable-error");
    assert!(outcome.retry_safe());
    assert_eq!(h.store.order_count(), 1);
    let first_order_id = h.store.orders.lock().unwrap()[0].id;

    // Same attempt id: the order is resumed, not recreated.
    let outcome = h
        .service
        .place_order(attempt_id, request(cart, PaymentMethod::Card))
        .await
        .unwrap();
    match outcome {
        CheckoutOutcome::AwaitingPayment { order_id, .. } => {
            assert_eq!(order_id, first_order_id);
        }
        other => panic!("expected awaiting-payment, got {:?}", other.code()),
    }
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.store.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resubmitted_attempt_returns_the_recorded_intent() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );

    let attempt_id = Uuid::new_v4();
    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(499), 2)],
    };

    let first = h
        .service
        .place_order(attempt_id, request(cart.clone(), PaymentMethod::Upi))
        .await
        .unwrap();
    let first_intent = match first {
        CheckoutOutcome::AwaitingPayment { intent, .. } => intent,
        other => panic!("expected awaiting-payment, got {:?}", other.code()),
    };

    // Lost response or double-click: the same attempt comes back in. The
    // customer may already be paying against the first intent, so the
    // resubmit must hand back that intent, not mint a second one.
    let second = h
        .service
        .place_order(attempt_id, request(cart, PaymentMethod::Upi))
        .await
        .unwrap();
    match second {
        CheckoutOutcome::AwaitingPayment { intent, .. } => {
            assert_eq!(intent.gateway_order_id, first_intent.gateway_order_id);
            assert_eq!(intent.amount_minor, first_intent.amount_minor);
        }
        other => panic!("expected awaiting-payment, got {:?}", other.code()),
    }
    assert_eq!(h.gateway.intent_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.order_count(), 1);
}

#[tokio::test]
async fn attempt_resumes_across_service_restart() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::failing_first(),
        false,
    );

    let attempt_id = Uuid::new_v4();
    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(300), 1)],
    };

    let outcome = h
        .service
        .place_order(attempt_id, request(cart.clone(), PaymentMethod::Card))
        .await
        .unwrap();
    assert_eq!(outcome.code(), "retryable-error");
    let first_order_id = h.store.orders.lock().unwrap()[0].id;

    // Fresh service over the same store, as after a process restart. The
    // attempt mapping lives on the order row, so the retry still resumes.
    let (events, mut rx) = EventSender::channel(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let restarted = CheckoutService::new(
        h.store.clone(),
        h.gateway.clone(),
        h.confirmations.clone(),
        events,
        "INR".to_string(),
    );

    let outcome = restarted
        .place_order(attempt_id, request(cart, PaymentMethod::Card))
        .await
        .unwrap();
    match outcome {
        CheckoutOutcome::AwaitingPayment { order_id, .. } => {
            assert_eq!(order_id, first_order_id);
        }
        other => panic!("expected awaiting-payment, got {:?}", other.code()),
    }
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.store.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resubmitted_cash_attempt_does_not_resend_confirmation() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );

    let attempt_id = Uuid::new_v4();
    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(150), 1)],
    };

    let first = h
        .service
        .place_order(attempt_id, request(cart.clone(), PaymentMethod::Cash))
        .await
        .unwrap();
    assert_eq!(first.code(), "success");
    settle().await;
    assert_eq!(h.confirmations.sent_count(), 1);

    let second = h
        .service
        .place_order(attempt_id, request(cart, PaymentMethod::Cash))
        .await
        .unwrap();
    assert_eq!(second.code(), "success");
    settle().await;
    assert_eq!(h.confirmations.sent_count(), 1);
    assert_eq!(h.store.order_count(), 1);
}

// ==================== Verification ====================

async fn place_upi_order(h: &Harness, product_id: Uuid) -> (Uuid, String) {
    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(499), 1)],
    };
    let outcome = h
        .service
        .place_order(Uuid::new_v4(), request(cart, PaymentMethod::Upi))
        .await
        .unwrap();
    match outcome {
        CheckoutOutcome::AwaitingPayment { order_id, intent } => {
            (order_id, intent.gateway_order_id)
        }
        other => panic!("expected awaiting-payment, got {:?}", other.code()),
    }
}

#[tokio::test]
async fn valid_callback_finalizes_the_order() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );
    let (order_id, gateway_order_id) = place_upi_order(&h, product_id).await;

    let outcome = h
        .service
        .confirm_payment(order_id, signed_callback(&gateway_order_id, "pay_1"))
        .await
        .unwrap();

    assert_eq!(outcome.code(), "success");
    let order = h.store.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Finalized);
    assert_eq!(order.payment_status, PaymentStatus::Verified);

    settle().await;
    assert_eq!(h.confirmations.sent_count(), 1);
}

#[tokio::test]
async fn tampered_signature_never_finalizes() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );
    let (order_id, gateway_order_id) = place_upi_order(&h, product_id).await;

    let mut callback = signed_callback(&gateway_order_id, "pay_1");
    callback.signature = compute_signature(GATEWAY_SECRET, &gateway_order_id, "pay_FORGED");

    let outcome = h.service.confirm_payment(order_id, callback).await.unwrap();
    assert_eq!(outcome.code(), "verification-pending-support");
    assert!(!outcome.retry_safe());

    let order = h.store.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::VerificationFailed);
    assert_eq!(order.payment_status, PaymentStatus::Failed);

    settle().await;
    assert_eq!(h.confirmations.sent_count(), 0);
}

#[tokio::test]
async fn callback_for_another_order_is_rejected_despite_valid_signature() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );
    let (order_id, _) = place_upi_order(&h, product_id).await;

    // Genuine signature, but for a different gateway order.
    let outcome = h
        .service
        .confirm_payment(order_id, signed_callback("order_SOMEONE_ELSE", "pay_1"))
        .await
        .unwrap();

    assert_eq!(outcome.code(), "verification-pending-support");
    let order = h.store.order(order_id).unwrap();
    assert_ne!(order.status, OrderStatus::Finalized);
}

#[tokio::test]
async fn duplicate_callback_is_a_noop_success() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );
    let (order_id, gateway_order_id) = place_upi_order(&h, product_id).await;

    let callback = signed_callback(&gateway_order_id, "pay_1");
    let first = h
        .service
        .confirm_payment(order_id, callback.clone())
        .await
        .unwrap();
    let second = h.service.confirm_payment(order_id, callback).await.unwrap();

    assert_eq!(first.code(), "success");
    assert_eq!(second.code(), "success");
    let order = h.store.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Finalized);

    settle().await;
    // Confirmation is dispatched once; the duplicate is a pure no-op.
    assert_eq!(h.confirmations.sent_count(), 1);
}

#[tokio::test]
async fn failed_verification_stays_failed_on_repeat_callback() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );
    let (order_id, gateway_order_id) = place_upi_order(&h, product_id).await;

    let mut forged = signed_callback(&gateway_order_id, "pay_1");
    forged.signature = "0".repeat(64);
    let first = h.service.confirm_payment(order_id, forged).await.unwrap();
    assert_eq!(first.code(), "verification-pending-support");

    // Even a genuine callback cannot resurrect the order afterwards.
    let second = h
        .service
        .confirm_payment(order_id, signed_callback(&gateway_order_id, "pay_1"))
        .await
        .unwrap();
    assert_eq!(second.code(), "verification-pending-support");
    assert_eq!(
        h.store.order(order_id).unwrap().status,
        OrderStatus::VerificationFailed
    );
}

#[tokio::test]
async fn declined_payment_marks_the_order_failed() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );
    let (order_id, _) = place_upi_order(&h, product_id).await;

    let outcome = h
        .service
        .record_payment_failure(order_id, Some("card declined".into()))
        .await
        .unwrap();

    assert_eq!(outcome.code(), "payment-declined");
    assert!(outcome.retry_safe());
    let order = h.store.order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn failure_report_after_finalization_is_ignored() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        false,
    );
    let (order_id, gateway_order_id) = place_upi_order(&h, product_id).await;

    h.service
        .confirm_payment(order_id, signed_callback(&gateway_order_id, "pay_1"))
        .await
        .unwrap();

    // A late failure report loses to the completed verification.
    let outcome = h
        .service
        .record_payment_failure(order_id, None)
        .await
        .unwrap();
    assert_eq!(outcome.code(), "success");
    assert_eq!(
        h.store.order(order_id).unwrap().status,
        OrderStatus::Finalized
    );
}

// ==================== Notification side channel ====================

#[tokio::test]
async fn notification_failure_does_not_block_success() {
    let product_id = Uuid::new_v4();
    let h = harness_with(
        MockOrderStore::with_stock(vec![(product_id, 5)]),
        MockGateway::new(),
        true, // confirmation sender always fails
    );

    let cart = Cart {
        items: vec![cart_item(&product_id.to_string(), dec!(120), 1)],
    };
    let outcome = h
        .service
        .place_order(Uuid::new_v4(), request(cart, PaymentMethod::Cash))
        .await
        .unwrap();

    assert_eq!(outcome.code(), "success");
    settle().await;
    let order = &h.store.orders.lock().unwrap()[0];
    assert_eq!(order.status, OrderStatus::Finalized);
}
