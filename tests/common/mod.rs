#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use uuid::Uuid;

use marketplace_orderservice::{
    core::{
        app_error::AppError,
        app_state::{AppState, Collaborators},
        config::CheckoutConfig,
        outbox::OutboxMessage,
    },
    domain::{
        cart::CartView,
        order::{Order, OrderPlacementResult, StatusChange, StatusHistoryEntry},
        pricing::{Charge, PricingPolicy},
        readiness::{ReadinessCheck, ReadinessFailurePolicy},
    },
    services::{
        carts::{AddItem, Catalog, MenuItem},
        checkout::{CheckoutSession, HostedCheckout, PlaceOrder},
        readiness::ReadinessSource,
    },
    store::{
        CheckoutPlacement, NewPayment, NewPlacement, OrderRepository, Payment, PaymentStatus,
        PlacementOutcome, StatusUpdateOutcome, memory::MemoryStore,
    },
};

#[derive(Default)]
pub struct FakeCatalog {
    items: Mutex<HashMap<Uuid, MenuItem>>,
}

impl FakeCatalog {
    pub fn add(&self, restaurant_id: Uuid, name: &str, unit_price: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.items.lock().unwrap().insert(
            id,
            MenuItem {
                id,
                restaurant_id,
                name: name.to_string(),
                unit_price,
                available: true,
            },
        );
        id
    }

    pub fn set_price(&self, menu_item_id: Uuid, unit_price: i64) {
        if let Some(item) = self.items.lock().unwrap().get_mut(&menu_item_id) {
            item.unit_price = unit_price;
        }
    }

    pub fn set_available(&self, menu_item_id: Uuid, available: bool) {
        if let Some(item) = self.items.lock().unwrap().get_mut(&menu_item_id) {
            item.available = available;
        }
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn menu_item(&self, menu_item_id: Uuid) -> Result<Option<MenuItem>, AppError> {
        Ok(self.items.lock().unwrap().get(&menu_item_id).cloned())
    }
}

pub struct FakeReadiness {
    answer: Mutex<ReadinessCheck>,
    not_ready: Mutex<Vec<Uuid>>,
}

impl Default for FakeReadiness {
    fn default() -> Self {
        Self {
            answer: Mutex::new(ReadinessCheck::Ready),
            not_ready: Mutex::new(Vec::new()),
        }
    }
}

impl FakeReadiness {
    /// Answer used for every restaurant not marked not ready.
    pub fn answer(&self, check: ReadinessCheck) {
        *self.answer.lock().unwrap() = check;
    }

    pub fn mark_not_ready(&self, restaurant_id: Uuid) {
        self.not_ready.lock().unwrap().push(restaurant_id);
    }
}

#[async_trait]
impl ReadinessSource for FakeReadiness {
    async fn check(&self, restaurant_id: Uuid) -> ReadinessCheck {
        if self.not_ready.lock().unwrap().contains(&restaurant_id) {
            return ReadinessCheck::NotReady;
        }
        self.answer.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Succeed,
    Fail,
    Hang,
}

#[derive(Default)]
pub struct FakeHostedCheckout {
    mode: Mutex<SessionMode>,
    calls: AtomicUsize,
}

impl FakeHostedCheckout {
    pub fn set_mode(&self, mode: SessionMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostedCheckout for FakeHostedCheckout {
    fn provider(&self) -> &str {
        "FakePay"
    }

    async fn create_session(
        &self,
        order_id: Uuid,
        _amount: i64,
        _success_url: &str,
        _cancel_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            SessionMode::Succeed => Ok(CheckoutSession {
                session_id: format!("cs_{order_id}"),
                checkout_url: format!("https://pay.example.test/cs_{order_id}"),
            }),
            SessionMode::Fail => Err(AppError::UpstreamUnavailable("FakePay".into())),
            SessionMode::Hang => std::future::pending().await,
        }
    }
}

/// Delegates to a [`MemoryStore`] but fails the next `n` calls of selected
/// operations, the way a dropped database connection would.
pub struct FlakyOrders {
    inner: Arc<MemoryStore>,
    pub failing_status_updates: AtomicUsize,
    pub failing_settlements: AtomicUsize,
    pub failing_completions: AtomicUsize,
}

impl FlakyOrders {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_status_updates: AtomicUsize::new(0),
            failing_settlements: AtomicUsize::new(0),
            failing_completions: AtomicUsize::new(0),
        }
    }
}

fn trip(remaining: &AtomicUsize, operation: &str) -> Result<(), AppError> {
    if remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return Err(AppError::Other(anyhow::anyhow!("connection reset during {operation}")));
    }
    Ok(())
}

#[async_trait]
impl OrderRepository for FlakyOrders {
    async fn find_placement(
        &self,
        customer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<CheckoutPlacement>, AppError> {
        self.inner.find_placement(customer_id, idempotency_key).await
    }

    async fn insert_order(&self, placement: NewPlacement) -> Result<PlacementOutcome, AppError> {
        self.inner.insert_order(placement).await
    }

    async fn complete_placement(
        &self,
        order: &Order,
        idempotency_key: Option<&str>,
        result: &OrderPlacementResult,
        payment: Option<NewPayment>,
    ) -> Result<(), AppError> {
        trip(&self.failing_completions, "complete_placement")?;
        self.inner
            .complete_placement(order, idempotency_key, result, payment)
            .await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        self.inner.find_order(order_id).await
    }

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, AppError> {
        self.inner.list_for_customer(customer_id).await
    }

    async fn list_for_restaurant(&self, restaurant_id: Uuid) -> Result<Vec<Order>, AppError> {
        self.inner.list_for_restaurant(restaurant_id).await
    }

    async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AppError> {
        self.inner.history(order_id).await
    }

    async fn compare_and_set_status(
        &self,
        change: &StatusChange,
        event: OutboxMessage,
    ) -> Result<StatusUpdateOutcome, AppError> {
        trip(&self.failing_status_updates, "compare_and_set_status")?;
        self.inner.compare_and_set_status(change, event).await
    }

    async fn payment_for(&self, order_id: Uuid) -> Result<Option<Payment>, AppError> {
        self.inner.payment_for(order_id).await
    }

    async fn settle_payment(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Payment>, AppError> {
        trip(&self.failing_settlements, "settle_payment")?;
        self.inner
            .settle_payment(order_id, status, failure_reason)
            .await
    }
}

pub fn marketplace_pricing() -> PricingPolicy {
    PricingPolicy {
        tax: Charge::Flat { amount: 150 },
        delivery_fee: Charge::Flat { amount: 300 },
        ..PricingPolicy::default()
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<FakeCatalog>,
    pub readiness: Arc<FakeReadiness>,
    pub hosted: Arc<FakeHostedCheckout>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_policy(ReadinessFailurePolicy::FailOpen)
    }

    pub fn with_policy(readiness_failure_policy: ReadinessFailurePolicy) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(store.clone(), store, readiness_failure_policy)
    }

    /// An app whose order repository can be told to fail.
    pub fn with_flaky_orders() -> (Self, Arc<FlakyOrders>) {
        let store = Arc::new(MemoryStore::new());
        let orders = Arc::new(FlakyOrders::new(store.clone()));
        let app = Self::assemble(store, orders.clone(), ReadinessFailurePolicy::FailOpen);
        (app, orders)
    }

    fn assemble(
        store: Arc<MemoryStore>,
        orders: Arc<dyn OrderRepository>,
        readiness_failure_policy: ReadinessFailurePolicy,
    ) -> Self {
        let catalog = Arc::new(FakeCatalog::default());
        let readiness = Arc::new(FakeReadiness::default());
        let hosted = Arc::new(FakeHostedCheckout::default());

        let state = AppState::new(
            store.clone(),
            orders,
            Collaborators {
                catalog: catalog.clone(),
                readiness: readiness.clone(),
                hosted_checkout: hosted.clone(),
            },
            marketplace_pricing(),
            &CheckoutConfig {
                session_timeout: Duration::from_millis(100),
                readiness_timeout: Duration::from_millis(100),
                readiness_failure_policy,
            },
        );

        Self {
            store,
            catalog,
            readiness,
            hosted,
            state,
        }
    }

    /// A customer cart holding `quantity` of a fresh catalog item.
    pub async fn cart_with_item(
        &self,
        customer_id: Uuid,
        restaurant_id: Uuid,
        unit_price: i64,
        quantity: i32,
    ) -> Result<(CartView, Uuid), AppError> {
        let menu_item_id = self.catalog.add(restaurant_id, "Pad Thai", unit_price);
        let cart = self
            .state
            .carts
            .add_item(
                customer_id,
                None,
                AddItem::Catalog {
                    menu_item_id,
                    options: vec![],
                    quantity,
                },
            )
            .await?;
        Ok((cart, menu_item_id))
    }
}

pub fn place(cart_id: Uuid) -> PlaceOrder {
    PlaceOrder {
        cart_id,
        delivery_address: "12 Market Street".into(),
        ..PlaceOrder::default()
    }
}

pub fn hosted(cart_id: Uuid) -> PlaceOrder {
    PlaceOrder {
        success_redirect: Some("https://shop.example.test/paid".into()),
        cancel_redirect: Some("https://shop.example.test/cart".into()),
        ..place(cart_id)
    }
}
