//! In-process backend used for local runs and tests.
//!
//! Each cart and each order sits behind its own mutex; the id indexes are only
//! held long enough to find that mutex, so operations on different carts or
//! orders never wait on each other.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::core::{app_error::AppError, outbox::OutboxMessage};
use crate::domain::{
    cart::Cart,
    order::{Order, OrderPlacementResult, OrderStatus, StatusChange, StatusHistoryEntry},
};
use crate::store::{
    CartMutation, CartRepository, CheckoutPlacement, NewPayment, NewPlacement, OrderRepository,
    Payment, PaymentStatus, PlacementOutcome, PlacementState, StatusUpdateOutcome,
};

type CartSlot = Arc<Mutex<Option<Cart>>>;

#[derive(Default)]
struct CartIndex {
    by_id: HashMap<Uuid, CartSlot>,
    by_customer: HashMap<Uuid, Uuid>,
}

struct OrderRecord {
    order: Order,
    history: Vec<StatusHistoryEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    carts: RwLock<CartIndex>,
    orders: RwLock<HashMap<Uuid, Arc<Mutex<OrderRecord>>>>,
    placements: Mutex<HashMap<(Uuid, String), CheckoutPlacement>>,
    payments: Mutex<Vec<Payment>>,
    outbox: Mutex<Vec<OutboxMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages written to the outbox so far, oldest first.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.outbox.lock().await.clone()
    }

    /// Removes and returns every message written to the outbox so far.
    pub async fn drain_outbox(&self) -> Vec<OutboxMessage> {
        std::mem::take(&mut *self.outbox.lock().await)
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn payments_for(&self, order_id: Uuid) -> Vec<Payment> {
        self.payments
            .lock()
            .await
            .iter()
            .filter(|payment| payment.order_id == order_id)
            .cloned()
            .collect()
    }

    async fn cart_slot(&self, cart_id: Uuid) -> Option<CartSlot> {
        self.carts.read().await.by_id.get(&cart_id).cloned()
    }

    async fn order_record(&self, order_id: Uuid) -> Option<Arc<Mutex<OrderRecord>>> {
        self.orders.read().await.get(&order_id).cloned()
    }

    async fn forget_cart(&self, cart_id: Uuid) {
        let mut carts = self.carts.write().await;
        if carts.by_id.remove(&cart_id).is_some() {
            carts.by_customer.retain(|_, id| *id != cart_id);
        }
    }

    async fn orders_matching<F>(&self, predicate: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool,
    {
        let records: Vec<_> = self.orders.read().await.values().cloned().collect();
        let mut orders = Vec::new();
        for record in records {
            let record = record.lock().await;
            if predicate(&record.order) {
                orders.push(record.order.clone());
            }
        }
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        orders
    }
}

/// Applies `mutation` to a copy so a failed mutation leaves the cart untouched.
fn apply(cart: &mut Cart, mutation: CartMutation) -> Result<Cart, AppError> {
    let mut next = cart.clone();
    mutation(&mut next)?;
    *cart = next;
    Ok(cart.clone())
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn find(&self, cart_id: Uuid) -> Result<Option<Cart>, AppError> {
        match self.cart_slot(cart_id).await {
            Some(slot) => Ok(slot.lock().await.clone()),
            None => Ok(None),
        }
    }

    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Option<Cart>, AppError> {
        let cart_id = self.carts.read().await.by_customer.get(&customer_id).copied();
        match cart_id {
            Some(cart_id) => self.find(cart_id).await,
            None => Ok(None),
        }
    }

    async fn upsert_for_customer(
        &self,
        customer_id: Uuid,
        mutation: CartMutation,
    ) -> Result<Cart, AppError> {
        loop {
            let slot = {
                let mut carts = self.carts.write().await;
                let existing = carts
                    .by_customer
                    .get(&customer_id)
                    .and_then(|id| carts.by_id.get(id))
                    .cloned();
                match existing {
                    Some(slot) => slot,
                    None => {
                        let cart = Cart::new(customer_id, None);
                        let slot = Arc::new(Mutex::new(Some(cart.clone())));
                        carts.by_customer.insert(customer_id, cart.id);
                        carts.by_id.insert(cart.id, slot.clone());
                        slot
                    }
                }
            };

            let mut guard = slot.lock().await;
            // Deleted between the lookup and the lock; start over with a fresh cart.
            if let Some(cart) = guard.as_mut() {
                return apply(cart, mutation);
            }
        }
    }

    async fn update(&self, cart_id: Uuid, mutation: CartMutation) -> Result<Cart, AppError> {
        let slot = self
            .cart_slot(cart_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Cart {cart_id}")))?;
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(cart) => apply(cart, mutation),
            None => Err(AppError::NotFound(format!("Cart {cart_id}"))),
        }
    }

    async fn delete(&self, cart_id: Uuid) -> Result<bool, AppError> {
        let Some(slot) = self.cart_slot(cart_id).await else {
            return Ok(false);
        };
        self.forget_cart(cart_id).await;
        Ok(slot.lock().await.take().is_some())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn find_placement(
        &self,
        customer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<CheckoutPlacement>, AppError> {
        Ok(self
            .placements
            .lock()
            .await
            .get(&(customer_id, idempotency_key.to_string()))
            .cloned())
    }

    async fn insert_order(&self, placement: NewPlacement) -> Result<PlacementOutcome, AppError> {
        let NewPlacement {
            idempotency_key,
            order,
            initial_entry,
            cart_version,
            consume_cart,
            events,
        } = placement;

        // Held for the whole insert so a key can only ever be claimed once.
        let mut placements = self.placements.lock().await;
        let key = idempotency_key.map(|key| (order.customer_id, key));
        if let Some(existing) = key.as_ref().and_then(|key| placements.get(key)) {
            return Ok(PlacementOutcome::Existing(existing.clone()));
        }

        let slot = self
            .cart_slot(order.cart_id)
            .await
            .ok_or_else(|| AppError::Conflict("Cart was checked out concurrently".into()))?;
        let mut cart = slot.lock().await;
        match cart.as_mut() {
            Some(current) if current.pending_order_id.is_some() => {
                return Err(AppError::Conflict(format!(
                    "Cart {} is awaiting payment for another order",
                    current.id
                )));
            }
            Some(current) if current.version == cart_version => {
                if !consume_cart {
                    current.hold_for(order.id);
                }
            }
            Some(_) => return Err(AppError::Conflict("Cart changed during checkout".into())),
            None => return Err(AppError::Conflict("Cart was checked out concurrently".into())),
        }

        if consume_cart {
            *cart = None;
        }
        drop(cart);
        if consume_cart {
            self.forget_cart(order.cart_id).await;
        }

        if let Some((customer_id, idempotency_key)) = key.clone() {
            placements.insert(
                (customer_id, idempotency_key.clone()),
                CheckoutPlacement {
                    customer_id,
                    idempotency_key,
                    order_id: order.id,
                    checkout_url: None,
                    error: None,
                    state: if consume_cart {
                        PlacementState::Completed
                    } else {
                        PlacementState::InProgress
                    },
                },
            );
        }

        self.orders.write().await.insert(
            order.id,
            Arc::new(Mutex::new(OrderRecord {
                order: order.clone(),
                history: vec![initial_entry],
            })),
        );
        self.outbox.lock().await.extend(events);

        Ok(PlacementOutcome::Created(order))
    }

    async fn complete_placement(
        &self,
        order: &Order,
        idempotency_key: Option<&str>,
        result: &OrderPlacementResult,
        payment: Option<NewPayment>,
    ) -> Result<(), AppError> {
        if payment.is_none() {
            if let Some(slot) = self.cart_slot(order.cart_id).await {
                if let Some(cart) = slot.lock().await.as_mut() {
                    cart.release(order.id);
                }
            }
        }

        if let Some(payment) = payment {
            let now = Utc::now();
            self.payments.lock().await.push(Payment {
                id: Uuid::new_v4(),
                order_id: payment.order_id,
                amount: payment.amount,
                status: PaymentStatus::Pending,
                provider: payment.provider,
                provider_ref: payment.provider_ref,
                failure_reason: None,
                created_at: now,
                updated_at: now,
            });
        }

        if let Some(key) = idempotency_key {
            let mut placements = self.placements.lock().await;
            if let Some(placement) = placements.get_mut(&(order.customer_id, key.to_string())) {
                placement.checkout_url = result.checkout_url.clone();
                placement.error = result.error.clone();
                placement.state = PlacementState::Completed;
            }
        }
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        match self.order_record(order_id).await {
            Some(record) => Ok(Some(record.lock().await.order.clone())),
            None => Ok(None),
        }
    }

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, AppError> {
        Ok(self
            .orders_matching(|order| order.customer_id == customer_id)
            .await)
    }

    async fn list_for_restaurant(&self, restaurant_id: Uuid) -> Result<Vec<Order>, AppError> {
        Ok(self
            .orders_matching(|order| order.restaurant_id == restaurant_id)
            .await)
    }

    async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AppError> {
        match self.order_record(order_id).await {
            Some(record) => Ok(record.lock().await.history.clone()),
            None => Err(AppError::NotFound(format!("Order {order_id}"))),
        }
    }

    async fn compare_and_set_status(
        &self,
        change: &StatusChange,
        event: OutboxMessage,
    ) -> Result<StatusUpdateOutcome, AppError> {
        let record = self
            .order_record(change.order_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Order {}", change.order_id)))?;
        let mut record = record.lock().await;

        if record.order.status != change.from {
            return Ok(StatusUpdateOutcome::Stale {
                current: record.order.status,
            });
        }

        record.order.status = change.to;
        record.order.updated_at = change.at;
        if change.to == OrderStatus::Completed {
            record.order.completed_at = Some(change.at);
        }
        record.history.push(StatusHistoryEntry {
            status: change.to,
            notes: change.notes.clone(),
            actor: change.actor.label(),
            created_at: change.at,
        });
        self.outbox.lock().await.push(event);

        Ok(StatusUpdateOutcome::Applied(record.order.clone()))
    }

    async fn payment_for(&self, order_id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self
            .payments
            .lock()
            .await
            .iter()
            .rev()
            .find(|payment| payment.order_id == order_id)
            .cloned())
    }

    async fn settle_payment(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Payment>, AppError> {
        let mut payments = self.payments.lock().await;
        let pending = payments
            .iter_mut()
            .find(|p| p.order_id == order_id && p.status == PaymentStatus::Pending);
        Ok(pending.map(|payment| {
            payment.status = status;
            payment.failure_reason = failure_reason;
            payment.updated_at = Utc::now();
            payment.clone()
        }))
    }
}

/// Stand-in for the AMQP relay when running on the memory backend: drains the
/// outbox into the log.
pub async fn run_log_relay(store: Arc<MemoryStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for message in store.drain_outbox().await {
            tracing::info!(event_type = %message.event_type, payload = %message.payload, "Outbox event");
        }
    }
}
