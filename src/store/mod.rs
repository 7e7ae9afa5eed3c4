//! Persistence seams for carts and orders.
//!
//! Both backends give the same guarantees: cart mutations run under a per-cart
//! exclusive section, an idempotency key is claimed in the same atomic step
//! that inserts the order, and status updates are a compare-and-swap on the
//! current status. Events are written to the outbox in the same step as the
//! change that produced them.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::{app_error::AppError, outbox::OutboxMessage};
use crate::domain::{
    cart::Cart,
    order::{Order, OrderPlacementResult, OrderStatus, StatusChange, StatusHistoryEntry},
};

pub mod memory;
pub mod postgres;

/// A change applied to a cart while it is locked.
pub type CartMutation = Box<dyn FnOnce(&mut Cart) -> Result<(), AppError> + Send>;

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn find(&self, cart_id: Uuid) -> Result<Option<Cart>, AppError>;

    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Option<Cart>, AppError>;

    /// Runs `mutation` on the customer's cart, creating an empty one first if
    /// the customer has none.
    async fn upsert_for_customer(
        &self,
        customer_id: Uuid,
        mutation: CartMutation,
    ) -> Result<Cart, AppError>;

    /// Runs `mutation` on an existing cart. A missing cart is `NotFound`.
    async fn update(&self, cart_id: Uuid, mutation: CartMutation) -> Result<Cart, AppError>;

    /// Deletes a cart. Returns `false` when it did not exist.
    async fn delete(&self, cart_id: Uuid) -> Result<bool, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementState {
    InProgress,
    Completed,
}

impl PlacementState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlacementState::InProgress => "IN_PROGRESS",
            PlacementState::Completed => "COMPLETED",
        }
    }
}

impl FromStr for PlacementState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(PlacementState::InProgress),
            "COMPLETED" => Ok(PlacementState::Completed),
            _ => Err(format!("Unknown placement state: {s}")),
        }
    }
}

/// The stored result of a checkout attempt keyed by idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPlacement {
    pub customer_id: Uuid,
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub checkout_url: Option<String>,
    pub error: Option<String>,
    pub state: PlacementState,
}

impl CheckoutPlacement {
    pub fn result(&self) -> OrderPlacementResult {
        OrderPlacementResult {
            order_id: self.order_id,
            checkout_url: self.checkout_url.clone(),
            error: self.error.clone(),
        }
    }
}

/// Everything written atomically when an order is placed.
#[derive(Debug, Clone)]
pub struct NewPlacement {
    pub idempotency_key: Option<String>,
    pub order: Order,
    pub initial_entry: StatusHistoryEntry,
    /// Cart version the order was priced from.
    pub cart_version: i64,
    /// Delete the cart in the same step. Otherwise the cart is held for the
    /// order until its hosted payment settles.
    pub consume_cart: bool,
    pub events: Vec<OutboxMessage>,
}

#[derive(Debug, Clone)]
pub enum PlacementOutcome {
    Created(Order),
    /// The idempotency key was claimed by an earlier placement.
    Existing(CheckoutPlacement),
}

#[derive(Debug, Clone)]
pub enum StatusUpdateOutcome {
    Applied(Order),
    /// The order's status was no longer the expected one.
    Stale { current: OrderStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            _ => Err(format!("Unknown payment status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub status: PaymentStatus,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub amount: i64,
    pub provider: String,
    pub provider_ref: Option<String>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_placement(
        &self,
        customer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<CheckoutPlacement>, AppError>;

    /// Claims the idempotency key, checks the cart version, and inserts the
    /// order with its first history entry and events, all or nothing. A cart
    /// already held for another order is `Conflict`.
    async fn insert_order(&self, placement: NewPlacement) -> Result<PlacementOutcome, AppError>;

    /// Stores the final placement result and, when a hosted session was
    /// created, its pending payment. Without a payment the held cart is
    /// released.
    async fn complete_placement(
        &self,
        order: &Order,
        idempotency_key: Option<&str>,
        result: &OrderPlacementResult,
        payment: Option<NewPayment>,
    ) -> Result<(), AppError>;

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError>;

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, AppError>;

    async fn list_for_restaurant(&self, restaurant_id: Uuid) -> Result<Vec<Order>, AppError>;

    async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AppError>;

    /// Applies `change` only if the order is still in `change.from`.
    async fn compare_and_set_status(
        &self,
        change: &StatusChange,
        event: OutboxMessage,
    ) -> Result<StatusUpdateOutcome, AppError>;

    /// The most recent payment recorded for the order.
    async fn payment_for(&self, order_id: Uuid) -> Result<Option<Payment>, AppError>;

    /// Moves the order's pending payment to `status`. Returns `None` when
    /// there is no pending payment (already settled or never created).
    async fn settle_payment(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Payment>, AppError>;
}
