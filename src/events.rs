//! Messages exchanged with collaborators over AMQP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::OrderStatus;

pub const ORDER_CREATED: &str = "notifications.order_created";
pub const ORDER_STATUS_CHANGED: &str = "notifications.order_status_changed";

pub const CHECKOUT_COMPLETED: &str = "orders.checkout_completed";
pub const CHECKOUT_FAILED: &str = "orders.checkout_failed";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub total: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderStatusChangedEvent {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub notes: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Sent by the payment collaborator once a hosted checkout is paid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompletedEvent {
    pub order_id: Uuid,
    pub session_id: Option<String>,
}

/// Sent by the payment collaborator when a hosted checkout fails, expires or
/// is abandoned.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckoutFailedEvent {
    pub order_id: Uuid,
    pub reason: Option<String>,
}
