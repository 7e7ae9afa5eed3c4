use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::{app_error::AppError, outbox::OutboxMessage};
use crate::domain::order::{Actor, Order, OrderStatus, StatusChange};
use crate::events::{self, OrderStatusChangedEvent};
use crate::store::{OrderRepository, StatusUpdateOutcome};

/// Applies status transitions from the single transition table.
#[derive(Clone)]
pub struct OrderStatusMachine {
    orders: Arc<dyn OrderRepository>,
}

impl OrderStatusMachine {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Moves `order_id` to `target` on behalf of `actor`.
    ///
    /// Checks run in order: the order must exist, the actor must be allowed to
    /// touch it, and the move must be in the table. The write itself only
    /// succeeds if nobody changed the status since it was read; a lost race is
    /// reported as `Conflict` and leaves the winner's write intact.
    #[instrument(skip(self, notes))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<Order, AppError> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))?;

        if !actor.may_update(&order) {
            return Err(AppError::Forbidden(format!(
                "{} may not update order {}",
                actor.label(),
                order_id
            )));
        }

        if !order.status.can_transition_to(target) {
            info!(
                event = "invalid_transition",
                %order_id,
                from = %order.status,
                to = %target,
                "Rejected status transition"
            );
            return Err(AppError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        let change = StatusChange {
            order_id,
            from: order.status,
            to: target,
            notes: notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
            actor,
            at: Utc::now(),
        };
        let event = OutboxMessage::new(
            events::ORDER_STATUS_CHANGED,
            &OrderStatusChangedEvent {
                order_id,
                customer_id: order.customer_id,
                restaurant_id: order.restaurant_id,
                old_status: change.from,
                new_status: change.to,
                notes: change.notes.clone(),
                changed_at: change.at,
            },
        )?;

        match self.orders.compare_and_set_status(&change, event).await? {
            StatusUpdateOutcome::Applied(order) => {
                info!(
                    event = "order_status_changed",
                    %order_id,
                    from = %change.from,
                    to = %change.to,
                    actor = %actor.label(),
                    "Order status updated"
                );
                Ok(order)
            }
            StatusUpdateOutcome::Stale { current } => Err(AppError::Conflict(format!(
                "Order {order_id} moved from {} to {current} concurrently",
                change.from
            ))),
        }
    }
}
