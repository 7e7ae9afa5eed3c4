use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::app_error::AppError;
use crate::domain::order::{Actor, Order, OrderStatus};
use crate::events::{CheckoutCompletedEvent, CheckoutFailedEvent};
use crate::services::order_status::OrderStatusMachine;
use crate::store::{CartRepository, OrderRepository, PaymentStatus};

/// Reacts to hosted checkout outcomes reported by the payment collaborator.
///
/// Both handlers settle the payment as their last step, so a pending payment
/// means the callback still has work to do. A redelivered message after a
/// partial failure picks up where the previous attempt stopped.
#[derive(Clone)]
pub struct PaymentCallbacks {
    carts: Arc<dyn CartRepository>,
    orders: Arc<dyn OrderRepository>,
    status_machine: OrderStatusMachine,
}

impl PaymentCallbacks {
    pub fn new(
        carts: Arc<dyn CartRepository>,
        orders: Arc<dyn OrderRepository>,
        status_machine: OrderStatusMachine,
    ) -> Self {
        Self {
            carts,
            orders,
            status_machine,
        }
    }

    /// Drops the cart the order was placed from, then marks the payment
    /// paid. The order itself stays `Pending` until the restaurant accepts it.
    #[instrument(skip(self))]
    pub async fn checkout_completed(&self, event: CheckoutCompletedEvent) -> Result<(), AppError> {
        let order = self.order(event.order_id).await?;

        match self.orders.payment_for(order.id).await? {
            Some(payment) if payment.status == PaymentStatus::Pending => {}
            Some(payment) if payment.status == PaymentStatus::Paid => {
                info!(order_id = %order.id, "Payment already settled; callback already handled");
                return Ok(());
            }
            Some(payment) => {
                warn!(
                    event = "payment_completed_after_failure",
                    order_id = %order.id,
                    status = %payment.status,
                    "Ignoring completion for a settled payment"
                );
                return Ok(());
            }
            None => {
                warn!(order_id = %order.id, "No payment recorded for order; ignoring completion");
                return Ok(());
            }
        }

        let cart = self.carts.find(order.cart_id).await?;
        if cart.is_some_and(|cart| cart.pending_order_id == Some(order.id))
            && self.carts.delete(order.cart_id).await?
        {
            info!(order_id = %order.id, cart_id = %order.cart_id, "Cleared cart after payment");
        }

        if let Some(payment) = self
            .orders
            .settle_payment(order.id, PaymentStatus::Paid, None)
            .await?
        {
            info!(
                event = "payment_completed",
                order_id = %order.id,
                amount = payment.amount,
                "Hosted payment completed"
            );
        }
        Ok(())
    }

    /// Cancels the order through the status machine, releases the cart so
    /// the customer can retry, then marks the payment failed.
    #[instrument(skip(self))]
    pub async fn checkout_failed(&self, event: CheckoutFailedEvent) -> Result<(), AppError> {
        let order = self.order(event.order_id).await?;
        let reason = event
            .reason
            .unwrap_or_else(|| "Payment was not completed".to_string());

        let payment = self.orders.payment_for(order.id).await?;
        if payment
            .as_ref()
            .is_some_and(|payment| payment.status == PaymentStatus::Paid)
        {
            warn!(order_id = %order.id, "Ignoring failure for an order that was already paid");
            return Ok(());
        }

        if order.status.is_terminal() {
            info!(order_id = %order.id, status = %order.status, "Order already closed; nothing to cancel");
        } else {
            self.cancel(&order, &reason).await?;
        }

        let order_id = order.id;
        let released = self
            .carts
            .update(
                order.cart_id,
                Box::new(move |cart| {
                    cart.release(order_id);
                    Ok(())
                }),
            )
            .await;
        match released {
            Ok(_) | Err(AppError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        if payment.is_some_and(|payment| payment.status == PaymentStatus::Pending) {
            self.orders
                .settle_payment(order.id, PaymentStatus::Failed, Some(reason))
                .await?;
        }
        Ok(())
    }

    async fn order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id}")))
    }

    async fn cancel(&self, order: &Order, reason: &str) -> Result<(), AppError> {
        let result = self
            .status_machine
            .update_status(
                order.id,
                OrderStatus::Cancelled,
                Some(format!("Payment failed: {reason}")),
                Actor::System,
            )
            .await;

        match result {
            Ok(_) => {
                info!(event = "payment_failed", order_id = %order.id, "Order cancelled after failed payment");
                Ok(())
            }
            // Closed or moved concurrently; nothing left to cancel.
            Err(err @ (AppError::InvalidTransition { .. } | AppError::Conflict(_))) => {
                warn!(order_id = %order.id, "Could not cancel order after failed payment: {}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
