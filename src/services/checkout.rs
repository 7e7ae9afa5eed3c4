use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::core::{app_error::AppError, outbox::OutboxMessage};
use crate::domain::{
    order::{Actor, Order, OrderItem, OrderPlacementResult, OrderStatus, StatusHistoryEntry},
    pricing::{self, PricingPolicy},
    readiness::ReadinessFailurePolicy,
};
use crate::events::{self, OrderCreatedEvent};
use crate::services::readiness::PaymentReadinessGate;
use crate::store::{
    CartRepository, CheckoutPlacement, NewPayment, NewPlacement, OrderRepository,
    PlacementOutcome, PlacementState,
};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// A hosted payment page created for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

/// Creates hosted payment sessions with the payment processor.
#[async_trait]
pub trait HostedCheckout: Send + Sync {
    fn provider(&self) -> &str;

    async fn create_session(
        &self,
        order_id: Uuid,
        amount: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, AppError>;
}

#[derive(Debug, Clone, Default)]
pub struct PlaceOrder {
    pub cart_id: Uuid,
    pub delivery_address: String,
    pub special_instructions: Option<String>,
    pub idempotency_key: Option<String>,
    pub success_redirect: Option<String>,
    pub cancel_redirect: Option<String>,
}

struct Redirects {
    success: String,
    cancel: String,
}

#[derive(Clone)]
pub struct CheckoutOrchestrator {
    carts: Arc<dyn CartRepository>,
    orders: Arc<dyn OrderRepository>,
    gate: PaymentReadinessGate,
    hosted: Arc<dyn HostedCheckout>,
    pricing: PricingPolicy,
    session_timeout: Duration,
    readiness_policy: ReadinessFailurePolicy,
}

impl CheckoutOrchestrator {
    pub fn new(
        carts: Arc<dyn CartRepository>,
        orders: Arc<dyn OrderRepository>,
        gate: PaymentReadinessGate,
        hosted: Arc<dyn HostedCheckout>,
        pricing: PricingPolicy,
        session_timeout: Duration,
        readiness_policy: ReadinessFailurePolicy,
    ) -> Self {
        Self {
            carts,
            orders,
            gate,
            hosted,
            pricing,
            session_timeout,
            readiness_policy,
        }
    }

    /// Converts the customer's cart into an order.
    ///
    /// With both redirects supplied a hosted payment session is created after
    /// the order and the cart is held for that order until payment settles;
    /// otherwise the cart is consumed together with the order insert. A held
    /// cart cannot be checked out again.
    #[instrument(skip(self, request), fields(cart_id = %request.cart_id))]
    pub async fn place_order(
        &self,
        customer_id: Uuid,
        request: PlaceOrder,
    ) -> Result<OrderPlacementResult, AppError> {
        let delivery_address = request.delivery_address.trim().to_string();
        if delivery_address.is_empty() {
            return Err(AppError::Validation("Delivery address cannot be blank".into()));
        }
        let idempotency_key = validate_key(request.idempotency_key)?;
        let redirects = match (request.success_redirect, request.cancel_redirect) {
            (Some(success), Some(cancel)) => Some(Redirects { success, cancel }),
            (None, None) => None,
            _ => {
                return Err(AppError::Validation(
                    "Both success and cancel redirects are required for hosted payment".into(),
                ));
            }
        };

        // Checked before the cart is loaded: a completed placement has
        // usually consumed its cart already.
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(placement) = self.orders.find_placement(customer_id, key).await? {
                return replay(placement);
            }
        }

        let cart = match self.carts.find(request.cart_id).await? {
            Some(cart) if cart.customer_id == customer_id && !cart.is_empty() => cart,
            _ => {
                // A concurrent request with the same key may have just
                // consumed the cart.
                if let Some(key) = idempotency_key.as_deref() {
                    if let Some(placement) = self.orders.find_placement(customer_id, key).await? {
                        return replay(placement);
                    }
                }
                return Err(AppError::EmptyCart);
            }
        };
        let Some(restaurant_id) = cart.restaurant_id else {
            return Err(AppError::EmptyCart);
        };
        if let Some(order_id) = cart.pending_order_id {
            return Err(AppError::Conflict(format!(
                "Cart {} is awaiting payment for order {}",
                cart.id, order_id
            )));
        }

        let items: Vec<OrderItem> = cart.items.iter().map(OrderItem::from).collect();
        let pricing = pricing::compute(&items, &self.pricing);

        self.gate
            .ensure_ready(restaurant_id, self.readiness_policy)
            .await?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            customer_id,
            restaurant_id,
            cart_id: cart.id,
            items,
            pricing,
            delivery_address,
            special_instructions: request
                .special_instructions
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let created = OutboxMessage::new(
            events::ORDER_CREATED,
            &OrderCreatedEvent {
                order_id: order.id,
                customer_id,
                restaurant_id,
                total: order.pricing.total,
                created_at: now,
            },
        )?;

        let outcome = self
            .orders
            .insert_order(NewPlacement {
                idempotency_key: idempotency_key.clone(),
                initial_entry: StatusHistoryEntry {
                    status: OrderStatus::Pending,
                    notes: Some("Order placed".into()),
                    actor: Actor::Customer(customer_id).label(),
                    created_at: now,
                },
                cart_version: cart.version,
                consume_cart: redirects.is_none(),
                events: vec![created],
                order,
            })
            .await?;

        let order = match outcome {
            PlacementOutcome::Created(order) => order,
            PlacementOutcome::Existing(placement) => return replay(placement),
        };
        info!(
            event = "order_placed",
            order_id = %order.id,
            %restaurant_id,
            total = order.pricing.total,
            "Order placed"
        );

        let Some(redirects) = redirects else {
            return Ok(OrderPlacementResult {
                order_id: order.id,
                checkout_url: None,
                error: None,
            });
        };

        self.start_hosted_payment(&order, idempotency_key.as_deref(), redirects)
            .await
    }

    async fn start_hosted_payment(
        &self,
        order: &Order,
        idempotency_key: Option<&str>,
        redirects: Redirects,
    ) -> Result<OrderPlacementResult, AppError> {
        let session = tokio::time::timeout(
            self.session_timeout,
            self.hosted.create_session(
                order.id,
                order.pricing.total,
                &redirects.success,
                &redirects.cancel,
            ),
        )
        .await;

        let (result, payment) = match session {
            Ok(Ok(session)) => {
                info!(order_id = %order.id, session_id = %session.session_id, "Hosted checkout session created");
                (
                    OrderPlacementResult {
                        order_id: order.id,
                        checkout_url: Some(session.checkout_url),
                        error: None,
                    },
                    Some(NewPayment {
                        order_id: order.id,
                        amount: order.pricing.total,
                        provider: self.hosted.provider().to_string(),
                        provider_ref: Some(session.session_id),
                    }),
                )
            }
            Ok(Err(err)) => {
                warn!(order_id = %order.id, "Hosted checkout session failed: {}", err);
                (session_failure(order.id, err.to_string()), None)
            }
            Err(_) => {
                warn!(order_id = %order.id, "Hosted checkout session timed out");
                (
                    session_failure(
                        order.id,
                        format!(
                            "Payment session timed out after {}ms",
                            self.session_timeout.as_millis()
                        ),
                    ),
                    None,
                )
            }
        };

        let has_payment = payment.is_some();
        let mut recorded = self
            .orders
            .complete_placement(order, idempotency_key, &result, payment.clone())
            .await;
        if let Err(err) = &recorded {
            warn!(order_id = %order.id, "Recording checkout placement failed, retrying: {:?}", err);
            recorded = self
                .orders
                .complete_placement(order, idempotency_key, &result, payment)
                .await;
        }

        match recorded {
            Ok(()) => Ok(result),
            Err(err) => {
                error!(order_id = %order.id, "Failed to record checkout placement: {:?}", err);
                // Without a payment row the payment callbacks cannot settle
                // this order, so the customer must not be sent to pay.
                if has_payment {
                    Ok(session_failure(
                        order.id,
                        "Payment could not be recorded; the payment page was not opened".into(),
                    ))
                } else {
                    Ok(result)
                }
            }
        }
    }
}

fn validate_key(key: Option<String>) -> Result<Option<String>, AppError> {
    let Some(key) = key else {
        return Ok(None);
    };
    let key = key.trim().to_string();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::Validation(format!(
            "Idempotency key must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(Some(key))
}

fn replay(placement: CheckoutPlacement) -> Result<OrderPlacementResult, AppError> {
    match placement.state {
        PlacementState::Completed => {
            info!(order_id = %placement.order_id, "Replaying checkout for a reused idempotency key");
            Ok(placement.result())
        }
        PlacementState::InProgress => Err(AppError::Conflict(format!(
            "Checkout with idempotency key `{}` is still in progress",
            placement.idempotency_key
        ))),
    }
}

fn session_failure(order_id: Uuid, error: String) -> OrderPlacementResult {
    OrderPlacementResult {
        order_id,
        checkout_url: None,
        error: Some(error),
    }
}
