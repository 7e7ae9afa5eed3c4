use std::sync::Arc;

use crate::core::config::CheckoutConfig;
use crate::domain::pricing::PricingPolicy;
use crate::services::{
    carts::{Catalog, CartService},
    checkout::{CheckoutOrchestrator, HostedCheckout},
    order_status::OrderStatusMachine,
    payments::PaymentCallbacks,
    readiness::{PaymentReadinessGate, ReadinessSource},
};
use crate::store::{CartRepository, OrderRepository};

/// Outside services the order service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub readiness: Arc<dyn ReadinessSource>,
    pub hosted_checkout: Arc<dyn HostedCheckout>,
}

/// Shared by every handler and consumer.
#[derive(Clone)]
pub struct AppState {
    pub carts: CartService,
    pub checkout: CheckoutOrchestrator,
    pub status_machine: OrderStatusMachine,
    pub payment_callbacks: PaymentCallbacks,
    pub orders: Arc<dyn OrderRepository>,
}

impl AppState {
    pub fn new(
        cart_repository: Arc<dyn CartRepository>,
        order_repository: Arc<dyn OrderRepository>,
        collaborators: Collaborators,
        pricing: PricingPolicy,
        checkout: &CheckoutConfig,
    ) -> Self {
        let gate = PaymentReadinessGate::new(collaborators.readiness, checkout.readiness_timeout);
        let status_machine = OrderStatusMachine::new(order_repository.clone());

        Self {
            carts: CartService::new(
                cart_repository.clone(),
                collaborators.catalog,
                pricing.clone(),
            ),
            checkout: CheckoutOrchestrator::new(
                cart_repository.clone(),
                order_repository.clone(),
                gate,
                collaborators.hosted_checkout,
                pricing,
                checkout.session_timeout,
                checkout.readiness_failure_policy,
            ),
            payment_callbacks: PaymentCallbacks::new(
                cart_repository,
                order_repository.clone(),
                status_machine.clone(),
            ),
            status_machine,
            orders: order_repository,
        }
    }
}
