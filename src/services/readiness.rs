use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::app_error::AppError;
use crate::domain::readiness::{ReadinessCheck, ReadinessFailurePolicy};

/// Answers whether a restaurant has finished payment onboarding.
#[async_trait]
pub trait ReadinessSource: Send + Sync {
    async fn check(&self, restaurant_id: Uuid) -> ReadinessCheck;
}

/// Decides whether checkout may proceed for a restaurant.
#[derive(Clone)]
pub struct PaymentReadinessGate {
    source: Arc<dyn ReadinessSource>,
    timeout: Duration,
}

impl PaymentReadinessGate {
    pub fn new(source: Arc<dyn ReadinessSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Raw answer from the source. A source that does not answer within the
    /// gate's timeout counts as a failed check.
    pub async fn check(&self, restaurant_id: Uuid) -> ReadinessCheck {
        match tokio::time::timeout(self.timeout, self.source.check(restaurant_id)).await {
            Ok(check) => check,
            Err(_) => ReadinessCheck::CheckFailed(format!(
                "Readiness check timed out after {}ms",
                self.timeout.as_millis()
            )),
        }
    }

    /// `true` unless the restaurant is known not to be ready. Failed checks
    /// are let through and logged.
    pub async fn is_ready(&self, restaurant_id: Uuid) -> bool {
        self.ensure_ready(restaurant_id, ReadinessFailurePolicy::FailOpen)
            .await
            .is_ok()
    }

    pub async fn ensure_ready(
        &self,
        restaurant_id: Uuid,
        policy: ReadinessFailurePolicy,
    ) -> Result<(), AppError> {
        match self.check(restaurant_id).await {
            ReadinessCheck::Ready => Ok(()),
            ReadinessCheck::NotReady => {
                info!(
                    event = "payment_not_ready",
                    %restaurant_id,
                    "Restaurant cannot receive payments yet"
                );
                Err(AppError::PaymentNotReady(restaurant_id))
            }
            ReadinessCheck::CheckFailed(reason) => match policy {
                ReadinessFailurePolicy::FailOpen => {
                    warn!(
                        event = "payment_readiness_fail_open",
                        %restaurant_id,
                        %reason,
                        "Payment readiness check failed, letting checkout proceed"
                    );
                    Ok(())
                }
                ReadinessFailurePolicy::FailClosed => {
                    warn!(
                        event = "payment_readiness_fail_closed",
                        %restaurant_id,
                        %reason,
                        "Payment readiness check failed, rejecting checkout"
                    );
                    Err(AppError::UpstreamUnavailable(
                        "Payment readiness check".into(),
                    ))
                }
            },
        }
    }
}
