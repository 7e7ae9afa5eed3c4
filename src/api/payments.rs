use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::core::app_error::AppError;
use crate::domain::readiness::{PaymentOnboardingStatus, ReadinessCheck};
use crate::services::{
    checkout::{CheckoutSession, HostedCheckout},
    readiness::ReadinessSource,
};

#[derive(Deserialize, Debug)]
struct ReadinessResponse {
    ready: bool,
    onboarding_status: Option<PaymentOnboardingStatus>,
}

#[derive(Serialize, Debug)]
struct CreateSessionRequest<'a> {
    order_id: Uuid,
    amount: i64,
    success_url: &'a str,
    cancel_url: &'a str,
}

/// Client for the payment collaborator: onboarding readiness and hosted
/// checkout sessions.
#[derive(Clone)]
pub struct HttpPaymentService {
    client: Client,
    base_url: String,
}

impl HttpPaymentService {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ReadinessSource for HttpPaymentService {
    #[instrument(skip(self))]
    async fn check(&self, restaurant_id: Uuid) -> ReadinessCheck {
        let response = match self
            .client
            .get(format!(
                "{}/restaurants/{}/readiness",
                self.base_url, restaurant_id
            ))
            .send()
            .await
            .and_then(|response| response.error_for_status())
        {
            Ok(response) => response,
            Err(err) => return ReadinessCheck::CheckFailed(err.to_string()),
        };

        match response.json::<ReadinessResponse>().await {
            Ok(body) => {
                debug!("Onboarding status: {:?}", body.onboarding_status);
                if body.ready {
                    ReadinessCheck::Ready
                } else {
                    ReadinessCheck::NotReady
                }
            }
            Err(err) => ReadinessCheck::CheckFailed(format!("Malformed readiness response: {err}")),
        }
    }
}

#[async_trait]
impl HostedCheckout for HttpPaymentService {
    fn provider(&self) -> &str {
        "PaymentService"
    }

    #[instrument(skip(self, success_url, cancel_url))]
    async fn create_session(
        &self,
        order_id: Uuid,
        amount: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, AppError> {
        let session: CheckoutSession = self
            .client
            .post(format!("{}/checkout-sessions", self.base_url))
            .json(&CreateSessionRequest {
                order_id,
                amount,
                success_url,
                cancel_url,
            })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|_| AppError::UpstreamUnavailable("PaymentService".into()))?
            .json()
            .await
            .context("Failed to parse JSON")?;

        Ok(session)
    }
}
