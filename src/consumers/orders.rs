use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::core::{app_error::AppError, app_state::AppState};
use crate::events::{CheckoutCompletedEvent, CheckoutFailedEvent};

fn parse<T: DeserializeOwned>(delivery: &Delivery) -> Result<T> {
    serde_json::from_str(str::from_utf8(&delivery.data)?).context("Failed to parse event")
}

/// Acks business outcomes, including rejections that would fail the same way
/// on redelivery. Infrastructure failures are requeued.
async fn settle(delivery: Delivery, result: Result<(), AppError>) -> Result<()> {
    match result {
        Ok(()) => {
            delivery.ack(BasicAckOptions::default()).await?;
            Ok(())
        }
        Err(err @ (AppError::Other(_) | AppError::UpstreamUnavailable(_))) => {
            delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await?;
            Err(err.into())
        }
        Err(err) => {
            warn!("Dropping event that cannot be applied: {}", err);
            delivery.ack(BasicAckOptions::default()).await?;
            Ok(())
        }
    }
}

async fn drop_malformed(delivery: Delivery, err: anyhow::Error) -> Result<()> {
    warn!("Dropping malformed event: {:?}", err);
    delivery
        .nack(BasicNackOptions {
            requeue: false,
            ..BasicNackOptions::default()
        })
        .await?;
    Ok(())
}

pub fn checkout_completed(
    delivery: Delivery,
    state: Arc<AppState>,
) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let payload: CheckoutCompletedEvent = match parse(&delivery) {
            Ok(payload) => payload,
            Err(err) => return drop_malformed(delivery, err).await,
        };
        info!("Received event: {:?}", payload);

        let result = state.payment_callbacks.checkout_completed(payload).await;
        settle(delivery, result).await
    })
}

pub fn checkout_failed(delivery: Delivery, state: Arc<AppState>) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let payload: CheckoutFailedEvent = match parse(&delivery) {
            Ok(payload) => payload,
            Err(err) => return drop_malformed(delivery, err).await,
        };
        info!("Received event: {:?}", payload);

        let result = state.payment_callbacks.checkout_failed(payload).await;
        settle(delivery, result).await
    })
}
