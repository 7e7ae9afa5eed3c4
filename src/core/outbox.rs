//! Transactional outbox.
//!
//! Events are inserted into `outbox` inside the same transaction as the state
//! change that produced them; [`run_relay`] later publishes pending rows to
//! AMQP and marks them sent.

use std::time::Duration;

use anyhow::{Context, Result};
use diesel::{ExpressionMethods, QueryDsl, Queryable, Selectable, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use lapin::{
    BasicProperties, Channel,
    options::BasicPublishOptions,
};
use serde::Serialize;

use crate::core::db::DbPool;
use crate::schema::outbox;

const RELAY_BATCH_SIZE: i64 = 50;

/// An event waiting to be written to the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub event_type: String,
    pub payload: String,
}

impl OutboxMessage {
    pub fn new<T: Serialize>(event_type: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            event_type: event_type.to_string(),
            payload: serde_json::to_string(payload).context("Failed to serialize event")?,
        })
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct OutboxEntity {
    id: i32,
    event_type: String,
    payload: String,
}

/// Inserts `message` into the outbox using `conn`, which should be inside
/// the caller's transaction.
pub async fn publish(conn: &mut AsyncPgConnection, message: OutboxMessage) -> Result<()> {
    diesel::insert_into(outbox::table)
        .values((
            outbox::event_type.eq(message.event_type),
            outbox::payload.eq(message.payload),
            outbox::status.eq("PENDING"),
        ))
        .execute(conn)
        .await
        .context("Failed to insert outbox message")?;
    Ok(())
}

/// Publishes pending outbox rows forever, one batch per `interval`. Target
/// queues are declared by `bootstrap` before the relay starts.
pub async fn run_relay(pool: DbPool, channel: Channel, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match relay_batch(&pool, &channel).await {
            Ok(0) => {}
            Ok(sent) => tracing::debug!("Relayed {} outbox messages", sent),
            Err(err) => tracing::error!("Outbox relay failed: {:?}", err),
        }
    }
}

async fn relay_batch(pool: &DbPool, channel: &Channel) -> Result<usize> {
    let conn = &mut pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let channel = channel.clone();
    conn.transaction(move |conn| {
        Box::pin(async move {
            let pending: Vec<OutboxEntity> = outbox::table
                .filter(outbox::status.eq("PENDING"))
                .select(OutboxEntity::as_select())
                .order_by(outbox::id.asc())
                .limit(RELAY_BATCH_SIZE)
                .for_update()
                .skip_locked()
                .load(conn)
                .await
                .context("Failed to load pending outbox messages")?;

            for message in &pending {
                channel
                    .basic_publish(
                        "".into(),
                        message.event_type.as_str().into(),
                        BasicPublishOptions::default(),
                        message.payload.as_bytes(),
                        BasicProperties::default(),
                    )
                    .await
                    .context("Failed to publish outbox message")?
                    .await
                    .context("Broker did not confirm outbox message")?;

                diesel::update(outbox::table.find(message.id))
                    .set((
                        outbox::status.eq("SENT"),
                        outbox::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await
                    .context("Failed to mark outbox message as sent")?;

                tracing::debug!("Relayed outbox message #{} ({})", message.id, message.event_type);
            }

            Ok::<usize, anyhow::Error>(pending.len())
        })
    })
    .await
}
