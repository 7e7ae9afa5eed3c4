use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use futures::future::BoxFuture;
use futures_lite::StreamExt;
use lapin::{
    Channel, Connection, ConnectionProperties,
    message::Delivery,
    options::{BasicConsumeOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::FieldTable,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{catalog::HttpCatalog, payments::HttpPaymentService};
use crate::core::{
    app_state::{AppState, Collaborators},
    config::{AppConfig, StorageBackend},
    db, outbox,
};
use crate::events;
use crate::store::{memory::MemoryStore, postgres::PgStore};

/// Handles one AMQP delivery. The handler acks or nacks it.
pub type ConsumerFn = fn(Delivery, Arc<AppState>) -> BoxFuture<'static, Result<()>>;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,marketplace_orderservice=debug")),
        )
        .init();
}

pub fn init_env() {
    if let Err(err) = dotenvy::dotenv() {
        // A missing .env is normal outside local development.
        tracing::debug!("No .env loaded: {}", err);
    }
}

/// Wires storage, collaborators and messaging for `config`, then serves `app`
/// until a shutdown signal arrives.
pub async fn bootstrap(
    name: &str,
    config: AppConfig,
    app: Router<AppState>,
    consumers: &[(&str, ConsumerFn)],
) -> Result<()> {
    let http_client = reqwest::Client::new();
    let payment_service = Arc::new(HttpPaymentService::new(
        http_client.clone(),
        config.services.payment_service_url.clone(),
    ));
    let collaborators = Collaborators {
        catalog: Arc::new(HttpCatalog::new(
            http_client,
            config.services.catalog_service_url.clone(),
        )),
        readiness: payment_service.clone(),
        hosted_checkout: payment_service,
    };

    // Held until the server stops so consumers and the relay keep their channel.
    let mut amqp_connection = None;
    let state = match config.storage {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            let store = Arc::new(PgStore::new(pool.clone()));
            let state = AppState::new(
                store.clone(),
                store,
                collaborators,
                config.pricing.clone(),
                &config.checkout,
            );

            let connection = Connection::connect(&config.amqp.url, ConnectionProperties::default())
                .await
                .context("Failed to connect to AMQP")?;
            info!("Connected to AMQP");

            let channel = connection
                .create_channel()
                .await
                .context("Failed to create AMQP channel")?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .context("Failed to enable publisher confirms")?;

            let queues = [events::ORDER_CREATED, events::ORDER_STATUS_CHANGED]
                .into_iter()
                .chain(consumers.iter().map(|(queue, _)| *queue));
            for queue in queues {
                declare_queue(&channel, queue).await?;
            }

            let shared = Arc::new(state.clone());
            for (queue, handler) in consumers {
                spawn_consumer(name, &channel, queue, *handler, shared.clone()).await?;
            }

            tokio::spawn(outbox::run_relay(
                pool,
                channel,
                config.amqp.outbox_poll_interval,
            ));
            amqp_connection = Some(connection);

            state
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart and payment callbacks are not consumed");
            let store = Arc::new(MemoryStore::new());
            tokio::spawn(crate::store::memory::run_log_relay(
                store.clone(),
                config.amqp.outbox_poll_interval,
            ));
            AppState::new(
                store.clone(),
                store,
                collaborators,
                config.pricing.clone(),
                &config.checkout,
            )
        }
    };

    let app = app.layer(TraceLayer::new_for_http()).with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("{} listening on {}", name, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(connection) = amqp_connection {
        if let Err(err) = connection.close(200, "Shutting down".into()).await {
            warn!("Failed to close AMQP connection: {}", err);
        }
    }
    info!("{} stopped", name);
    Ok(())
}

async fn declare_queue(channel: &Channel, queue: &str) -> Result<()> {
    channel
        .queue_declare(
            queue.into(),
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue {queue}"))?;
    Ok(())
}

async fn spawn_consumer(
    name: &str,
    channel: &Channel,
    queue: &str,
    handler: ConsumerFn,
    state: Arc<AppState>,
) -> Result<()> {
    let consumer_tag = format!("{name}.{queue}");
    let mut consumer = channel
        .basic_consume(
            queue.into(),
            consumer_tag.as_str().into(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to consume from {queue}"))?;
    info!("Consuming from {}", queue);

    let queue = queue.to_string();
    tokio::spawn(async move {
        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    if let Err(err) = handler(delivery, state.clone()).await {
                        error!("Failed to handle message from {}: {:?}", queue, err);
                    }
                }
                Err(err) => error!("Failed to receive message from {}: {:?}", queue, err),
            }
        }
        warn!("Consumer for {} stopped", queue);
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!("Failed to listen for SIGTERM: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
