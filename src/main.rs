use anyhow::Result;
use axum::Router;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use marketplace_orderservice::{
    consumers,
    core::{
        bootstrap::{self, bootstrap},
        config::{self, StorageBackend},
        db, swagger,
    },
    events, routes,
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let routes = routes::routes_with_openapi();

    let mut openapi = routes.get_openapi().clone();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Marketplace OrderService API")
        .version("1.0.0")
        .build();
    let swagger_ui = swagger::create_swagger_ui(openapi);

    let app = Router::new().merge(routes).merge(swagger_ui);

    let config = config::load()?;
    if config.storage == StorageBackend::Postgres {
        tracing::info!("Running migrations...");
        let migrations_count =
            db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
        tracing::info!("Run {} new migrations successfully", migrations_count);
    }

    tracing::info!("Bootstrapping...");
    bootstrap(
        "OrderService",
        config,
        app,
        &[
            (
                events::CHECKOUT_COMPLETED,
                consumers::orders::checkout_completed,
            ),
            (events::CHECKOUT_FAILED, consumers::orders::checkout_failed),
        ],
    )
    .await?;
    Ok(())
}
