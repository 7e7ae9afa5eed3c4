use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::instrument;
use uuid::Uuid;

use crate::core::app_error::AppError;
use crate::services::carts::{Catalog, MenuItem};

/// Menu lookups against the catalog service.
#[derive(Clone)]
pub struct HttpCatalog {
    client: Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[instrument(skip(self))]
    async fn menu_item(&self, menu_item_id: Uuid) -> Result<Option<MenuItem>, AppError> {
        let response = self
            .client
            .get(format!("{}/menu-items/{}", self.base_url, menu_item_id))
            .send()
            .await
            .map_err(|_| AppError::UpstreamUnavailable("CatalogService".into()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable("CatalogService".into()));
        }

        let menu_item: MenuItem = response
            .json()
            .await
            .context("Failed to parse JSON")?;
        Ok(Some(menu_item))
    }
}
