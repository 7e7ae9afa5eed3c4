use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::core::app_error::AppError;
use crate::domain::{
    cart::{Cart, CartItemKind, CartView, NewCartItem},
    pricing::{self, PricingPolicy},
};
use crate::store::CartRepository;

/// A menu item as the catalog currently prices it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MenuItem {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    #[serde(default = "available_by_default")]
    pub available: bool,
}

fn available_by_default() -> bool {
    true
}

/// Read-only menu lookup.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn menu_item(&self, menu_item_id: Uuid) -> Result<Option<MenuItem>, AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddItem {
    Catalog {
        menu_item_id: Uuid,
        options: Vec<String>,
        quantity: i32,
    },
    Custom {
        restaurant_id: Uuid,
        name: String,
        unit_price: i64,
        quantity: i32,
    },
}

#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    catalog: Arc<dyn Catalog>,
    pricing: PricingPolicy,
}

fn ensure_owner(cart: &Cart, customer_id: Uuid) -> Result<(), AppError> {
    if cart.customer_id == customer_id {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Cart {}", cart.id)))
    }
}

impl CartService {
    pub fn new(
        carts: Arc<dyn CartRepository>,
        catalog: Arc<dyn Catalog>,
        pricing: PricingPolicy,
    ) -> Self {
        Self {
            carts,
            catalog,
            pricing,
        }
    }

    pub fn view(&self, cart: Cart) -> CartView {
        let pricing = pricing::compute(&cart.items, &self.pricing);
        CartView { cart, pricing }
    }

    /// Returns the customer's active cart, creating or rebinding it.
    ///
    /// A non-empty cart for another restaurant is only replaced when
    /// `replace` is set; otherwise this fails with `InvalidState`.
    #[instrument(skip(self))]
    pub async fn create_cart(
        &self,
        customer_id: Uuid,
        restaurant_id: Option<Uuid>,
        replace: bool,
    ) -> Result<CartView, AppError> {
        let cart = self
            .carts
            .upsert_for_customer(
                customer_id,
                Box::new(move |cart| match restaurant_id {
                    Some(restaurant_id) => cart.bind(restaurant_id, replace),
                    None => Ok(()),
                }),
            )
            .await?;

        debug!("Cart {} is active for customer {}", cart.id, customer_id);
        Ok(self.view(cart))
    }

    /// Adds an item to `cart_id`, or to the customer's active cart (created on
    /// demand) when no cart id is given.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        cart_id: Option<Uuid>,
        item: AddItem,
    ) -> Result<CartView, AppError> {
        let item = self.price(item).await?;

        let cart = match cart_id {
            Some(cart_id) => {
                self.carts
                    .update(
                        cart_id,
                        Box::new(move |cart| {
                            ensure_owner(cart, customer_id)?;
                            cart.add_item(item).map(|_| ())
                        }),
                    )
                    .await?
            }
            None => {
                self.carts
                    .upsert_for_customer(
                        customer_id,
                        Box::new(move |cart| cart.add_item(item).map(|_| ())),
                    )
                    .await?
            }
        };

        Ok(self.view(cart))
    }

    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        customer_id: Uuid,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, AppError> {
        let cart = self
            .carts
            .update(
                cart_id,
                Box::new(move |cart| {
                    ensure_owner(cart, customer_id)?;
                    cart.update_quantity(item_id, quantity)
                }),
            )
            .await?;

        Ok(self.view(cart))
    }

    /// Removes a line. An absent cart or line is treated as already removed.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<CartView>, AppError> {
        let result = self
            .carts
            .update(
                cart_id,
                Box::new(move |cart| {
                    ensure_owner(cart, customer_id)?;
                    if !cart.remove_item(item_id)? {
                        debug!("Cart item {} was already removed", item_id);
                    }
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(cart) => Ok(Some(self.view(cart))),
            Err(AppError::NotFound(what)) => {
                debug!("{} not found while removing an item; nothing to do", what);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Empties the cart. Clearing an empty or absent cart succeeds.
    #[instrument(skip(self))]
    pub async fn clear_cart(
        &self,
        customer_id: Uuid,
        cart_id: Uuid,
    ) -> Result<Option<CartView>, AppError> {
        let result = self
            .carts
            .update(
                cart_id,
                Box::new(move |cart| {
                    ensure_owner(cart, customer_id)?;
                    if !cart.clear()? {
                        debug!("Cart {} was already empty", cart.id);
                    }
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(cart) => Ok(Some(self.view(cart))),
            Err(AppError::NotFound(what)) => {
                debug!("{} not found while clearing; nothing to do", what);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// The customer's active cart, or `None` when there is none.
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<Option<CartView>, AppError> {
        let cart = self.carts.find_by_customer(customer_id).await?;
        Ok(cart.map(|cart| self.view(cart)))
    }

    /// Turns a request into a priced line, snapshotting catalog prices now.
    async fn price(&self, item: AddItem) -> Result<NewCartItem, AppError> {
        match item {
            AddItem::Catalog {
                menu_item_id,
                options,
                quantity,
            } => {
                let menu_item = self
                    .catalog
                    .menu_item(menu_item_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Menu item {menu_item_id}")))?;
                if !menu_item.available {
                    return Err(AppError::Validation(format!(
                        "{} is not available right now",
                        menu_item.name
                    )));
                }

                Ok(NewCartItem {
                    restaurant_id: menu_item.restaurant_id,
                    kind: CartItemKind::Catalog {
                        menu_item_id,
                        options,
                    },
                    name: menu_item.name,
                    unit_price: menu_item.unit_price,
                    quantity,
                })
            }
            AddItem::Custom {
                restaurant_id,
                name,
                unit_price,
                quantity,
            } => Ok(NewCartItem {
                restaurant_id,
                kind: CartItemKind::Custom,
                name,
                unit_price,
                quantity,
            }),
        }
    }
}
