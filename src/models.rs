use chrono::{DateTime, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use serde_json::Value;
use uuid::Uuid;

use crate::core::app_error::AppError;
use crate::domain::{
    cart::{Cart, CartItem, CartItemKind},
    order::{Order, OrderItem, OrderStatus, StatusHistoryEntry},
    pricing::PriceBreakdown,
};
use crate::store::{CheckoutPlacement, Payment};

// Carts

#[derive(Queryable, Selectable, Identifiable, Debug)]
#[diesel(table_name = crate::schema::carts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartEntity {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Option<Uuid>,
    pub pending_order_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::carts)]
pub struct CreateCartEntity {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Option<Uuid>,
    pub pending_order_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = crate::schema::carts)]
#[diesel(treat_none_as_null = true)]
pub struct UpdateCartEntity {
    pub restaurant_id: Option<Uuid>,
    pub pending_order_id: Option<Uuid>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::cart_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartItemEntity {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub position: i32,
    pub menu_item_id: Option<Uuid>,
    pub is_custom: bool,
    pub name: String,
    pub options: Value,
    pub unit_price: i64,
    pub quantity: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct CreateCartItemEntity {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub position: i32,
    pub menu_item_id: Option<Uuid>,
    pub is_custom: bool,
    pub name: String,
    pub options: Value,
    pub unit_price: i64,
    pub quantity: i32,
}

impl CartEntity {
    pub fn into_domain(self, items: Vec<CartItemEntity>) -> Result<Cart, AppError> {
        let items = items
            .into_iter()
            .map(|item| {
                Ok(CartItem {
                    id: item.id,
                    kind: item_kind(item.menu_item_id, item.is_custom, item.options)?,
                    name: item.name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Cart {
            id: self.id,
            customer_id: self.customer_id,
            restaurant_id: self.restaurant_id,
            items,
            pending_order_id: self.pending_order_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl CreateCartItemEntity {
    pub fn from_domain(cart_id: Uuid, position: usize, item: &CartItem) -> Result<Self, AppError> {
        let (menu_item_id, is_custom, options) = split_kind(&item.kind)?;
        Ok(Self {
            id: item.id,
            cart_id,
            position: position_of(position)?,
            menu_item_id,
            is_custom,
            name: item.name.clone(),
            options,
            unit_price: item.unit_price,
            quantity: item.quantity,
        })
    }
}

// Orders

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub cart_id: Uuid,
    pub status: String,
    pub subtotal: i64,
    pub tax: i64,
    pub delivery_fee: i64,
    pub service_fee: i64,
    pub total: i64,
    pub delivery_address: String,
    pub special_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderEntity {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub cart_id: Uuid,
    pub status: String,
    pub subtotal: i64,
    pub tax: i64,
    pub delivery_fee: i64,
    pub service_fee: i64,
    pub total: i64,
    pub delivery_address: String,
    pub special_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub position: i32,
    pub menu_item_id: Option<Uuid>,
    pub is_custom: bool,
    pub name: String,
    pub options: Value,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::order_items)]
pub struct CreateOrderItemEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub position: i32,
    pub menu_item_id: Option<Uuid>,
    pub is_custom: bool,
    pub name: String,
    pub options: Value,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::order_status_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderStatusHistoryEntity {
    pub id: i64,
    pub order_id: Uuid,
    pub status: String,
    pub notes: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::order_status_history)]
pub struct CreateOrderStatusHistoryEntity {
    pub order_id: Uuid,
    pub status: String,
    pub notes: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl CreateOrderEntity {
    pub fn from_domain(order: &Order) -> Self {
        Self {
            id: order.id,
            customer_id: order.customer_id,
            restaurant_id: order.restaurant_id,
            cart_id: order.cart_id,
            status: order.status.as_str().to_string(),
            subtotal: order.pricing.subtotal,
            tax: order.pricing.tax,
            delivery_fee: order.pricing.delivery_fee,
            service_fee: order.pricing.service_fee,
            total: order.pricing.total,
            delivery_address: order.delivery_address.clone(),
            special_instructions: order.special_instructions.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl CreateOrderItemEntity {
    pub fn from_domain(order_id: Uuid, position: usize, item: &OrderItem) -> Result<Self, AppError> {
        let (menu_item_id, is_custom, options) = split_kind(&item.kind)?;
        Ok(Self {
            id: item.id,
            order_id,
            position: position_of(position)?,
            menu_item_id,
            is_custom,
            name: item.name.clone(),
            options,
            unit_price: item.unit_price,
            quantity: item.quantity,
            line_total: item.line_total,
        })
    }
}

impl OrderEntity {
    pub fn into_domain(self, items: Vec<OrderItemEntity>) -> Result<Order, AppError> {
        let items = items
            .into_iter()
            .map(|item| {
                Ok(OrderItem {
                    id: item.id,
                    kind: item_kind(item.menu_item_id, item.is_custom, item.options)?,
                    name: item.name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    line_total: item.line_total,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Order {
            id: self.id,
            customer_id: self.customer_id,
            restaurant_id: self.restaurant_id,
            cart_id: self.cart_id,
            items,
            pricing: PriceBreakdown {
                subtotal: self.subtotal,
                tax: self.tax,
                delivery_fee: self.delivery_fee,
                service_fee: self.service_fee,
                total: self.total,
            },
            delivery_address: self.delivery_address,
            special_instructions: self.special_instructions,
            status: parse_status(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

impl OrderStatusHistoryEntity {
    pub fn into_domain(self) -> Result<StatusHistoryEntry, AppError> {
        Ok(StatusHistoryEntry {
            status: parse_status(&self.status)?,
            notes: self.notes,
            actor: self.actor,
            created_at: self.created_at,
        })
    }
}

// Checkout placements

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::checkout_placements)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CheckoutPlacementEntity {
    pub customer_id: Uuid,
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub checkout_url: Option<String>,
    pub error: Option<String>,
    pub state: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::checkout_placements)]
pub struct CreateCheckoutPlacementEntity {
    pub customer_id: Uuid,
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub state: String,
}

impl CheckoutPlacementEntity {
    pub fn into_domain(self) -> Result<CheckoutPlacement, AppError> {
        Ok(CheckoutPlacement {
            customer_id: self.customer_id,
            idempotency_key: self.idempotency_key,
            order_id: self.order_id,
            checkout_url: self.checkout_url,
            error: self.error,
            state: self.state.parse().map_err(anyhow::Error::msg)?,
        })
    }
}

// Payments

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub status: String,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreatePaymentEntity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub status: String,
}

impl PaymentEntity {
    pub fn into_domain(self) -> Result<Payment, AppError> {
        Ok(Payment {
            id: self.id,
            order_id: self.order_id,
            amount: self.amount,
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            provider: self.provider,
            provider_ref: self.provider_ref,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_status(status: &str) -> Result<OrderStatus, AppError> {
    status
        .parse()
        .map_err(|err: String| AppError::Other(anyhow::anyhow!(err)))
}

fn position_of(position: usize) -> Result<i32, AppError> {
    i32::try_from(position).map_err(|_| AppError::Validation("Too many lines".into()))
}

fn split_kind(kind: &CartItemKind) -> Result<(Option<Uuid>, bool, Value), AppError> {
    match kind {
        CartItemKind::Catalog {
            menu_item_id,
            options,
        } => Ok((
            Some(*menu_item_id),
            false,
            serde_json::to_value(options).map_err(anyhow::Error::from)?,
        )),
        CartItemKind::Custom => Ok((None, true, Value::Array(Vec::new()))),
    }
}

fn item_kind(
    menu_item_id: Option<Uuid>,
    is_custom: bool,
    options: Value,
) -> Result<CartItemKind, AppError> {
    match (is_custom, menu_item_id) {
        (true, _) => Ok(CartItemKind::Custom),
        (false, Some(menu_item_id)) => Ok(CartItemKind::Catalog {
            menu_item_id,
            options: serde_json::from_value(options).map_err(anyhow::Error::from)?,
        }),
        (false, None) => Err(AppError::Other(anyhow::anyhow!(
            "Catalog line without a menu item id"
        ))),
    }
}
