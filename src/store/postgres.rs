use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::core::{
    app_error::AppError,
    db::DbPool,
    outbox::{self, OutboxMessage},
};
use crate::domain::{
    cart::Cart,
    order::{Order, OrderPlacementResult, OrderStatus, StatusChange, StatusHistoryEntry},
};
use crate::models::{
    CartEntity, CartItemEntity, CheckoutPlacementEntity, CreateCartEntity, CreateCartItemEntity,
    CreateCheckoutPlacementEntity, CreateOrderEntity, CreateOrderItemEntity,
    CreateOrderStatusHistoryEntity, CreatePaymentEntity, OrderEntity, OrderItemEntity,
    OrderStatusHistoryEntity, PaymentEntity, UpdateCartEntity,
};
use crate::schema::{
    cart_items, carts, checkout_placements, order_items, order_status_history, orders, payments,
};
use crate::store::{
    CartMutation, CartRepository, CheckoutPlacement, NewPayment, NewPlacement, OrderRepository,
    Payment, PaymentStatus, PlacementOutcome, PlacementState, StatusUpdateOutcome,
};

/// PostgreSQL backend. Cart rows are locked with `SELECT ... FOR UPDATE` for
/// the duration of a mutation; idempotency keys are protected by the
/// `checkout_placements` primary key.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

macro_rules! connection {
    ($pool:expr) => {
        &mut $pool
            .get()
            .await
            .context("Failed to obtain a DB connection pool")?
    };
}

async fn load_cart(conn: &mut AsyncPgConnection, cart: CartEntity) -> Result<Cart, AppError> {
    let items: Vec<CartItemEntity> = cart_items::table
        .filter(cart_items::cart_id.eq(cart.id))
        .select(CartItemEntity::as_select())
        .order_by(cart_items::position.asc())
        .get_results(conn)
        .await
        .context("Failed to get cart items")?;

    cart.into_domain(items)
}

/// Writes `after` over `before`: drops removed lines, upserts the rest.
async fn persist_cart(
    conn: &mut AsyncPgConnection,
    before: &Cart,
    after: &Cart,
) -> Result<(), AppError> {
    if before.version == after.version {
        return Ok(());
    }

    let kept: Vec<Uuid> = after.items.iter().map(|item| item.id).collect();
    diesel::delete(
        cart_items::table
            .filter(cart_items::cart_id.eq(after.id))
            .filter(cart_items::id.ne_all(&kept)),
    )
    .execute(conn)
    .await
    .context("Failed to delete cart items")?;

    for (position, item) in after.items.iter().enumerate() {
        let row = CreateCartItemEntity::from_domain(after.id, position, item)?;
        diesel::insert_into(cart_items::table)
            .values(&row)
            .on_conflict(cart_items::id)
            .do_update()
            .set((
                cart_items::position.eq(row.position),
                cart_items::quantity.eq(row.quantity),
                cart_items::updated_at.eq(diesel::dsl::now),
            ))
            .execute(conn)
            .await
            .context("Failed to upsert cart item")?;
    }

    diesel::update(carts::table.find(after.id))
        .set(UpdateCartEntity {
            restaurant_id: after.restaurant_id,
            pending_order_id: after.pending_order_id,
            version: after.version,
            updated_at: after.updated_at,
        })
        .execute(conn)
        .await
        .context("Failed to update cart")?;

    Ok(())
}

async fn mutate_locked(
    conn: &mut AsyncPgConnection,
    entity: CartEntity,
    mutation: CartMutation,
) -> Result<Cart, AppError> {
    let before = load_cart(conn, entity).await?;
    let mut after = before.clone();
    mutation(&mut after)?;
    persist_cart(conn, &before, &after).await?;
    Ok(after)
}

async fn load_orders(
    conn: &mut AsyncPgConnection,
    entities: Vec<OrderEntity>,
) -> Result<Vec<Order>, AppError> {
    let order_ids: Vec<Uuid> = entities.iter().map(|order| order.id).collect();
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .select(OrderItemEntity::as_select())
        .order_by(order_items::position.asc())
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let mut group: HashMap<Uuid, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }

    entities
        .into_iter()
        .map(|order| {
            let items = group.remove(&order.id).unwrap_or_default();
            order.into_domain(items)
        })
        .collect()
}

async fn load_order(conn: &mut AsyncPgConnection, entity: OrderEntity) -> Result<Order, AppError> {
    let mut orders = load_orders(conn, vec![entity]).await?;
    orders
        .pop()
        .ok_or_else(|| AppError::Other(anyhow::anyhow!("Order vanished while loading")))
}

#[async_trait]
impl CartRepository for PgStore {
    async fn find(&self, cart_id: Uuid) -> Result<Option<Cart>, AppError> {
        let conn = connection!(self.pool);

        let cart: Option<CartEntity> = carts::table
            .find(cart_id)
            .select(CartEntity::as_select())
            .first(conn)
            .await
            .optional()?;

        match cart {
            Some(cart) => Ok(Some(load_cart(conn, cart).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_customer(&self, customer_id: Uuid) -> Result<Option<Cart>, AppError> {
        let conn = connection!(self.pool);

        let cart: Option<CartEntity> = carts::table
            .filter(carts::customer_id.eq(customer_id))
            .select(CartEntity::as_select())
            .first(conn)
            .await
            .optional()?;

        match cart {
            Some(cart) => Ok(Some(load_cart(conn, cart).await?)),
            None => Ok(None),
        }
    }

    async fn upsert_for_customer(
        &self,
        customer_id: Uuid,
        mutation: CartMutation,
    ) -> Result<Cart, AppError> {
        let conn = connection!(self.pool);

        conn.transaction(move |conn| {
            Box::pin(async move {
                let fresh = Cart::new(customer_id, None);
                diesel::insert_into(carts::table)
                    .values(CreateCartEntity {
                        id: fresh.id,
                        customer_id,
                        restaurant_id: None,
                        pending_order_id: None,
                        version: fresh.version,
                        created_at: fresh.created_at,
                        updated_at: fresh.updated_at,
                    })
                    .on_conflict(carts::customer_id)
                    .do_nothing()
                    .execute(conn)
                    .await
                    .context("Failed to create cart")?;

                let entity: CartEntity = carts::table
                    .filter(carts::customer_id.eq(customer_id))
                    .select(CartEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                mutate_locked(conn, entity, mutation).await
            })
        })
        .await
    }

    async fn update(&self, cart_id: Uuid, mutation: CartMutation) -> Result<Cart, AppError> {
        let conn = connection!(self.pool);

        conn.transaction(move |conn| {
            Box::pin(async move {
                let entity: CartEntity = carts::table
                    .find(cart_id)
                    .select(CartEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::NotFound(format!("Cart {cart_id}")))?;

                mutate_locked(conn, entity, mutation).await
            })
        })
        .await
    }

    async fn delete(&self, cart_id: Uuid) -> Result<bool, AppError> {
        let conn = connection!(self.pool);

        let deleted = diesel::delete(carts::table.find(cart_id))
            .execute(conn)
            .await
            .context("Failed to delete cart")?;

        Ok(deleted > 0)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn find_placement(
        &self,
        customer_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<CheckoutPlacement>, AppError> {
        let conn = connection!(self.pool);

        let placement: Option<CheckoutPlacementEntity> = checkout_placements::table
            .find((customer_id, idempotency_key))
            .select(CheckoutPlacementEntity::as_select())
            .first(conn)
            .await
            .optional()?;

        placement.map(CheckoutPlacementEntity::into_domain).transpose()
    }

    async fn insert_order(&self, placement: NewPlacement) -> Result<PlacementOutcome, AppError> {
        let conn = connection!(self.pool);

        conn.transaction(move |conn| {
            Box::pin(async move {
                let NewPlacement {
                    idempotency_key,
                    order,
                    initial_entry,
                    cart_version,
                    consume_cart,
                    events,
                } = placement;

                // Concurrent placements from the same cart queue up here.
                let cart: Option<CartEntity> = carts::table
                    .find(order.cart_id)
                    .select(CartEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                if let Some(key) = &idempotency_key {
                    let existing: Option<CheckoutPlacementEntity> = checkout_placements::table
                        .find((order.customer_id, key.as_str()))
                        .select(CheckoutPlacementEntity::as_select())
                        .first(conn)
                        .await
                        .optional()?;
                    if let Some(existing) = existing {
                        return Ok(PlacementOutcome::Existing(existing.into_domain()?));
                    }
                }

                match cart {
                    Some(cart) if cart.pending_order_id.is_some() => {
                        return Err(AppError::Conflict(format!(
                            "Cart {} is awaiting payment for another order",
                            cart.id
                        )));
                    }
                    Some(cart) if cart.version == cart_version => {}
                    Some(_) => return Err(AppError::Conflict("Cart changed during checkout".into())),
                    None => {
                        return Err(AppError::Conflict(
                            "Cart was checked out concurrently".into(),
                        ));
                    }
                }

                diesel::insert_into(orders::table)
                    .values(CreateOrderEntity::from_domain(&order))
                    .execute(conn)
                    .await
                    .context("Failed to create order")?;

                let items = order
                    .items
                    .iter()
                    .enumerate()
                    .map(|(position, item)| CreateOrderItemEntity::from_domain(order.id, position, item))
                    .collect::<Result<Vec<_>, AppError>>()?;
                diesel::insert_into(order_items::table)
                    .values(items)
                    .execute(conn)
                    .await
                    .context("Failed to create order items")?;

                diesel::insert_into(order_status_history::table)
                    .values(CreateOrderStatusHistoryEntity {
                        order_id: order.id,
                        status: initial_entry.status.as_str().to_string(),
                        notes: initial_entry.notes,
                        actor: initial_entry.actor,
                        created_at: initial_entry.created_at,
                    })
                    .execute(conn)
                    .await
                    .context("Failed to create order history")?;

                if let Some(key) = idempotency_key {
                    let state = if consume_cart {
                        PlacementState::Completed
                    } else {
                        PlacementState::InProgress
                    };
                    diesel::insert_into(checkout_placements::table)
                        .values(CreateCheckoutPlacementEntity {
                            customer_id: order.customer_id,
                            idempotency_key: key,
                            order_id: order.id,
                            state: state.as_str().to_string(),
                        })
                        .execute(conn)
                        .await?;
                }

                for event in events {
                    outbox::publish(conn, event).await?;
                }

                if consume_cart {
                    diesel::delete(carts::table.find(order.cart_id))
                        .execute(conn)
                        .await
                        .context("Failed to delete checked out cart")?;
                } else {
                    diesel::update(carts::table.find(order.cart_id))
                        .set((
                            carts::pending_order_id.eq(Some(order.id)),
                            carts::version.eq(carts::version + 1),
                            carts::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)
                        .await
                        .context("Failed to hold cart for payment")?;
                }

                Ok::<PlacementOutcome, AppError>(PlacementOutcome::Created(order))
            })
        })
        .await
    }

    async fn complete_placement(
        &self,
        order: &Order,
        idempotency_key: Option<&str>,
        result: &OrderPlacementResult,
        payment: Option<NewPayment>,
    ) -> Result<(), AppError> {
        let conn = connection!(self.pool);
        let (order_id, customer_id, cart_id) = (order.id, order.customer_id, order.cart_id);
        let idempotency_key = idempotency_key.map(str::to_string);
        let result = result.clone();

        conn.transaction(move |conn| {
            Box::pin(async move {
                if payment.is_none() {
                    // No session to wait for; give the cart back.
                    diesel::update(
                        carts::table
                            .find(cart_id)
                            .filter(carts::pending_order_id.eq(order_id)),
                    )
                    .set((
                        carts::pending_order_id.eq(None::<Uuid>),
                        carts::version.eq(carts::version + 1),
                        carts::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await
                    .context("Failed to release cart")?;
                }

                if let Some(payment) = payment {
                    diesel::insert_into(payments::table)
                        .values(CreatePaymentEntity {
                            id: Uuid::new_v4(),
                            order_id: payment.order_id,
                            amount: payment.amount,
                            provider: payment.provider,
                            provider_ref: payment.provider_ref,
                            status: PaymentStatus::Pending.as_str().to_string(),
                        })
                        .execute(conn)
                        .await
                        .context("Failed to create payment")?;
                }

                if let Some(key) = idempotency_key {
                    diesel::update(checkout_placements::table.find((customer_id, key)))
                        .set((
                            checkout_placements::checkout_url.eq(result.checkout_url),
                            checkout_placements::error.eq(result.error),
                            checkout_placements::state.eq(PlacementState::Completed.as_str()),
                            checkout_placements::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)
                        .await
                        .context("Failed to complete checkout placement")?;
                }

                Ok::<(), AppError>(())
            })
        })
        .await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let conn = connection!(self.pool);

        let order: Option<OrderEntity> = orders::table
            .find(order_id)
            .select(OrderEntity::as_select())
            .first(conn)
            .await
            .optional()?;

        match order {
            Some(order) => Ok(Some(load_order(conn, order).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, AppError> {
        let conn = connection!(self.pool);

        let entities: Vec<OrderEntity> = orders::table
            .filter(orders::customer_id.eq(customer_id))
            .select(OrderEntity::as_select())
            .order_by(orders::updated_at.desc())
            .get_results(conn)
            .await
            .context("Failed to get customer orders")?;

        load_orders(conn, entities).await
    }

    async fn list_for_restaurant(&self, restaurant_id: Uuid) -> Result<Vec<Order>, AppError> {
        let conn = connection!(self.pool);

        let entities: Vec<OrderEntity> = orders::table
            .filter(orders::restaurant_id.eq(restaurant_id))
            .select(OrderEntity::as_select())
            .order_by(orders::updated_at.desc())
            .get_results(conn)
            .await
            .context("Failed to get restaurant orders")?;

        load_orders(conn, entities).await
    }

    async fn history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, AppError> {
        let conn = connection!(self.pool);

        let entries: Vec<OrderStatusHistoryEntity> = order_status_history::table
            .filter(order_status_history::order_id.eq(order_id))
            .select(OrderStatusHistoryEntity::as_select())
            .order_by(order_status_history::id.asc())
            .get_results(conn)
            .await
            .context("Failed to get order history")?;

        if entries.is_empty() {
            return Err(AppError::NotFound(format!("Order {order_id}")));
        }

        entries
            .into_iter()
            .map(OrderStatusHistoryEntity::into_domain)
            .collect()
    }

    async fn compare_and_set_status(
        &self,
        change: &StatusChange,
        event: OutboxMessage,
    ) -> Result<StatusUpdateOutcome, AppError> {
        let conn = connection!(self.pool);
        let change = change.clone();

        conn.transaction(move |conn| {
            Box::pin(async move {
                let completed_at = (change.to == OrderStatus::Completed).then_some(change.at);

                let updated: Option<OrderEntity> = diesel::update(
                    orders::table
                        .find(change.order_id)
                        .filter(orders::status.eq(change.from.as_str())),
                )
                .set((
                    orders::status.eq(change.to.as_str()),
                    orders::updated_at.eq(change.at),
                    orders::completed_at.eq(completed_at),
                ))
                .returning(OrderEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                let Some(updated) = updated else {
                    let current: Option<String> = orders::table
                        .find(change.order_id)
                        .select(orders::status)
                        .first(conn)
                        .await
                        .optional()?;
                    return match current {
                        Some(current) => Ok(StatusUpdateOutcome::Stale {
                            current: current.parse().map_err(anyhow::Error::msg)?,
                        }),
                        None => Err(AppError::NotFound(format!("Order {}", change.order_id))),
                    };
                };

                diesel::insert_into(order_status_history::table)
                    .values(CreateOrderStatusHistoryEntity {
                        order_id: change.order_id,
                        status: change.to.as_str().to_string(),
                        notes: change.notes.clone(),
                        actor: change.actor.label(),
                        created_at: change.at,
                    })
                    .execute(conn)
                    .await
                    .context("Failed to append order history")?;

                outbox::publish(conn, event).await?;

                Ok::<StatusUpdateOutcome, AppError>(StatusUpdateOutcome::Applied(
                    load_order(conn, updated).await?,
                ))
            })
        })
        .await
    }

    async fn payment_for(&self, order_id: Uuid) -> Result<Option<Payment>, AppError> {
        let conn = connection!(self.pool);

        let payment: Option<PaymentEntity> = payments::table
            .filter(payments::order_id.eq(order_id))
            .select(PaymentEntity::as_select())
            .order_by(payments::created_at.desc())
            .first(conn)
            .await
            .optional()?;

        payment.map(PaymentEntity::into_domain).transpose()
    }

    async fn settle_payment(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<Option<Payment>, AppError> {
        let conn = connection!(self.pool);

        let payment: Option<PaymentEntity> = diesel::update(
            payments::table
                .filter(payments::order_id.eq(order_id))
                .filter(payments::status.eq(PaymentStatus::Pending.as_str())),
        )
        .set((
            payments::status.eq(status.as_str()),
            payments::failure_reason.eq(failure_reason),
            payments::updated_at.eq(Utc::now()),
        ))
        .returning(PaymentEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?;

        payment.map(PaymentEntity::into_domain).transpose()
    }
}
