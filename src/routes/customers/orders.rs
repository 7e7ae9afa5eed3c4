use anyhow::Result;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::core::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, CustomerId},
};
use crate::domain::order::{Order, OrderPlacementResult};
use crate::routes::orders::{OrderDetails, details};
use crate::services::checkout::PlaceOrder;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Customer order routes: checkout and read access to the caller's orders.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/customers/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_orders, place_order))
            .routes(utoipa_axum::routes!(get_order))
            .route_layer(axum::middleware::from_fn(
                middleware::customers_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct PlaceOrderReq {
    cart_id: Uuid,
    delivery_address: String,
    special_instructions: Option<String>,
    /// Together with `cancel_redirect`, requests a hosted payment page.
    success_redirect: Option<String>,
    cancel_redirect: Option<String>,
}

/// Place an order from a cart.
///
/// Send an `Idempotency-Key` header to make retries safe: a repeated key
/// returns the first result instead of placing a second order.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    security(("customerId" = [])),
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Client-chosen key deduplicating retries")
    ),
    request_body = PlaceOrderReq,
    responses(
        (status = 201, description = "Order placed; `checkout_url` is set for hosted payment and `error` when payment setup failed", body = StdResponse<OrderPlacementResult, String>),
        (status = 409, description = "Restaurant cannot receive payments, or the same key is still being processed", body = StdResponse<String, String>),
        (status = 422, description = "Cart is empty or missing", body = StdResponse<String, String>)
    )
)]
async fn place_order(
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
    headers: HeaderMap,
    Json(req): Json<PlaceOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| AppError::Validation("Idempotency key must be ASCII".into()))
        })
        .transpose()?;

    let result = state
        .checkout
        .place_order(
            customer_id,
            PlaceOrder {
                cart_id: req.cart_id,
                delivery_address: req.delivery_address,
                special_instructions: req.special_instructions,
                idempotency_key,
                success_redirect: req.success_redirect,
                cancel_redirect: req.cancel_redirect,
            },
        )
        .await?;

    let message = if result.error.is_some() {
        "Order placed, but payment setup failed"
    } else {
        "Place order successfully"
    };
    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(result),
            message: Some(message),
        },
    ))
}

/// Fetch all orders of the authenticated customer, most recent first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    security(("customerId" = [])),
    responses(
        (status = 200, description = "List my orders", body = StdResponse<Vec<Order>, String>)
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
) -> Result<impl IntoResponse, AppError> {
    let orders = state.orders.list_for_customer(customer_id).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get my orders successfully"),
    })
}

/// Fetch one of the customer's orders with its status history.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    security(("customerId" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderDetails, String>),
        (status = 404, description = "No such order for this customer", body = StdResponse<String, String>)
    )
)]
async fn get_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .find_order(id)
        .await?
        .filter(|order| order.customer_id == customer_id)
        .ok_or_else(|| AppError::NotFound(format!("Order {id}")))?;

    Ok(StdResponse {
        data: Some(details(&state, order).await?),
        message: Some("Get order successfully"),
    })
}
