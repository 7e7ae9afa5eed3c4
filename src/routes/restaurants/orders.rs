use anyhow::Result;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::core::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware::{self, RestaurantId},
};
use crate::domain::order::{Actor, Order, OrderStatus};
use crate::routes::orders::{OrderDetails, details};

/// Routes for restaurant operators working through their incoming orders.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/restaurants/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_restaurant_orders))
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(update_order_status))
            .route_layer(axum::middleware::from_fn(
                middleware::operators_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct UpdateStatusReq {
    status: OrderStatus,
    notes: Option<String>,
}

/// Fetch all orders placed with the operator's restaurant.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Restaurant orders"],
    security(("restaurantId" = [])),
    responses(
        (status = 200, description = "List restaurant orders", body = StdResponse<Vec<Order>, String>)
    )
)]
async fn get_restaurant_orders(
    State(state): State<AppState>,
    Extension(RestaurantId(restaurant_id)): Extension<RestaurantId>,
) -> Result<impl IntoResponse, AppError> {
    let orders = state.orders.list_for_restaurant(restaurant_id).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get restaurant orders successfully"),
    })
}

/// Fetch one of the restaurant's orders with its status history.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Restaurant orders"],
    security(("restaurantId" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderDetails, String>),
        (status = 404, description = "No such order for this restaurant", body = StdResponse<String, String>)
    )
)]
async fn get_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(RestaurantId(restaurant_id)): Extension<RestaurantId>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .orders
        .find_order(id)
        .await?
        .filter(|order| order.restaurant_id == restaurant_id)
        .ok_or_else(|| AppError::NotFound(format!("Order {id}")))?;

    Ok(StdResponse {
        data: Some(details(&state, order).await?),
        message: Some("Get order successfully"),
    })
}

/// Move an order along its lifecycle.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Restaurant orders"],
    security(("restaurantId" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Status updated", body = StdResponse<Order, String>),
        (status = 403, description = "Order belongs to another restaurant", body = StdResponse<String, String>),
        (status = 409, description = "Transition not allowed or lost to a concurrent update", body = StdResponse<String, String>)
    )
)]
async fn update_order_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(RestaurantId(restaurant_id)): Extension<RestaurantId>,
    Json(req): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .status_machine
        .update_status(
            id,
            req.status,
            req.notes,
            Actor::RestaurantOperator { restaurant_id },
        )
        .await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Update order status successfully"),
    })
}
