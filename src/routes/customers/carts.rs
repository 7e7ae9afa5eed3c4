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
    middleware::{self, CustomerId},
};
use crate::domain::cart::CartView;
use crate::services::carts::AddItem;

/// Customer cart routes, all scoped to the caller's own cart.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/customers/carts",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_cart, create_cart))
            .routes(utoipa_axum::routes!(add_item_to_my_cart))
            .routes(utoipa_axum::routes!(add_item, clear_cart))
            .routes(utoipa_axum::routes!(update_item_quantity, remove_item))
            .route_layer(axum::middleware::from_fn(
                middleware::customers_authorization,
            )),
    )
}

fn one() -> i32 {
    1
}

#[derive(Deserialize, ToSchema)]
struct CreateCartReq {
    restaurant_id: Option<Uuid>,
    /// Empty a cart that holds items from another restaurant.
    #[serde(default)]
    replace: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AddItemReq {
    Catalog {
        menu_item_id: Uuid,
        #[serde(default)]
        options: Vec<String>,
        #[serde(default = "one")]
        quantity: i32,
    },
    Custom {
        restaurant_id: Uuid,
        name: String,
        unit_price: i64,
        #[serde(default = "one")]
        quantity: i32,
    },
}

impl From<AddItemReq> for AddItem {
    fn from(req: AddItemReq) -> Self {
        match req {
            AddItemReq::Catalog {
                menu_item_id,
                options,
                quantity,
            } => AddItem::Catalog {
                menu_item_id,
                options,
                quantity,
            },
            AddItemReq::Custom {
                restaurant_id,
                name,
                unit_price,
                quantity,
            } => AddItem::Custom {
                restaurant_id,
                name,
                unit_price,
                quantity,
            },
        }
    }
}

#[derive(Deserialize, ToSchema)]
struct UpdateQuantityReq {
    /// `0` removes the item.
    quantity: i32,
}

/// Fetch the authenticated customer's active cart with its pricing.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Carts"],
    security(("customerId" = [])),
    responses(
        (status = 200, description = "Get cart successfully; `data` is null when there is no active cart", body = StdResponse<CartView, String>)
    )
)]
async fn get_my_cart(
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state.carts.get_cart(customer_id).await?;
    let message = if cart.is_some() {
        "Get cart successfully"
    } else {
        "No active cart"
    };

    Ok(StdResponse {
        data: cart,
        message: Some(message),
    })
}

/// Create the customer's active cart, or return the existing one.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Carts"],
    security(("customerId" = [])),
    request_body = CreateCartReq,
    responses(
        (status = 200, description = "Cart is active", body = StdResponse<CartView, String>),
        (status = 409, description = "Cart holds items from another restaurant", body = StdResponse<String, String>)
    )
)]
async fn create_cart(
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
    Json(req): Json<CreateCartReq>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state
        .carts
        .create_cart(customer_id, req.restaurant_id, req.replace)
        .await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Create cart successfully"),
    })
}

/// Add an item to the customer's active cart, creating it if needed.
#[utoipa::path(
    post,
    path = "/items",
    tags = ["Carts"],
    security(("customerId" = [])),
    request_body = AddItemReq,
    responses(
        (status = 200, description = "Item added", body = StdResponse<CartView, String>)
    )
)]
async fn add_item_to_my_cart(
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
    Json(req): Json<AddItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state
        .carts
        .add_item(customer_id, None, req.into())
        .await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Add item successfully"),
    })
}

/// Add an item to a specific cart of the customer.
#[utoipa::path(
    post,
    path = "/{id}/items",
    tags = ["Carts"],
    security(("customerId" = [])),
    params(
        ("id" = Uuid, Path, description = "Cart ID")
    ),
    request_body = AddItemReq,
    responses(
        (status = 200, description = "Item added", body = StdResponse<CartView, String>)
    )
)]
async fn add_item(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
    Json(req): Json<AddItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state
        .carts
        .add_item(customer_id, Some(id), req.into())
        .await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Add item successfully"),
    })
}

/// Empty a cart. Clearing an absent cart succeeds.
#[utoipa::path(
    delete,
    path = "/{id}/items",
    tags = ["Carts"],
    security(("customerId" = [])),
    params(
        ("id" = Uuid, Path, description = "Cart ID")
    ),
    responses(
        (status = 200, description = "Cart cleared", body = StdResponse<CartView, String>)
    )
)]
async fn clear_cart(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state.carts.clear_cart(customer_id, id).await?;

    Ok(StdResponse {
        data: cart,
        message: Some("Clear cart successfully"),
    })
}

/// Set an item's quantity; `0` removes it.
#[utoipa::path(
    patch,
    path = "/{id}/items/{item_id}",
    tags = ["Carts"],
    security(("customerId" = [])),
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID")
    ),
    request_body = UpdateQuantityReq,
    responses(
        (status = 200, description = "Quantity updated", body = StdResponse<CartView, String>),
        (status = 404, description = "Cart or item not found", body = StdResponse<String, String>)
    )
)]
async fn update_item_quantity(
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
    Json(req): Json<UpdateQuantityReq>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state
        .carts
        .update_quantity(customer_id, id, item_id, req.quantity)
        .await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Update item successfully"),
    })
}

/// Remove an item. Removing an absent item succeeds.
#[utoipa::path(
    delete,
    path = "/{id}/items/{item_id}",
    tags = ["Carts"],
    security(("customerId" = [])),
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID")
    ),
    responses(
        (status = 200, description = "Item removed", body = StdResponse<CartView, String>)
    )
)]
async fn remove_item(
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    Extension(CustomerId(customer_id)): Extension<CustomerId>,
) -> Result<impl IntoResponse, AppError> {
    let cart = state.carts.remove_item(customer_id, id, item_id).await?;

    Ok(StdResponse {
        data: cart,
        message: Some("Remove item successfully"),
    })
}
