use anyhow::Result;
use axum::response::IntoResponse;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::core::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
};
use crate::domain::order::{Order, OrderStatus, StatusHistoryEntry};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new().routes(utoipa_axum::routes!(get_status_transitions)),
    )
}

/// An order together with its status history, oldest entry first.
#[derive(Serialize, ToSchema)]
pub struct OrderDetails {
    pub order: Order,
    pub history: Vec<StatusHistoryEntry>,
}

/// Loads history for an order the caller is already allowed to see.
pub(crate) async fn details(state: &AppState, order: Order) -> Result<OrderDetails, AppError> {
    let history = state.orders.history(order.id).await?;
    Ok(OrderDetails { order, history })
}

#[derive(Serialize, ToSchema)]
struct StatusTransitions {
    status: OrderStatus,
    allowed: Vec<OrderStatus>,
    terminal: bool,
}

/// The order status transition table, for clients to pre-validate against.
#[utoipa::path(
    get,
    path = "/status-transitions",
    tags = ["Orders"],
    responses(
        (status = 200, description = "Get status transitions successfully", body = StdResponse<Vec<StatusTransitions>, String>)
    )
)]
async fn get_status_transitions() -> Result<impl IntoResponse, AppError> {
    let transitions: Vec<StatusTransitions> = OrderStatus::ALL
        .into_iter()
        .map(|status| StatusTransitions {
            status,
            allowed: status.allowed_transitions().to_vec(),
            terminal: status.is_terminal(),
        })
        .collect();

    Ok(StdResponse {
        data: Some(transitions),
        message: Some("Get status transitions successfully"),
    })
}
