use utoipa_axum::router::OpenApiRouter;

use crate::core::app_state::AppState;

pub mod customers;
pub mod health;
pub mod orders;
pub mod restaurants;

/// Every HTTP route of the service, with its OpenAPI description.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    health::routes_with_openapi()
        .merge(orders::routes_with_openapi())
        .merge(customers::carts::routes_with_openapi())
        .merge(customers::orders::routes_with_openapi())
        .merge(restaurants::orders::routes_with_openapi())
}
