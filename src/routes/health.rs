use axum::response::IntoResponse;
use utoipa_axum::router::OpenApiRouter;

use crate::core::{app_error::StdResponse, app_state::AppState};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(utoipa_axum::routes!(healthcheck))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tags = ["Health"],
    responses(
        (status = 200, description = "Service is up", body = StdResponse<String, String>)
    )
)]
async fn healthcheck() -> impl IntoResponse {
    StdResponse::<String, &str> {
        data: None,
        message: Some("OK"),
    }
}
