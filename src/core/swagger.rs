use utoipa::openapi::{
    OpenApi,
    security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::core::middleware::{CUSTOMER_ID_HEADER, RESTAURANT_ID_HEADER};

/// Serves `openapi` at `/api-docs/openapi.json` with Swagger UI on `/swagger-ui`.
pub fn create_swagger_ui(mut openapi: OpenApi) -> SwaggerUi {
    let components = openapi.components.get_or_insert_with(Default::default);
    components.add_security_scheme(
        "customerId",
        SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(CUSTOMER_ID_HEADER))),
    );
    components.add_security_scheme(
        "restaurantId",
        SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(RESTAURANT_ID_HEADER))),
    );

    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi)
}
