//! Identity middleware.
//!
//! Tokens are verified upstream; the BFF layer forwards the caller's identity
//! in headers, which these layers turn into request extensions.

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::core::app_error::AppError;

pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";
pub const RESTAURANT_ID_HEADER: &str = "x-restaurant-id";

/// The authenticated customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomerId(pub Uuid);

/// The restaurant an authenticated operator works for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestaurantId(pub Uuid);

fn header_id(req: &Request, header: &str) -> Result<Uuid, AppError> {
    let value = req
        .headers()
        .get(header)
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {header} header")))?;

    value
        .to_str()
        .ok()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| AppError::Unauthorized(format!("Malformed {header} header")))
}

pub async fn customers_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let customer_id = header_id(&req, CUSTOMER_ID_HEADER)?;
    req.extensions_mut().insert(CustomerId(customer_id));
    Ok(next.run(req).await)
}

pub async fn operators_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let restaurant_id = header_id(&req, RESTAURANT_ID_HEADER)?;
    req.extensions_mut().insert(RestaurantId(restaurant_id));
    Ok(next.run(req).await)
}
