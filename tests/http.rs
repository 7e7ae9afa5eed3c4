mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use testresult::TestResult;
use tower::ServiceExt;
use uuid::Uuid;

use marketplace_orderservice::routes;

use common::TestApp;

fn router(app: &TestApp) -> Router {
    Router::new()
        .merge(routes::routes_with_openapi())
        .with_state(app.state.clone())
}

async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    headers: &[(&str, String)],
    body: Option<Value>,
) -> TestResult<(StatusCode, Value)> {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, value);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => request.body(Body::empty())?,
    };

    let response = router(app).oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn customer(id: Uuid) -> Vec<(&'static str, String)> {
    vec![("x-customer-id", id.to_string())]
}

fn operator(restaurant_id: Uuid) -> Vec<(&'static str, String)> {
    vec![("x-restaurant-id", restaurant_id.to_string())]
}

#[tokio::test]
async fn status_transitions_are_published() -> TestResult {
    let app = TestApp::new();

    let (status, body) = send(&app, "GET", "/orders/status-transitions", &[], None).await?;

    assert_eq!(status, StatusCode::OK);
    let table = body["data"].as_array().ok_or("data is not an array")?;
    assert_eq!(table.len(), 5);
    assert_eq!(table[0]["status"], "PENDING");
    assert_eq!(table[0]["allowed"], json!(["PREPARING", "CANCELLED"]));
    assert_eq!(table[3]["terminal"], true);
    Ok(())
}

#[tokio::test]
async fn customer_routes_require_identity() -> TestResult {
    let app = TestApp::new();

    let (status, _) = send(&app, "GET", "/customers/carts", &[], None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let headers = [("x-customer-id", "not-a-uuid".to_string())];
    let (status, _) = send(&app, "GET", "/customers/carts", &headers, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn cart_to_order_to_completion() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());
    let menu_item_id = app.catalog.add(restaurant_id, "Green curry", 1000);

    let (status, body) = send(&app, "GET", "/customers/carts", &customer(customer_id), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], Value::Null);

    let (status, body) = send(
        &app,
        "POST",
        "/customers/carts/items",
        &customer(customer_id),
        Some(json!({ "type": "catalog", "menu_item_id": menu_item_id, "quantity": 2 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pricing"]["total"], 2499);
    let cart_id = body["data"]["cart"]["id"]
        .as_str()
        .ok_or("cart id missing")?
        .to_string();

    let mut headers = customer(customer_id);
    headers.push(("idempotency-key", "http-1".to_string()));
    let order = json!({ "cart_id": cart_id, "delivery_address": "12 Market Street" });
    let (status, body) = send(&app, "POST", "/customers/orders", &headers, Some(order.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["data"]["order_id"]
        .as_str()
        .ok_or("order id missing")?
        .to_string();

    let (status, retry) = send(&app, "POST", "/customers/orders", &headers, Some(order)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(retry["data"]["order_id"], order_id.as_str());

    for target in ["PREPARING", "READY", "COMPLETED"] {
        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/restaurants/orders/{order_id}/status"),
            &operator(restaurant_id),
            Some(json!({ "status": target })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["status"], target);
    }

    let (status, body) = send(
        &app,
        "GET",
        &format!("/customers/orders/{order_id}"),
        &customer(customer_id),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["history"].as_array().map(Vec::len),
        Some(4)
    );
    assert_eq!(body["data"]["order"]["pricing"]["total"], 2499);
    Ok(())
}

#[tokio::test]
async fn business_errors_map_to_status_codes() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());
    let (view, _) = app.cart_with_item(customer_id, restaurant_id, 1000, 1).await?;

    let (status, _) = send(
        &app,
        "POST",
        "/customers/orders",
        &customer(customer_id),
        Some(json!({ "cart_id": Uuid::new_v4(), "delivery_address": "12 Market Street" })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    app.readiness.mark_not_ready(restaurant_id);
    let (status, body) = send(
        &app,
        "POST",
        "/customers/orders",
        &customer(customer_id),
        Some(json!({ "cart_id": view.cart.id, "delivery_address": "12 Market Street" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().is_some_and(|m| m.contains("cannot receive payments")));

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/customers/carts/{}/items/{}", view.cart.id, view.cart.items[0].id),
        &customer(customer_id),
        Some(json!({ "quantity": -2 })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn orders_are_private_to_customer_and_restaurant() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());
    let (view, _) = app.cart_with_item(customer_id, restaurant_id, 1000, 1).await?;
    let result = app
        .state
        .checkout
        .place_order(customer_id, common::place(view.cart.id))
        .await?;
    let order_uri = format!("/customers/orders/{}", result.order_id);

    let (status, _) = send(&app, "GET", &order_uri, &customer(Uuid::new_v4()), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "GET", "/restaurants/orders", &operator(restaurant_id), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/restaurants/orders/{}/status", result.order_id),
        &operator(Uuid::new_v4()),
        Some(json!({ "status": "PREPARING" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}
