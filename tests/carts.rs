mod common;

use std::sync::Arc;

use testresult::TestResult;
use uuid::Uuid;

use marketplace_orderservice::{
    core::app_error::AppError,
    domain::cart::{CartItemKind, MAX_QUANTITY},
    services::carts::AddItem,
};

use common::TestApp;

#[tokio::test]
async fn get_cart_without_cart_is_empty_result() -> TestResult {
    let app = TestApp::new();

    assert!(app.state.carts.get_cart(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn first_add_creates_and_binds_cart() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());

    let (view, menu_item_id) = app.cart_with_item(customer_id, restaurant_id, 1000, 2).await?;

    assert_eq!(view.cart.customer_id, customer_id);
    assert_eq!(view.cart.restaurant_id, Some(restaurant_id));
    assert_eq!(view.cart.items.len(), 1);
    assert_eq!(
        view.cart.items[0].kind,
        CartItemKind::Catalog {
            menu_item_id,
            options: vec![]
        }
    );
    assert_eq!(view.pricing.subtotal, 2000);
    assert_eq!(view.pricing.total, 2499);

    let fetched = app.state.carts.get_cart(customer_id).await?;
    assert_eq!(fetched.map(|view| view.cart.id), Some(view.cart.id));
    Ok(())
}

#[tokio::test]
async fn same_item_and_options_merge_custom_items_do_not() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());
    let menu_item_id = app.catalog.add(restaurant_id, "Ramen", 1200);
    let carts = &app.state.carts;

    let add = |options: Vec<&str>| AddItem::Catalog {
        menu_item_id,
        options: options.into_iter().map(String::from).collect(),
        quantity: 1,
    };
    carts.add_item(customer_id, None, add(vec!["egg", "extra spicy"])).await?;
    carts.add_item(customer_id, None, add(vec!["extra spicy", "egg", "egg"])).await?;
    let view = carts.add_item(customer_id, None, add(vec!["egg"])).await?;

    assert_eq!(view.cart.items.len(), 2);
    assert_eq!(view.cart.items[0].quantity, 2);

    let custom = || AddItem::Custom {
        restaurant_id,
        name: "Birthday candle".into(),
        unit_price: 50,
        quantity: 1,
    };
    carts.add_item(customer_id, None, custom()).await?;
    let view = carts.add_item(customer_id, None, custom()).await?;
    assert_eq!(view.cart.items.len(), 4);
    Ok(())
}

#[tokio::test]
async fn merged_line_keeps_first_snapshot_price() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, menu_item_id) = app.cart_with_item(customer_id, restaurant_id, 800, 1).await?;

    app.catalog.set_price(menu_item_id, 950);
    let view = app
        .state
        .carts
        .add_item(
            customer_id,
            None,
            AddItem::Catalog {
                menu_item_id,
                options: vec![],
                quantity: 1,
            },
        )
        .await?;

    assert_eq!(view.cart.items[0].unit_price, 800);
    assert_eq!(view.cart.items[0].quantity, 2);
    Ok(())
}

#[tokio::test]
async fn item_from_another_restaurant_is_rejected_unless_replaced() -> TestResult {
    let app = TestApp::new();
    let customer_id = Uuid::new_v4();
    let (view, _) = app.cart_with_item(customer_id, Uuid::new_v4(), 500, 1).await?;
    let other_restaurant = Uuid::new_v4();

    let err = app
        .state
        .carts
        .add_item(
            customer_id,
            Some(view.cart.id),
            AddItem::Custom {
                restaurant_id: other_restaurant,
                name: "Side salad".into(),
                unit_price: 300,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = app
        .state
        .carts
        .create_cart(customer_id, Some(other_restaurant), false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let replaced = app
        .state
        .carts
        .create_cart(customer_id, Some(other_restaurant), true)
        .await?;
    assert_eq!(replaced.cart.id, view.cart.id);
    assert_eq!(replaced.cart.restaurant_id, Some(other_restaurant));
    assert!(replaced.cart.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn custom_items_are_validated() -> TestResult {
    let app = TestApp::new();
    let customer_id = Uuid::new_v4();

    let err = app
        .state
        .carts
        .add_item(
            customer_id,
            None,
            AddItem::Custom {
                restaurant_id: Uuid::new_v4(),
                name: "   ".into(),
                unit_price: 100,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = app
        .state
        .carts
        .add_item(
            customer_id,
            None,
            AddItem::Custom {
                restaurant_id: Uuid::new_v4(),
                name: "Extra sauce".into(),
                unit_price: -1,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn oversized_quantities_and_prices_are_rejected() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());
    let carts = &app.state.carts;

    let err = carts
        .add_item(
            customer_id,
            None,
            AddItem::Custom {
                restaurant_id,
                name: "Catering deposit".into(),
                unit_price: i64::MAX / 2 + 1,
                quantity: 2,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let (view, menu_item_id) = app
        .cart_with_item(customer_id, restaurant_id, 1000, MAX_QUANTITY)
        .await?;
    let err = carts
        .add_item(
            customer_id,
            None,
            AddItem::Catalog {
                menu_item_id,
                options: vec![],
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let unchanged = carts.get_cart(customer_id).await?.ok_or("cart missing")?;
    assert_eq!(unchanged.cart.items[0].quantity, MAX_QUANTITY);
    assert_eq!(unchanged.pricing, view.pricing);
    Ok(())
}

#[tokio::test]
async fn unknown_or_unavailable_menu_items_are_rejected() -> TestResult {
    let app = TestApp::new();
    let customer_id = Uuid::new_v4();
    let add = |menu_item_id| AddItem::Catalog {
        menu_item_id,
        options: vec![],
        quantity: 1,
    };

    let err = app
        .state
        .carts
        .add_item(customer_id, None, add(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let menu_item_id = app.catalog.add(Uuid::new_v4(), "Soup of the day", 700);
    app.catalog.set_available(menu_item_id, false);
    let err = app
        .state
        .carts
        .add_item(customer_id, None, add(menu_item_id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn update_quantity_rules() -> TestResult {
    let app = TestApp::new();
    let customer_id = Uuid::new_v4();
    let (view, _) = app.cart_with_item(customer_id, Uuid::new_v4(), 500, 1).await?;
    let (cart_id, item_id) = (view.cart.id, view.cart.items[0].id);
    let carts = &app.state.carts;

    let view = carts.update_quantity(customer_id, cart_id, item_id, 3).await?;
    assert_eq!(view.cart.items[0].quantity, 3);

    let err = carts
        .update_quantity(customer_id, cart_id, item_id, -1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = carts
        .update_quantity(customer_id, cart_id, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = carts
        .update_quantity(customer_id, Uuid::new_v4(), item_id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let view = carts.update_quantity(customer_id, cart_id, item_id, 0).await?;
    assert!(view.cart.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn remove_and_clear_are_idempotent() -> TestResult {
    let app = TestApp::new();
    let customer_id = Uuid::new_v4();
    let (view, _) = app.cart_with_item(customer_id, Uuid::new_v4(), 500, 1).await?;
    let (cart_id, item_id) = (view.cart.id, view.cart.items[0].id);
    let carts = &app.state.carts;

    let first = carts.remove_item(customer_id, cart_id, item_id).await?;
    let second = carts.remove_item(customer_id, cart_id, item_id).await?;
    assert!(first.is_some_and(|view| view.cart.items.is_empty()));
    assert!(second.is_some_and(|view| view.cart.items.is_empty()));
    assert!(carts.remove_item(customer_id, Uuid::new_v4(), item_id).await?.is_none());

    let cleared = carts.clear_cart(customer_id, cart_id).await?;
    assert!(cleared.is_some_and(|view| view.cart.restaurant_id.is_none()));
    assert!(carts.clear_cart(customer_id, cart_id).await?.is_some());
    assert!(carts.clear_cart(customer_id, Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn other_customers_cannot_touch_a_cart() -> TestResult {
    let app = TestApp::new();
    let owner = Uuid::new_v4();
    let (view, _) = app.cart_with_item(owner, Uuid::new_v4(), 500, 1).await?;
    let (cart_id, item_id) = (view.cart.id, view.cart.items[0].id);
    let intruder = Uuid::new_v4();

    let err = app
        .state
        .carts
        .update_quantity(intruder, cart_id, item_id, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert!(app.state.carts.clear_cart(intruder, cart_id).await?.is_none());

    let untouched = app.state.carts.get_cart(owner).await?;
    assert_eq!(untouched.map(|view| view.cart.items.len()), Some(1));
    Ok(())
}

#[tokio::test]
async fn concurrent_adds_to_one_cart_are_all_kept() -> TestResult {
    let app = TestApp::new();
    let (customer_id, restaurant_id) = (Uuid::new_v4(), Uuid::new_v4());
    let menu_item_id = app.catalog.add(restaurant_id, "Dumplings", 650);
    let carts = Arc::new(app.state.carts.clone());

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let carts = carts.clone();
            tokio::spawn(async move {
                carts
                    .add_item(
                        customer_id,
                        None,
                        AddItem::Catalog {
                            menu_item_id,
                            options: vec![],
                            quantity: 1,
                        },
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    let view = carts.get_cart(customer_id).await?.ok_or("cart missing")?;
    assert_eq!(view.cart.items.len(), 1);
    assert_eq!(view.cart.items[0].quantity, 20);
    Ok(())
}
