use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::app_error::AppError;
use crate::domain::pricing::{PriceBreakdown, Priceable};

/// Largest quantity a single cart line may hold.
pub const MAX_QUANTITY: i32 = 999;
/// Largest unit price accepted for a line, in minor units.
pub const MAX_UNIT_PRICE: i64 = 100_000_000;
/// Largest number of lines in one cart.
pub const MAX_LINES: usize = 100;

/// Where a cart line came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartItemKind {
    /// A menu item, optionally with selected options.
    Catalog {
        menu_item_id: Uuid,
        options: Vec<String>,
    },
    /// An ad-hoc charge agreed with the restaurant outside the catalog.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub id: Uuid,
    pub kind: CartItemKind,
    pub name: String,
    /// Snapshotted when the item was added, never re-read from the catalog.
    pub unit_price: i64,
    pub quantity: i32,
}

impl Priceable for CartItem {
    fn unit_price(&self) -> i64 {
        self.unit_price
    }

    fn quantity(&self) -> i32 {
        self.quantity
    }
}

/// A priced line ready to be added to a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCartItem {
    pub restaurant_id: Uuid,
    pub kind: CartItemKind,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub restaurant_id: Option<Uuid>,
    pub items: Vec<CartItem>,
    /// Order waiting on a hosted payment for this cart. The cart is frozen
    /// until the payment settles.
    pub pending_order_id: Option<Uuid>,
    /// Bumped on every mutation so checkout can detect a cart changed under it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart together with its derived totals.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartView {
    pub cart: Cart,
    pub pricing: PriceBreakdown,
}

/// Sorts and deduplicates option labels so equal selections compare equal.
pub fn normalize_options(mut options: Vec<String>) -> Vec<String> {
    options.iter_mut().for_each(|o| *o = o.trim().to_string());
    options.retain(|o| !o.is_empty());
    options.sort();
    options.dedup();
    options
}

impl Cart {
    pub fn new(customer_id: Uuid, restaurant_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_id,
            restaurant_id,
            items: Vec::new(),
            pending_order_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Fails with `InvalidState` while a hosted payment holds the cart.
    pub fn ensure_open(&self) -> Result<(), AppError> {
        match self.pending_order_id {
            Some(order_id) => Err(AppError::InvalidState(format!(
                "Cart {} is awaiting payment for order {}",
                self.id, order_id
            ))),
            None => Ok(()),
        }
    }

    /// Freezes the cart for `order_id` until its payment settles.
    pub fn hold_for(&mut self, order_id: Uuid) {
        self.pending_order_id = Some(order_id);
        self.touch();
    }

    /// Unfreezes the cart if it is held for `order_id`.
    pub fn release(&mut self, order_id: Uuid) -> bool {
        if self.pending_order_id != Some(order_id) {
            return false;
        }
        self.pending_order_id = None;
        self.touch();
        true
    }

    /// Whether binding this cart to `restaurant_id` would discard items.
    pub fn conflicts_with(&self, restaurant_id: Uuid) -> bool {
        !self.is_empty() && self.restaurant_id != Some(restaurant_id)
    }

    /// Binds the cart to `restaurant_id`, emptying it first when `replace` is set.
    pub fn bind(&mut self, restaurant_id: Uuid, replace: bool) -> Result<(), AppError> {
        if self.restaurant_id == Some(restaurant_id) {
            return Ok(());
        }
        self.ensure_open()?;
        if self.conflicts_with(restaurant_id) {
            if !replace {
                return Err(AppError::InvalidState(format!(
                    "Cart {} already holds items from another restaurant",
                    self.id
                )));
            }
            self.items.clear();
        }
        self.restaurant_id = Some(restaurant_id);
        self.touch();
        Ok(())
    }

    /// Adds `item`, merging it into an existing catalog line with the same
    /// menu item and options. Custom lines are always appended.
    ///
    /// Returns the id of the line that now holds the item.
    pub fn add_item(&mut self, item: NewCartItem) -> Result<Uuid, AppError> {
        self.ensure_open()?;
        check_quantity(item.quantity)?;
        if item.quantity < 1 {
            return Err(AppError::Validation("Quantity must be at least 1".into()));
        }
        if !(0..=MAX_UNIT_PRICE).contains(&item.unit_price) {
            return Err(AppError::Validation(format!(
                "Unit price must be between 0 and {MAX_UNIT_PRICE}"
            )));
        }
        if item.name.trim().is_empty() {
            return Err(AppError::Validation("Item name cannot be blank".into()));
        }
        self.bind(item.restaurant_id, false)?;

        let kind = match item.kind {
            CartItemKind::Catalog {
                menu_item_id,
                options,
            } => CartItemKind::Catalog {
                menu_item_id,
                options: normalize_options(options),
            },
            CartItemKind::Custom => CartItemKind::Custom,
        };

        if matches!(kind, CartItemKind::Catalog { .. }) {
            if let Some(existing) = self.items.iter_mut().find(|line| line.kind == kind) {
                let quantity = existing.quantity + item.quantity;
                check_quantity(quantity)?;
                existing.quantity = quantity;
                let id = existing.id;
                self.touch();
                return Ok(id);
            }
        }

        if self.items.len() >= MAX_LINES {
            return Err(AppError::Validation(format!(
                "A cart holds at most {MAX_LINES} lines"
            )));
        }
        let id = Uuid::new_v4();
        self.items.push(CartItem {
            id,
            kind,
            name: item.name.trim().to_string(),
            unit_price: item.unit_price,
            quantity: item.quantity,
        });
        self.touch();
        Ok(id)
    }

    /// Sets a line's quantity. Zero removes the line.
    pub fn update_quantity(&mut self, item_id: Uuid, quantity: i32) -> Result<(), AppError> {
        if quantity < 0 {
            return Err(AppError::Validation("Quantity cannot be negative".into()));
        }
        check_quantity(quantity)?;
        self.ensure_open()?;
        let Some(position) = self.items.iter().position(|line| line.id == item_id) else {
            return Err(AppError::NotFound(format!("Cart item {item_id}")));
        };

        if quantity == 0 {
            self.items.remove(position);
        } else if let Some(line) = self.items.get_mut(position) {
            line.quantity = quantity;
        }
        self.touch();
        Ok(())
    }

    /// Removes a line. Returns `false` when it was already absent.
    pub fn remove_item(&mut self, item_id: Uuid) -> Result<bool, AppError> {
        self.ensure_open()?;
        let before = self.items.len();
        self.items.retain(|line| line.id != item_id);
        let removed = self.items.len() != before;
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    /// Empties the cart and unbinds its restaurant. Returns `false` when
    /// there was nothing to clear.
    pub fn clear(&mut self) -> Result<bool, AppError> {
        self.ensure_open()?;
        if self.items.is_empty() && self.restaurant_id.is_none() {
            return Ok(false);
        }
        self.items.clear();
        self.restaurant_id = None;
        self.touch();
        Ok(true)
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

fn check_quantity(quantity: i32) -> Result<(), AppError> {
    if quantity > MAX_QUANTITY {
        return Err(AppError::Validation(format!(
            "Quantity cannot exceed {MAX_QUANTITY}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(restaurant_id: Uuid, menu_item_id: Uuid, options: &[&str], qty: i32) -> NewCartItem {
        NewCartItem {
            restaurant_id,
            kind: CartItemKind::Catalog {
                menu_item_id,
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            name: "Pad Thai".into(),
            unit_price: 1200,
            quantity: qty,
        }
    }

    fn custom(restaurant_id: Uuid) -> NewCartItem {
        NewCartItem {
            restaurant_id,
            kind: CartItemKind::Custom,
            name: "Extra spicy sauce jar".into(),
            unit_price: 300,
            quantity: 1,
        }
    }

    #[test]
    fn catalog_lines_merge_regardless_of_option_order() {
        let restaurant = Uuid::new_v4();
        let menu_item = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);

        let first = cart.add_item(catalog(restaurant, menu_item, &["egg", "tofu"], 1)).unwrap();
        let second = cart.add_item(catalog(restaurant, menu_item, &["tofu", "egg"], 2)).unwrap();

        assert_eq!(first, second);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.restaurant_id, Some(restaurant));
    }

    #[test]
    fn different_options_stay_separate_lines() {
        let restaurant = Uuid::new_v4();
        let menu_item = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);

        cart.add_item(catalog(restaurant, menu_item, &["egg"], 1)).unwrap();
        cart.add_item(catalog(restaurant, menu_item, &[], 1)).unwrap();

        assert_eq!(cart.items.len(), 2);
    }

    #[test]
    fn custom_lines_never_merge() {
        let restaurant = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), Some(restaurant));

        cart.add_item(custom(restaurant)).unwrap();
        cart.add_item(custom(restaurant)).unwrap();

        assert_eq!(cart.items.len(), 2);
    }

    #[test]
    fn other_restaurant_is_rejected_until_cleared() {
        let mut cart = Cart::new(Uuid::new_v4(), None);
        cart.add_item(custom(Uuid::new_v4())).unwrap();

        let err = cart.add_item(custom(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        assert!(cart.clear().unwrap());
        let other = Uuid::new_v4();
        cart.add_item(custom(other)).unwrap();
        assert_eq!(cart.restaurant_id, Some(other));
    }

    #[test]
    fn zero_quantity_removes_the_line() {
        let restaurant = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);
        let id = cart.add_item(catalog(restaurant, Uuid::new_v4(), &[], 2)).unwrap();

        cart.update_quantity(id, 0).unwrap();

        assert!(cart.is_empty());
        assert!(matches!(
            cart.update_quantity(id, 1),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn every_mutation_bumps_the_version() {
        let restaurant = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);

        let id = cart.add_item(catalog(restaurant, Uuid::new_v4(), &[], 1)).unwrap();
        let after_add = cart.version;
        cart.update_quantity(id, 4).unwrap();
        assert!(cart.version > after_add);

        let before_noop = cart.version;
        assert!(!cart.remove_item(Uuid::new_v4()).unwrap());
        assert_eq!(cart.version, before_noop);
    }

    #[test]
    fn invalid_lines_are_rejected() {
        let restaurant = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);

        let mut blank = custom(restaurant);
        blank.name = "  ".into();
        assert!(matches!(cart.add_item(blank), Err(AppError::Validation(_))));
        assert!(matches!(
            cart.add_item(catalog(restaurant, Uuid::new_v4(), &[], 0)),
            Err(AppError::Validation(_))
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn quantities_and_prices_are_bounded() {
        let restaurant = Uuid::new_v4();
        let menu_item = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);

        let mut pricey = custom(restaurant);
        pricey.unit_price = i64::MAX / 2 + 1;
        pricey.quantity = 2;
        assert!(matches!(cart.add_item(pricey), Err(AppError::Validation(_))));
        assert!(matches!(
            cart.add_item(catalog(restaurant, menu_item, &[], MAX_QUANTITY + 1)),
            Err(AppError::Validation(_))
        ));

        let id = cart
            .add_item(catalog(restaurant, menu_item, &[], MAX_QUANTITY - 1))
            .unwrap();
        cart.add_item(catalog(restaurant, menu_item, &[], 1)).unwrap();
        assert_eq!(cart.items[0].quantity, MAX_QUANTITY);

        // Merging past the bound leaves the line as it was.
        assert!(matches!(
            cart.add_item(catalog(restaurant, menu_item, &[], 1)),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            cart.update_quantity(id, i32::MAX),
            Err(AppError::Validation(_))
        ));
        assert_eq!(cart.items[0].quantity, MAX_QUANTITY);
    }

    #[test]
    fn line_count_is_bounded() {
        let restaurant = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);
        for _ in 0..MAX_LINES {
            cart.add_item(custom(restaurant)).unwrap();
        }

        assert!(matches!(
            cart.add_item(custom(restaurant)),
            Err(AppError::Validation(_))
        ));
        assert_eq!(cart.items.len(), MAX_LINES);
    }

    #[test]
    fn held_cart_rejects_changes_until_released() {
        let restaurant = Uuid::new_v4();
        let mut cart = Cart::new(Uuid::new_v4(), None);
        let id = cart.add_item(custom(restaurant)).unwrap();
        let order_id = Uuid::new_v4();

        let before = cart.version;
        cart.hold_for(order_id);
        assert!(cart.version > before);

        assert!(matches!(cart.add_item(custom(restaurant)), Err(AppError::InvalidState(_))));
        assert!(matches!(cart.update_quantity(id, 2), Err(AppError::InvalidState(_))));
        assert!(matches!(cart.remove_item(id), Err(AppError::InvalidState(_))));
        assert!(matches!(cart.clear(), Err(AppError::InvalidState(_))));
        assert!(matches!(
            cart.bind(Uuid::new_v4(), true),
            Err(AppError::InvalidState(_))
        ));

        assert!(!cart.release(Uuid::new_v4()));
        assert!(cart.release(order_id));
        cart.update_quantity(id, 2).unwrap();
        assert_eq!(cart.items[0].quantity, 2);
    }
}
