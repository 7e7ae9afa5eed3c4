pub mod carts;
pub mod checkout;
pub mod order_status;
pub mod payments;
pub mod readiness;
