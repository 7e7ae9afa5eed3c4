pub mod cart;
pub mod order;
pub mod pricing;
pub mod readiness;
