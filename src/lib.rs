pub mod api;
pub mod consumers;
pub mod core;
pub mod domain;
pub mod events;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
