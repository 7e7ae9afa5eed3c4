//! HTTP clients for the collaborating services.

pub mod catalog;
pub mod payments;
