//! CLI command implementations.

pub mod migrate;
pub mod shop;
pub mod webhooks;
