//! Domain models.

pub mod shop;

pub use shop::{NewShop, Shop};
