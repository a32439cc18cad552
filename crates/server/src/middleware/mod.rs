//! Request extractors guarding the app's routes.

mod verify;

pub use verify::{
    HMAC_HEADER, SHOP_DOMAIN_HEADER, SessionShop, ShopifyWebhook, TOPIC_HEADER, VerifiedShopQuery,
};
