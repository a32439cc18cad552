//! Core types for shop-tagger.

pub mod domain;
pub mod id;
pub mod install;

pub use domain::{ShopDomain, ShopDomainError};
pub use id::*;
pub use install::{InstallStage, InvalidTransition};
