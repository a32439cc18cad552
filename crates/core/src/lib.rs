//! shop-tagger core - shared domain types.
//!
//! This crate provides the types used by every shop-tagger component:
//! - `server` - OAuth/webhook integration and the embedded app API
//! - `cli` - Command-line tools for migrations and shop maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, validated shop domains, and the install state machine

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
