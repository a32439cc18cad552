//! Business logic services.

pub mod install;
pub mod install_cache;

pub use install::{
    AppLoad, CallbackParams, InstallError, InstallFlow, InstallSettings, WebhookOutcome,
    ensure_uninstall_webhook,
};
pub use install_cache::{InstallCache, InstallEntry, InstallLocks, StateError};
