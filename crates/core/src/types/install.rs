//! Installation lifecycle of a shop.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Stage of the OAuth installation state machine.
///
/// ```text
/// NotInstalled ─► PendingAuthorization ─► TokenExchanged ─► WebhookRegistered
///                        ▲                                        │
///                        │                                        ▼
///                   Uninstalled ◄──────── Installed ◄──────── ShopPersisted
/// ```
///
/// Only `Installed` and `Uninstalled` are observable from the database; the
/// intermediate stages exist for the duration of one callback request and are
/// reported in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    #[default]
    NotInstalled,
    PendingAuthorization,
    TokenExchanged,
    WebhookRegistered,
    ShopPersisted,
    Installed,
    Uninstalled,
}

/// Rejected stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid install transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: InstallStage,
    pub to: InstallStage,
}

impl InstallStage {
    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Starting a new authorization is allowed from every stage except
    /// `Installed`: a callback that failed part way leaves the shop wherever
    /// it stopped, and the merchant retrying must be able to start over.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use InstallStage::{
            Installed, NotInstalled, PendingAuthorization, ShopPersisted, TokenExchanged,
            Uninstalled, WebhookRegistered,
        };

        matches!(
            (self, next),
            (
                NotInstalled
                    | Uninstalled
                    | PendingAuthorization
                    | TokenExchanged
                    | WebhookRegistered
                    | ShopPersisted,
                PendingAuthorization
            ) | (PendingAuthorization, TokenExchanged)
                | (TokenExchanged, WebhookRegistered)
                | (WebhookRegistered, ShopPersisted)
                | (ShopPersisted, Installed)
                | (Installed, Uninstalled)
        )
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if `self -> next` is not allowed.
    pub const fn advance(self, next: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    /// Stage implied by a persisted shop row.
    #[must_use]
    pub const fn from_record(is_installed: bool, has_access_token: bool) -> Self {
        if is_installed && has_access_token {
            Self::Installed
        } else {
            Self::Uninstalled
        }
    }

    /// Stable snake_case name, as used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::PendingAuthorization => "pending_authorization",
            Self::TokenExchanged => "token_exchanged",
            Self::WebhookRegistered => "webhook_registered",
            Self::ShopPersisted => "shop_persisted",
            Self::Installed => "installed",
            Self::Uninstalled => "uninstalled",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            InstallStage::NotInstalled,
            InstallStage::PendingAuthorization,
            InstallStage::TokenExchanged,
            InstallStage::WebhookRegistered,
            InstallStage::ShopPersisted,
            InstallStage::Installed,
            InstallStage::Uninstalled,
            InstallStage::PendingAuthorization,
        ];

        let mut stage = path[0];
        for next in &path[1..] {
            stage = stage.advance(*next).unwrap_or_else(|e| panic!("{e}"));
        }
        assert_eq!(stage, InstallStage::PendingAuthorization);
    }

    #[test]
    fn test_cannot_skip_steps() {
        assert!(!InstallStage::PendingAuthorization.can_transition_to(InstallStage::Installed));
        assert!(!InstallStage::NotInstalled.can_transition_to(InstallStage::TokenExchanged));
        assert!(!InstallStage::TokenExchanged.can_transition_to(InstallStage::ShopPersisted));
    }

    #[test]
    fn test_installed_does_not_restart_authorization() {
        let err = InstallStage::Installed
            .advance(InstallStage::PendingAuthorization)
            .unwrap_err();
        assert_eq!(err.from, InstallStage::Installed);
        assert_eq!(
            err.to_string(),
            "invalid install transition installed -> pending_authorization"
        );
    }

    #[test]
    fn test_failed_callback_can_restart() {
        assert!(InstallStage::WebhookRegistered.can_transition_to(InstallStage::PendingAuthorization));
    }

    #[test]
    fn test_from_record() {
        assert_eq!(InstallStage::from_record(true, true), InstallStage::Installed);
        assert_eq!(InstallStage::from_record(true, false), InstallStage::Uninstalled);
        assert_eq!(InstallStage::from_record(false, true), InstallStage::Uninstalled);
        assert_eq!(InstallStage::from_record(false, false), InstallStage::Uninstalled);
    }
}
