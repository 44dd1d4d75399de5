//! Connection stages.
//!
//! The session walks an ordered sequence of stages. Comparisons between
//! stages are meaningful: "at least `LocalUserCreated`" gates the event
//! reconciler, "below `ConnectedToNetwork`" rejects sends.
//!
//! ```text
//! NotInitialized
//!      │ initialize()
//!      ▼
//! PendingInitialization ──(engine init fails: stays)
//!      │ engine init ok
//!      ▼
//! Initialized ◄────────────────────────────────┐
//!      │ first create/join, identity requested  │
//!      ▼                                        │
//! LoginRequestIssued                            │
//!      │ identity resolved, local user created  │
//!      ▼                                        │ network destroyed
//! LocalUserCreated                              │
//!      │ authenticate acknowledged              │
//!      ▼                                        │
//! LocalUserAuthenticated                        │
//!      │ default settings applied               │
//!      ▼                                        │
//! ConnectedToNetwork ───────────────────────────┘
//! ```
//!
//! Cleanup returns to `NotInitialized` from any stage.

use serde::{Deserialize, Serialize};

/// Internal connection stage, strictly ordered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ConnectionStage {
    /// Engine not initialized.
    #[default]
    NotInitialized,
    /// Engine initialization requested.
    PendingInitialization,
    /// Engine initialized, no identity.
    Initialized,
    /// Identity requested from the policy or identity provider.
    LoginRequestIssued,
    /// Local user and chat control exist.
    LocalUserCreated,
    /// Local user authenticated on a network.
    LocalUserAuthenticated,
    /// Connected with default settings applied.
    ConnectedToNetwork,
}

impl ConnectionStage {
    /// Coarse stage exposed to the host.
    pub fn public(self) -> SessionStage {
        match self {
            Self::NotInitialized | Self::PendingInitialization => SessionStage::NotInitialized,
            Self::Initialized => SessionStage::Initialized,
            Self::LoginRequestIssued | Self::LocalUserCreated | Self::LocalUserAuthenticated => {
                SessionStage::ConnectingToNetwork
            },
            Self::ConnectedToNetwork => SessionStage::ConnectedToNetwork,
        }
    }

    /// `true` once the engine has been initialized.
    pub fn is_initialized(self) -> bool {
        self >= Self::Initialized
    }

    /// `true` while connected to a network.
    pub fn is_connected(self) -> bool {
        self == Self::ConnectedToNetwork
    }
}

/// Coarse session stage exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStage {
    /// Not initialized (or initialization pending).
    NotInitialized,
    /// Initialized, not on a network.
    Initialized,
    /// Signing in, authenticating or applying settings.
    ConnectingToNetwork,
    /// Connected to a network.
    ConnectedToNetwork,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(ConnectionStage::NotInitialized < ConnectionStage::PendingInitialization);
        assert!(ConnectionStage::Initialized < ConnectionStage::LoginRequestIssued);
        assert!(ConnectionStage::LocalUserCreated < ConnectionStage::LocalUserAuthenticated);
        assert!(ConnectionStage::LocalUserAuthenticated < ConnectionStage::ConnectedToNetwork);
    }

    #[test]
    fn public_stage_mapping() {
        assert_eq!(ConnectionStage::PendingInitialization.public(), SessionStage::NotInitialized);
        assert_eq!(ConnectionStage::Initialized.public(), SessionStage::Initialized);
        assert_eq!(
            ConnectionStage::LoginRequestIssued.public(),
            SessionStage::ConnectingToNetwork
        );
        assert_eq!(
            ConnectionStage::LocalUserAuthenticated.public(),
            SessionStage::ConnectingToNetwork
        );
        assert_eq!(ConnectionStage::ConnectedToNetwork.public(), SessionStage::ConnectedToNetwork);
    }

    #[test]
    fn initialized_predicate() {
        assert!(!ConnectionStage::PendingInitialization.is_initialized());
        assert!(ConnectionStage::Initialized.is_initialized());
        assert!(ConnectionStage::ConnectedToNetwork.is_connected());
        assert!(!ConnectionStage::LocalUserAuthenticated.is_connected());
    }
}
