//! Identity backend boundary.
//!
//! Before the session can create its local engine user it needs a stable
//! identity and a token. Both come from an authentication backend the
//! session does not implement; it only asks once and polls for the answer.

use thiserror::Error;

use crate::roster::EntityId;

/// Signed-in identity of the local player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Stable identity.
    pub entity_id: EntityId,
    /// Token proving the identity to the engine.
    pub token: String,
}

impl LocalIdentity {
    /// Create a new identity.
    pub fn new(entity_id: impl Into<EntityId>, token: impl Into<String>) -> Self {
        Self { entity_id: entity_id.into(), token: token.into() }
    }
}

/// Identity request failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct IdentityError {
    /// Backend-provided reason.
    pub reason: String,
}

impl IdentityError {
    /// Create a new identity error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Authentication backend.
pub trait IdentityProvider {
    /// `true` if a user is signed in and a token can be requested.
    fn is_logged_in(&self) -> bool;

    /// Start fetching a token for the signed-in user.
    fn request_token(&mut self);

    /// Answer to the last [`Self::request_token`], once available.
    ///
    /// Returns `None` while the request is outstanding.
    fn poll_token(&mut self) -> Option<Result<LocalIdentity, IdentityError>>;
}
