//! Shareable network identity.
//!
//! A network identity is `invitation_id|serialized_descriptor`. It is the
//! only thing peers exchange to find each other: the creator publishes it,
//! joiners pass it back unmodified to [`crate::Session::join_network`].

use std::{fmt, str::FromStr};

use crate::error::SessionError;

/// Separator between the invitation id and the serialized descriptor.
pub const SEPARATOR: char = '|';

/// Invitation id plus serialized network descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkId {
    invitation_id: String,
    descriptor: String,
}

impl NetworkId {
    /// Compose an identity from its parts.
    pub fn new(invitation_id: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self { invitation_id: invitation_id.into(), descriptor: descriptor.into() }
    }

    /// Parse an identity received from a peer.
    ///
    /// Splits at the first separator; the descriptor may itself contain
    /// separators.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        if text.is_empty() {
            return Err(SessionError::MissingNetworkId);
        }

        let (invitation_id, descriptor) =
            text.split_once(SEPARATOR).ok_or(SessionError::MalformedNetworkId)?;

        if invitation_id.is_empty() || descriptor.is_empty() {
            return Err(SessionError::MalformedNetworkId);
        }

        Ok(Self::new(invitation_id, descriptor))
    }

    /// Invitation used to authenticate into the network.
    pub fn invitation_id(&self) -> &str {
        &self.invitation_id
    }

    /// Serialized network descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.invitation_id, self.descriptor)
    }
}

impl FromStr for NetworkId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn splits_at_first_separator() {
        let id = NetworkId::parse("invite|desc|with|bars").unwrap();
        assert_eq!(id.invitation_id(), "invite");
        assert_eq!(id.descriptor(), "desc|with|bars");
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert_eq!(NetworkId::parse(""), Err(SessionError::MissingNetworkId));
        assert_eq!(NetworkId::parse("no-separator"), Err(SessionError::MalformedNetworkId));
        assert_eq!(NetworkId::parse("|descriptor"), Err(SessionError::MalformedNetworkId));
        assert_eq!(NetworkId::parse("invite|"), Err(SessionError::MalformedNetworkId));
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(
            invitation in "[a-zA-Z0-9-]{1,36}",
            descriptor in "[a-zA-Z0-9+/=|]{1,64}",
        ) {
            let id = NetworkId::new(invitation, descriptor);
            prop_assert_eq!(NetworkId::parse(&id.to_string()), Ok(id));
        }
    }
}
