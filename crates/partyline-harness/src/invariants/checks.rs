//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold
//! between ticks, whatever the host did.

use partyline_core::ConnectionStage;

use super::{Invariant, InvariantKind, InvariantResult, SystemSnapshot, Violation};

/// Each remote identity appears at most once, and never the local one.
pub struct RosterUniqueness;

impl Invariant for RosterUniqueness {
    fn kind(&self) -> InvariantKind {
        InvariantKind::RosterUniqueness
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            if let Some((entity_id, count)) =
                session.remote_counts().into_iter().find(|(_, count)| *count > 1)
            {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!(
                        "peer {}: remote {entity_id} listed {count} times",
                        session.peer
                    ),
                });
            }

            if !session.local_entity_id.is_empty()
                && session.remotes.iter().any(|p| p.entity_id == session.local_entity_id)
            {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!(
                        "peer {}: local identity {} listed as remote",
                        session.peer, session.local_entity_id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A remote's engine handles, once set, never change while it stays in
/// the roster.
pub struct HandlesSetOnce;

impl Invariant for HandlesSetOnce {
    fn kind(&self) -> InvariantKind {
        InvariantKind::HandlesSetOnce
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for remote in &session.remotes {
                let Some(previous) = remote.previous else {
                    continue;
                };
                let changed = |before: Option<u64>, now: Option<u64>| {
                    before.is_some() && before != now
                };
                if changed(previous.endpoint, remote.endpoint)
                    || changed(previous.chat_control, remote.chat_control)
                {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!(
                            "peer {}: handles of {} changed from {:?} to {:?}",
                            session.peer,
                            remote.entity_id,
                            previous,
                            remote.handles()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The stage agrees with the state the session holds.
///
/// - below `LocalUserCreated` there are no remotes,
/// - not initialized means no local chat control,
/// - connected and not leaving means a published network id and a local
///   endpoint.
pub struct StageConsistency;

impl Invariant for StageConsistency {
    fn kind(&self) -> InvariantKind {
        InvariantKind::StageConsistency
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            let fail = |message: &str| {
                Err(Violation {
                    invariant: self.kind(),
                    message: format!("peer {} at {:?}: {message}", session.peer, session.stage),
                })
            };

            if session.stage < ConnectionStage::LocalUserCreated && !session.remotes.is_empty() {
                return fail("remote participants before the local user exists");
            }
            if !session.stage.is_initialized() && session.local_chat_control.is_some() {
                return fail("chat control held while not initialized");
            }
            if session.stage.is_connected() && !session.leaving {
                if session.network_id.is_none() {
                    return fail("connected without a network id");
                }
                if session.local_endpoint.is_none() {
                    return fail("connected without a local endpoint");
                }
            }
        }
        Ok(())
    }
}

/// At most one of create-and-join and join waits for the local user.
pub struct ExclusiveRequests;

impl Invariant for ExclusiveRequests {
    fn kind(&self) -> InvariantKind {
        InvariantKind::ExclusiveRequests
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            if session.queued_create && session.queued_join {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!("peer {}: create and join both queued", session.peer),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use partyline_core::EntityId;

    use super::*;
    use crate::invariants::{ParticipantHandles, ParticipantSnapshot, SessionSnapshot};

    fn remote(id: &str, endpoint: u64) -> ParticipantSnapshot {
        ParticipantSnapshot {
            entity_id: EntityId::new(id),
            endpoint: Some(endpoint),
            ..ParticipantSnapshot::default()
        }
    }

    #[test]
    fn duplicate_remote_is_reported() {
        let session = SessionSnapshot {
            stage: ConnectionStage::ConnectedToNetwork,
            remotes: vec![remote("alice", 1), remote("alice", 2)],
            ..SessionSnapshot::default()
        };
        let violation = RosterUniqueness.check(&SystemSnapshot::single(session));
        assert!(violation.is_err_and(|v| v.message.contains("alice")));
    }

    #[test]
    fn local_identity_as_remote_is_reported() {
        let session = SessionSnapshot {
            stage: ConnectionStage::ConnectedToNetwork,
            local_entity_id: EntityId::new("me"),
            remotes: vec![remote("me", 1)],
            ..SessionSnapshot::default()
        };
        assert!(RosterUniqueness.check(&SystemSnapshot::single(session)).is_err());
    }

    #[test]
    fn changed_handle_is_reported() {
        let mut alice = remote("alice", 2);
        alice.previous = Some(ParticipantHandles { endpoint: Some(1), chat_control: None });
        let session = SessionSnapshot { remotes: vec![alice], ..SessionSnapshot::default() };
        assert!(HandlesSetOnce.check(&SystemSnapshot::single(session)).is_err());

        let mut bob = remote("bob", 3);
        bob.previous = Some(ParticipantHandles { endpoint: None, chat_control: None });
        let session = SessionSnapshot { remotes: vec![bob], ..SessionSnapshot::default() };
        assert!(HandlesSetOnce.check(&SystemSnapshot::single(session)).is_ok());
    }

    #[test]
    fn remotes_before_local_user_are_reported() {
        let session = SessionSnapshot {
            stage: ConnectionStage::Initialized,
            remotes: vec![remote("alice", 1)],
            ..SessionSnapshot::default()
        };
        assert!(StageConsistency.check(&SystemSnapshot::single(session)).is_err());
    }

    #[test]
    fn both_requests_queued_is_reported() {
        let session = SessionSnapshot {
            queued_create: true,
            queued_join: true,
            ..SessionSnapshot::default()
        };
        assert!(ExclusiveRequests.check(&SystemSnapshot::single(session)).is_err());
    }
}
