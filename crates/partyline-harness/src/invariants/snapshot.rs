//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a session exposes at a point in time. Invariants
//! operate on snapshots rather than live sessions so every check of one
//! round sees the same state.

use std::collections::BTreeMap;

use partyline_core::{
    ConnectionStage, Engine, EntityId, IdentityProvider, Participant, PolicyProvider, Session,
};
use serde::Serialize;

/// Snapshot of every simulated session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemSnapshot {
    /// Per-session snapshots, in peer order.
    pub sessions: Vec<SessionSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no sessions).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single session.
    pub fn single(session: SessionSnapshot) -> Self {
        Self { sessions: vec![session] }
    }

    /// Add a session snapshot.
    pub fn add_session(&mut self, session: SessionSnapshot) {
        self.sessions.push(session);
    }

    /// Carry remote handles seen in `previous` into this snapshot, for
    /// participants still present.
    pub fn record_history(&mut self, previous: &Self) {
        for (session, earlier) in self.sessions.iter_mut().zip(&previous.sessions) {
            for remote in &mut session.remotes {
                remote.previous = earlier
                    .remotes
                    .iter()
                    .find(|p| p.entity_id == remote.entity_id)
                    .map(ParticipantSnapshot::handles);
            }
        }
    }
}

/// Snapshot of one session's observable state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    /// Peer index.
    pub peer: usize,
    /// Internal connection stage.
    pub stage: ConnectionStage,
    /// Local identity; empty before sign-in.
    pub local_entity_id: EntityId,
    /// Local participant's endpoint handle.
    pub local_endpoint: Option<u64>,
    /// Local participant's chat control handle.
    pub local_chat_control: Option<u64>,
    /// Remote participants in join order.
    pub remotes: Vec<ParticipantSnapshot>,
    /// Published network identity.
    pub network_id: Option<String>,
    /// A create-and-join is waiting for the local user.
    pub queued_create: bool,
    /// A join is waiting for the local user.
    pub queued_join: bool,
    /// A leave is in flight.
    pub leaving: bool,
}

impl SessionSnapshot {
    /// Capture the observable state of `session`.
    pub fn capture<E, I, P>(peer: usize, session: &Session<E, I, P>) -> Self
    where
        E: Engine,
        I: IdentityProvider,
        P: PolicyProvider,
    {
        let local = session.local_participant();
        let requests = session.pending_requests();
        Self {
            peer,
            stage: session.connection_stage(),
            local_entity_id: local.entity_id().clone(),
            local_endpoint: local.endpoint().map(|h| h.raw()),
            local_chat_control: local.chat_control().map(|h| h.raw()),
            remotes: session.remote_participants().iter().map(ParticipantSnapshot::from).collect(),
            network_id: session.network_id().map(ToString::to_string),
            queued_create: requests.queued_create().is_some(),
            queued_join: requests.queued_join().is_some(),
            leaving: session.is_leaving(),
        }
    }

    /// Remote identities mapped to how often they appear.
    pub fn remote_counts(&self) -> BTreeMap<&EntityId, usize> {
        let mut counts = BTreeMap::new();
        for remote in &self.remotes {
            *counts.entry(&remote.entity_id).or_insert(0) += 1;
        }
        counts
    }
}

/// Engine handles of a participant, as raw values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParticipantHandles {
    /// Endpoint handle.
    pub endpoint: Option<u64>,
    /// Chat control handle.
    pub chat_control: Option<u64>,
}

/// Snapshot of a remote participant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParticipantSnapshot {
    /// Stable identity.
    pub entity_id: EntityId,
    /// Endpoint handle.
    pub endpoint: Option<u64>,
    /// Chat control handle.
    pub chat_control: Option<u64>,
    /// Platform identity, once exchanged.
    pub platform_id: Option<String>,
    /// Muted locally or by the platform.
    pub muted: bool,
    /// Handles seen in the previous snapshot, if the participant was there.
    pub previous: Option<ParticipantHandles>,
}

impl ParticipantSnapshot {
    /// Current handles.
    pub fn handles(&self) -> ParticipantHandles {
        ParticipantHandles { endpoint: self.endpoint, chat_control: self.chat_control }
    }
}

impl From<&Participant> for ParticipantSnapshot {
    fn from(participant: &Participant) -> Self {
        Self {
            entity_id: participant.entity_id().clone(),
            endpoint: participant.endpoint().map(|h| h.raw()),
            chat_control: participant.chat_control().map(|h| h.raw()),
            platform_id: participant.platform_id().map(str::to_owned),
            muted: participant.is_muted(),
            previous: None,
        }
    }
}
