//! Participant roster.
//!
//! The roster owns the local participant and the remote participants of the
//! current network, in join order. Remote entries are keyed by their stable
//! [`EntityId`]; no two entries share an identity, and no remote entry ever
//! carries the local identity.
//!
//! Engine handles on a participant are set once. Re-attaching a different
//! handle is refused. The local endpoint is dropped when its network goes
//! away; every other handle is dropped only at session end.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::{ChatControlHandle, EndpointHandle};

/// Stable identity of a participant, assigned by the identity backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if no identity has been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Local or remote member of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    entity_id: EntityId,
    is_local: bool,
    chat_control: Option<ChatControlHandle>,
    endpoint: Option<EndpointHandle>,
    platform_id: Option<String>,
    is_muted: bool,
    muted_by_platform: bool,
    voice_level: f32,
}

impl Participant {
    /// Default render volume for a new participant.
    pub const DEFAULT_VOICE_LEVEL: f32 = 1.0;

    /// Create the local participant. Its identity is filled in at login.
    pub fn local() -> Self {
        Self::with_locality(EntityId::default(), true)
    }

    /// Create a remote participant.
    pub fn remote(entity_id: EntityId) -> Self {
        Self::with_locality(entity_id, false)
    }

    fn with_locality(entity_id: EntityId, is_local: bool) -> Self {
        Self {
            entity_id,
            is_local,
            chat_control: None,
            endpoint: None,
            platform_id: None,
            is_muted: false,
            muted_by_platform: false,
            voice_level: Self::DEFAULT_VOICE_LEVEL,
        }
    }

    /// Stable identity.
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// `true` for the participant on this device.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Chat control handle. `None` until the engine has created it.
    pub fn chat_control(&self) -> Option<ChatControlHandle> {
        self.chat_control
    }

    /// Data endpoint handle. `None` until the engine has created it.
    pub fn endpoint(&self) -> Option<EndpointHandle> {
        self.endpoint
    }

    /// Platform-specific identity, if exchanged.
    pub fn platform_id(&self) -> Option<&str> {
        self.platform_id.as_deref()
    }

    /// Whether audio from (or, for the local participant, to) this
    /// participant is muted.
    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    /// Whether the platform policy forced the mute.
    pub fn is_muted_by_platform(&self) -> bool {
        self.muted_by_platform
    }

    /// Render volume in `[0, 1]`.
    pub fn voice_level(&self) -> f32 {
        self.voice_level
    }

    /// Record the platform identity received for this participant.
    pub fn set_platform_id(&mut self, platform_id: impl Into<String>) {
        self.platform_id = Some(platform_id.into());
    }

    /// Attach the chat control handle.
    ///
    /// Returns `false` if a different handle is already attached; the
    /// existing handle is kept.
    pub fn attach_chat_control(&mut self, handle: ChatControlHandle) -> bool {
        match self.chat_control {
            Some(existing) => existing == handle,
            None => {
                self.chat_control = Some(handle);
                true
            },
        }
    }

    /// Attach the endpoint handle. Same set-once rule as
    /// [`Self::attach_chat_control`].
    pub fn attach_endpoint(&mut self, handle: EndpointHandle) -> bool {
        match self.endpoint {
            Some(existing) => existing == handle,
            None => {
                self.endpoint = Some(handle);
                true
            },
        }
    }

    /// Drop both engine handles.
    pub(crate) fn clear_handles(&mut self) {
        self.chat_control = None;
        self.endpoint = None;
    }

    pub(crate) fn clear_endpoint(&mut self) {
        self.endpoint = None;
    }

    pub(crate) fn set_entity_id(&mut self, entity_id: EntityId) {
        self.entity_id = entity_id;
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        self.is_muted = muted;
    }

    pub(crate) fn set_muted_by_platform(&mut self, muted: bool) {
        self.muted_by_platform = muted;
    }

    pub(crate) fn set_voice_level(&mut self, level: f32) {
        self.voice_level = level;
    }
}

/// Local participant plus remote participants in join order.
#[derive(Debug, Clone)]
pub struct Roster {
    local: Participant,
    remotes: Vec<Participant>,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    /// Create a roster holding only an anonymous local participant.
    pub fn new() -> Self {
        Self { local: Participant::local(), remotes: Vec::new() }
    }

    /// The local participant.
    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Mutable access to the local participant.
    pub fn local_mut(&mut self) -> &mut Participant {
        &mut self.local
    }

    /// Remote participants in join order.
    pub fn remotes(&self) -> &[Participant] {
        &self.remotes
    }

    /// Number of remote participants.
    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    /// `true` if there are no remote participants.
    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// `true` if `entity_id` is the local identity.
    pub fn is_local_identity(&self, entity_id: &EntityId) -> bool {
        !self.local.entity_id.is_empty() && self.local.entity_id == *entity_id
    }

    /// Remote participant by identity.
    pub fn remote(&self, entity_id: &EntityId) -> Option<&Participant> {
        self.remotes.iter().find(|p| p.entity_id == *entity_id)
    }

    /// Mutable remote participant by identity.
    pub fn remote_mut(&mut self, entity_id: &EntityId) -> Option<&mut Participant> {
        self.remotes.iter_mut().find(|p| p.entity_id == *entity_id)
    }

    /// Any participant by identity, local included.
    pub fn participant(&self, entity_id: &EntityId) -> Option<&Participant> {
        if self.is_local_identity(entity_id) {
            return Some(&self.local);
        }
        self.remote(entity_id)
    }

    /// Participant (local included) whose platform identity is `platform_id`.
    pub fn by_platform_id(&self, platform_id: &str) -> Option<&Participant> {
        std::iter::once(&self.local)
            .chain(self.remotes.iter())
            .find(|p| p.platform_id() == Some(platform_id))
    }

    /// Add a remote participant.
    ///
    /// Returns `false` and leaves the roster untouched if the identity is
    /// already present or is the local identity.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if participant.is_local
            || self.is_local_identity(&participant.entity_id)
            || self.remote(&participant.entity_id).is_some()
        {
            return false;
        }
        self.remotes.push(participant);
        true
    }

    /// Remove a remote participant, returning it if present.
    pub fn remove(&mut self, entity_id: &EntityId) -> Option<Participant> {
        let index = self.remotes.iter().position(|p| p.entity_id == *entity_id)?;
        Some(self.remotes.remove(index))
    }

    /// Refill `out` with the chat control handles of every remote that has
    /// one, reusing its allocation.
    pub fn collect_chat_controls(&self, out: &mut Vec<ChatControlHandle>) {
        out.clear();
        out.extend(self.remotes.iter().filter_map(Participant::chat_control));
    }

    /// Drop all remote participants and the local participant's handles.
    ///
    /// The local participant keeps its identity and preferences.
    pub(crate) fn reset(&mut self) {
        self.remotes.clear();
        self.local.clear_handles();
    }
}
