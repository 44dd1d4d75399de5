//! Platform policy seam.
//!
//! A policy provider lets a platform take part in sign-in, exchange
//! platform identities between peers and decide chat permissions. The
//! provider is chosen once when the session is built; [`NoPolicy`] is the
//! default and allows everything.
//!
//! Policy callbacks run inside the session's tick and receive a
//! [`PolicyContext`] lending them the engine and the roster. Anything a
//! callback needs to report back (a sign-in result, an error) is recorded on
//! the context and applied by the session once the callback returns.

mod platform;

pub use platform::{
    IDENTITY_MESSAGE_PREFIX, PermissionUpdate, PlatformBackend, PlatformNotice, PlatformPolicy,
};

use crate::{
    config::DeliveryOption,
    engine::{ChatPermissions, Engine, EndpointHandle, SendOptions, TranscriptionOptions},
    error::SessionError,
    identity::{IdentityError, LocalIdentity},
    roster::{EntityId, Participant, Roster},
    state::ConnectionStage,
};

/// Borrowed session state handed to policy callbacks.
pub struct PolicyContext<'a> {
    engine: &'a mut dyn Engine,
    roster: &'a mut Roster,
    stage: ConnectionStage,
    sign_in: Option<Result<LocalIdentity, IdentityError>>,
    errors: Vec<SessionError>,
}

/// What a policy callback left on its context.
#[derive(Debug, Default)]
pub struct PolicyOutcome {
    /// Sign-in result reported during the callback.
    pub sign_in: Option<Result<LocalIdentity, IdentityError>>,
    /// Errors to surface to the host.
    pub errors: Vec<SessionError>,
}

impl<'a> PolicyContext<'a> {
    /// Create a context over the session's engine and roster.
    pub fn new(engine: &'a mut dyn Engine, roster: &'a mut Roster, stage: ConnectionStage) -> Self {
        Self { engine, roster, stage, sign_in: None, errors: Vec::new() }
    }

    /// The engine.
    pub fn engine(&mut self) -> &mut dyn Engine {
        &mut *self.engine
    }

    /// The roster.
    pub fn roster(&self) -> &Roster {
        &*self.roster
    }

    /// Mutable roster.
    pub fn roster_mut(&mut self) -> &mut Roster {
        &mut *self.roster
    }

    /// Current connection stage.
    pub fn stage(&self) -> ConnectionStage {
        self.stage
    }

    /// Report the outcome of [`PolicyProvider::sign_in`].
    pub fn complete_sign_in(&mut self, result: Result<LocalIdentity, IdentityError>) {
        self.sign_in = Some(result);
    }

    /// Surface an error to the host.
    pub fn report(&mut self, err: SessionError) {
        self.errors.push(err);
    }

    /// Send an internal data message from the local endpoint.
    ///
    /// Recipients without an endpoint are skipped. The message is not sent
    /// if none of them has one.
    pub fn send_data(
        &mut self,
        targets: &[EntityId],
        payload: &[u8],
        delivery: DeliveryOption,
    ) -> Result<(), SessionError> {
        let local = self.roster.local().endpoint().ok_or(SessionError::NotConnected {
            stage: self.stage,
        })?;

        let endpoints: Vec<EndpointHandle> = targets
            .iter()
            .filter_map(|id| self.roster.remote(id).and_then(Participant::endpoint))
            .collect();
        if endpoints.is_empty() {
            return Ok(());
        }

        self.engine
            .send_message(local, &endpoints, SendOptions::from(delivery), payload)
            .map_err(|source| SessionError::Engine { operation: "send_message", source })
    }

    /// Push the platform-required permissions for `target` and mirror the
    /// derived mute flag onto the roster.
    ///
    /// A target is muted by the platform whenever the mask is not
    /// [`ChatPermissions::ALL`].
    pub fn apply_platform_permissions(
        &mut self,
        target: &EntityId,
        permissions: ChatPermissions,
    ) -> Result<(), SessionError> {
        let local = self.roster.local().chat_control().ok_or(SessionError::NoLocalUser)?;
        let participant = self
            .roster
            .remote_mut(target)
            .ok_or_else(|| SessionError::ParticipantNotFound { entity_id: target.clone() })?;
        let control = participant
            .chat_control()
            .ok_or_else(|| SessionError::ParticipantNotFound { entity_id: target.clone() })?;

        let muted = permissions != ChatPermissions::ALL;
        participant.set_muted_by_platform(muted);
        participant.set_muted(muted);

        self.engine
            .set_permissions(local, control, permissions)
            .map_err(|source| SessionError::Engine { operation: "set_permissions", source })?;
        self.engine
            .set_incoming_audio_muted(local, control, muted)
            .map_err(|source| SessionError::Engine {
                operation: "set_incoming_audio_muted",
                source,
            })
    }

    /// Consume the context, returning what callbacks recorded on it.
    pub fn into_outcome(self) -> PolicyOutcome {
        PolicyOutcome { sign_in: self.sign_in, errors: self.errors }
    }
}

/// Platform-specific participation in the session.
///
/// Every method has a default that allows everything and does nothing, so
/// providers override only what their platform needs.
pub trait PolicyProvider {
    /// `true` if [`Self::sign_in`] replaces the identity provider.
    fn handles_sign_in(&self) -> bool {
        false
    }

    /// Start platform sign-in. The result is reported later through
    /// [`PolicyContext::complete_sign_in`].
    fn sign_in(&mut self, _ctx: &mut PolicyContext<'_>) {}

    /// A participant became known (or the local one signed in).
    fn create_or_update_platform_user(
        &mut self,
        _ctx: &mut PolicyContext<'_>,
        _entity_id: &EntityId,
        _is_local: bool,
    ) {
    }

    /// Tell `targets` the local platform identity.
    fn send_platform_identity(&mut self, _ctx: &mut PolicyContext<'_>, _targets: &[EntityId]) {}

    /// Permissions to grant a remote chat control.
    fn chat_permissions(&self, _target: &Participant) -> ChatPermissions {
        ChatPermissions::ALL
    }

    /// Transcription options when speech-to-text follows the platform.
    fn transcription_preference(&self) -> TranscriptionOptions {
        TranscriptionOptions::OTHERS_MATCHING_LANGUAGE
    }

    /// Whether text-to-speech is on when it follows the platform.
    fn is_text_to_speech_enabled(&self) -> bool {
        false
    }

    /// First refusal on an incoming data message.
    ///
    /// Returns `true` if the message was an internal exchange and must not
    /// reach the host.
    fn process_endpoint_message(
        &mut self,
        _ctx: &mut PolicyContext<'_>,
        _from: &EntityId,
        _payload: &[u8],
    ) -> bool {
        false
    }

    /// Release queued policy work whose precondition now holds.
    fn process_queued_operations(&mut self, _ctx: &mut PolicyContext<'_>) {}

    /// Drain platform notifications.
    fn process_state_changes(&mut self, _ctx: &mut PolicyContext<'_>) {}

    /// Drop all platform state. Returns `false` if the platform refused.
    fn clean_up(&mut self) -> bool {
        true
    }
}

/// Policy that allows everything and never intervenes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPolicy;

impl PolicyProvider for NoPolicy {}
