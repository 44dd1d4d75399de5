//! Data, chat and per-participant audio settings.

use super::Session;
use crate::{
    config::{AccessibilityMode, DeliveryOption, LogLevel, MAX_RECIPIENTS},
    engine::{
        ChatControlHandle, ChatIndicator, ChatPermissions, EndpointHandle, Engine, SendOptions,
    },
    error::SessionError,
    event::ChatState,
    identity::IdentityProvider,
    policy::PolicyProvider,
    roster::{EntityId, Participant},
};

impl<E, I, P> Session<E, I, P>
where
    E: Engine,
    I: IdentityProvider,
    P: PolicyProvider,
{
    /// Send a data message to every remote participant, guaranteed and in
    /// order.
    pub fn send_data_to_all(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        self.send_data(payload, &[], DeliveryOption::Guaranteed)
    }

    /// Send a data message.
    ///
    /// An empty `recipients` slice broadcasts. Recipients without an
    /// endpoint are skipped; if none of them has one the send fails with
    /// [`SessionError::ParticipantNotFound`].
    pub fn send_data(
        &mut self,
        payload: &[u8],
        recipients: &[EntityId],
        delivery: DeliveryOption,
    ) -> Result<(), SessionError> {
        if payload.is_empty() {
            return self.reject(SessionError::EmptyPayload);
        }
        if recipients.len() > MAX_RECIPIENTS {
            return self.reject(SessionError::TooManyRecipients {
                count: recipients.len(),
                max: MAX_RECIPIENTS,
            });
        }
        let Some(local) = self.connected_endpoint() else {
            return self.reject(SessionError::NotConnected { stage: self.stage });
        };

        self.endpoint_scratch.clear();
        for entity_id in recipients {
            match self.roster.remote(entity_id).and_then(Participant::endpoint) {
                Some(endpoint) => self.endpoint_scratch.push(endpoint),
                None => tracing::warn!(entity_id = %entity_id, "recipient has no endpoint"),
            }
        }
        if let Some(first) = recipients.first()
            && self.endpoint_scratch.is_empty()
        {
            return self.reject(SessionError::ParticipantNotFound { entity_id: first.clone() });
        }

        let result = self.engine.send_message(
            local,
            &self.endpoint_scratch,
            SendOptions::from(delivery),
            payload,
        );
        self.check("send_message", result)
    }

    /// Send a chat message to every remote participant.
    pub fn send_chat_to_all(&mut self, message: &str) -> Result<(), SessionError> {
        let local = self.connected_chat_control()?;
        if self.chat_controls.is_empty() {
            return Ok(());
        }

        self.speak(local, message)?;
        let result = self.engine.send_text(local, &self.chat_controls, message);
        self.check("send_text", result)
    }

    /// Send a chat message to some remote participants.
    ///
    /// Nothing is sent if `recipients` is empty or none of them has a chat
    /// control yet.
    pub fn send_chat(
        &mut self,
        message: &str,
        recipients: &[EntityId],
    ) -> Result<(), SessionError> {
        let local = self.connected_chat_control()?;
        if recipients.len() > MAX_RECIPIENTS {
            return self.reject(SessionError::TooManyRecipients {
                count: recipients.len(),
                max: MAX_RECIPIENTS,
            });
        }
        if recipients.is_empty() {
            tracing::warn!("chat message has no recipients");
            return Ok(());
        }

        self.control_scratch.clear();
        self.control_scratch.extend(
            recipients
                .iter()
                .filter_map(|id| self.roster.remote(id).and_then(Participant::chat_control)),
        );
        if self.control_scratch.is_empty() {
            return Ok(());
        }

        self.speak(local, message)?;
        let result = self.engine.send_text(local, &self.control_scratch, message);
        self.check("send_text", result)
    }

    /// Mute or unmute a participant.
    ///
    /// For the local participant this mutes the microphone. For a remote it
    /// mutes incoming audio and withdraws every chat permission; unmuting
    /// grants what the policy provider allows.
    pub fn set_muted(&mut self, entity_id: &EntityId, muted: bool) -> Result<(), SessionError> {
        if self.roster.is_local_identity(entity_id) {
            return self.set_local_muted(muted);
        }

        let Some(participant) = self.roster.remote_mut(entity_id) else {
            return self.reject(SessionError::ParticipantNotFound { entity_id: entity_id.clone() });
        };
        participant.set_muted(muted);

        let Some(participant) = self.roster.remote(entity_id) else {
            return Ok(());
        };
        let (Some(local), Some(target)) =
            (self.roster.local().chat_control(), participant.chat_control())
        else {
            return Ok(());
        };
        let permissions =
            if muted { ChatPermissions::NONE } else { self.policy.chat_permissions(participant) };

        let result = self.engine.set_incoming_audio_muted(local, target, muted);
        self.check("set_incoming_audio_muted", result)?;
        let result = self.engine.set_permissions(local, target, permissions);
        self.check("set_permissions", result)
    }

    /// Mute or unmute the local microphone. Usable before sign-in.
    pub fn set_local_muted(&mut self, muted: bool) -> Result<(), SessionError> {
        self.roster.local_mut().set_muted(muted);
        let Some(control) = self.roster.local().chat_control() else {
            return Ok(());
        };
        let result = self.engine.set_audio_input_muted(control, muted);
        self.check("set_audio_input_muted", result)
    }

    /// Set a participant's volume, in `[0, 1]`.
    ///
    /// For the local participant this is the input volume, otherwise the
    /// render volume of the remote.
    pub fn set_voice_level(
        &mut self,
        entity_id: &EntityId,
        level: f32,
    ) -> Result<(), SessionError> {
        if self.roster.is_local_identity(entity_id) {
            return self.set_local_voice_level(level);
        }

        self.validate_voice_level(level)?;
        let Some(participant) = self.roster.remote_mut(entity_id) else {
            return self.reject(SessionError::ParticipantNotFound { entity_id: entity_id.clone() });
        };
        participant.set_voice_level(level);
        let target = participant.chat_control();

        let (Some(local), Some(target)) = (self.roster.local().chat_control(), target) else {
            return Ok(());
        };
        let result = self.engine.set_audio_render_volume(local, target, level);
        self.check("set_audio_render_volume", result)
    }

    /// Set the local input volume, in `[0, 1]`. Usable before sign-in.
    pub fn set_local_voice_level(&mut self, level: f32) -> Result<(), SessionError> {
        self.validate_voice_level(level)?;
        self.roster.local_mut().set_voice_level(level);

        let Some(control) = self.roster.local().chat_control() else {
            return Ok(());
        };
        let result = self.engine.set_audio_render_volume(control, control, level);
        self.check("set_audio_render_volume", result)
    }

    /// Talking indicator of a participant.
    pub fn chat_state(&self, entity_id: &EntityId) -> ChatState {
        let Some(local) = self.roster.local().chat_control() else {
            return ChatState::NoAudioInput;
        };

        if self.roster.is_local_identity(entity_id) {
            return match self.engine.local_chat_indicator(local) {
                Ok(ChatIndicator::NoAudioInput) => ChatState::NoAudioInput,
                Ok(ChatIndicator::InputMuted) => ChatState::Muted,
                Ok(ChatIndicator::Talking) => ChatState::Talking,
                Ok(_) => ChatState::Silent,
                Err(err) => {
                    tracing::debug!(%err, "local chat indicator unavailable");
                    ChatState::NoAudioInput
                },
            };
        }

        let Some(participant) = self.roster.remote(entity_id) else {
            return ChatState::NoAudioInput;
        };
        let Some(target) = participant.chat_control() else {
            return ChatState::NoAudioInput;
        };
        match self.engine.chat_indicator(local, target) {
            Ok(ChatIndicator::IncomingCommunicationsMuted)
                if participant.is_muted_by_platform() =>
            {
                ChatState::MutedByPlatform
            },
            Ok(
                ChatIndicator::IncomingCommunicationsMuted | ChatIndicator::IncomingVoiceDisabled,
            ) => ChatState::Muted,
            Ok(ChatIndicator::NoAudioInput) => ChatState::NoAudioInput,
            Ok(ChatIndicator::Talking) => ChatState::Talking,
            Ok(_) => ChatState::Silent,
            Err(err) => {
                tracing::debug!(%err, entity_id = %entity_id, "chat indicator unavailable");
                ChatState::NoAudioInput
            },
        }
    }

    /// Speak outgoing chat messages aloud.
    pub fn set_text_to_speech(&mut self, mode: AccessibilityMode) {
        self.config.text_to_speech = mode;
    }

    /// Transcribe incoming voice. Applied at once when connected.
    pub fn set_speech_to_text(&mut self, mode: AccessibilityMode) -> Result<(), SessionError> {
        self.config.speech_to_text = mode;
        self.push_chat_options()
    }

    /// Translate incoming chat and transcriptions. Applied at once when
    /// connected.
    pub fn set_translate_chat(&mut self, translate: bool) -> Result<(), SessionError> {
        self.config.translate_chat = translate;
        self.push_chat_options()
    }

    /// Language for the local chat control.
    ///
    /// Only takes effect if set before the local user is created.
    pub fn set_language(&mut self, language: Option<String>) {
        if self.roster.local().chat_control().is_some() {
            tracing::warn!("language change ignored, chat control already exists");
            return;
        }
        self.config.language = language;
    }

    /// Push transcription and text chat options to the local chat control.
    pub(super) fn push_chat_options(&mut self) -> Result<(), SessionError> {
        if !self.stage.is_connected() {
            return Ok(());
        }
        let Some(control) = self.roster.local().chat_control() else {
            return Ok(());
        };

        let options = self.transcription_options();
        let result = self.engine.set_transcription_options(control, options);
        self.check("set_transcription_options", result)?;

        let options = self.text_chat_options();
        let result = self.engine.set_text_chat_options(control, options);
        self.check("set_text_chat_options", result)?;

        if self.logs(LogLevel::Verbose) {
            tracing::debug!(
                speech_to_text = ?self.config.speech_to_text,
                translate = self.config.translate_chat,
                "chat options applied"
            );
        }
        Ok(())
    }

    /// Rebuild the broadcast chat list from the roster.
    pub(super) fn rebuild_chat_controls(&mut self) {
        self.roster.collect_chat_controls(&mut self.chat_controls);
    }

    fn speak(&mut self, local: ChatControlHandle, message: &str) -> Result<(), SessionError> {
        if !self.text_to_speech_enabled() {
            return Ok(());
        }
        let result = self.engine.synthesize_text_to_speech(local, message);
        self.check("synthesize_text_to_speech", result)
    }

    fn validate_voice_level(&mut self, level: f32) -> Result<(), SessionError> {
        if (0.0..=1.0).contains(&level) {
            return Ok(());
        }
        self.reject(SessionError::VoiceLevelOutOfRange { level })
    }

    fn connected_endpoint(&self) -> Option<EndpointHandle> {
        if !self.stage.is_connected() {
            return None;
        }
        self.roster.local().endpoint()
    }

    fn connected_chat_control(&mut self) -> Result<ChatControlHandle, SessionError> {
        if !self.stage.is_connected() {
            return self.reject(SessionError::NotConnected { stage: self.stage });
        }
        match self.roster.local().chat_control() {
            Some(control) => Ok(control),
            None => self.reject(SessionError::NoLocalUser),
        }
    }
}
