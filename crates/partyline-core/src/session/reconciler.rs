//! Engine state change reconciliation.
//!
//! Once the local user exists, every advance drains the engine's queue,
//! applies each state change to the session in order and hands the batch
//! back to the engine exactly once.

use bytes::Bytes;

use super::Session;
use crate::{
    config::LogLevel,
    engine::{
        AudioDevice, AudioDirection, ChatControlHandle, EndpointHandle, Engine, EngineError,
        EngineOperation, NetworkHandle, PhraseType, StateChange, StateChangeResult,
    },
    error::SessionError,
    event::{ChatMessageType, SessionEvent},
    identity::IdentityProvider,
    policy::PolicyProvider,
    roster::{EntityId, Participant},
    state::ConnectionStage,
};

/// Prefix shared by every internal exchange message.
const INTERNAL_MESSAGE_PREFIX: &[u8] = b"PFP-";

/// Internal exchange messages are shorter than this.
const INTERNAL_MESSAGE_MAX_LEN: usize = 128;

impl<E, I, P> Session<E, I, P>
where
    E: Engine,
    I: IdentityProvider,
    P: PolicyProvider,
{
    pub(super) fn reconcile(&mut self) {
        if self.stage < ConnectionStage::LocalUserCreated {
            return;
        }
        let Some(engine) = self.engine_handle else {
            return;
        };

        let result = self.engine.drain_state_changes(engine);
        let Ok(changes) = self.check("drain_state_changes", result) else {
            return;
        };

        for change in &changes {
            self.apply_state_change(change);
        }

        let result = self.engine.finish_processing_state_changes(engine, changes);
        let _ = self.check("finish_processing_state_changes", result);
    }

    fn apply_state_change(&mut self, change: &StateChange) {
        if self.logs(LogLevel::Verbose) {
            tracing::debug!(?change, "state change");
        }

        match change {
            StateChange::Completed { operation, result } => {
                self.on_completed(*operation, result);
            },
            StateChange::ConnectToNetworkCompleted { network, descriptor, result } => {
                if let Some(source) = result.error() {
                    self.surface_completion("connect_to_network", source);
                    self.clear_connect_attempt();
                    return;
                }
                self.descriptor = Some(descriptor.clone());
                self.publish_network_id();
                self.authenticate(*network);
            },
            StateChange::LeaveNetworkCompleted { result } => {
                self.leaving = false;
                if let Some(source) = result.error() {
                    self.surface_completion("leave_network", source);
                    return;
                }
                // Teardown may already have reported the departure.
                let Some(network_id) = self.network_id.take() else {
                    return;
                };
                if self.logs(LogLevel::Minimal) {
                    tracing::info!(%network_id, "left network");
                }
                self.events.push(SessionEvent::NetworkLeft { network_id: Some(network_id) });
            },
            StateChange::NetworkDestroyed { reason } => self.on_network_destroyed(reason.as_ref()),
            StateChange::NetworkDescriptorChanged { network } => {
                self.on_descriptor_changed(*network);
            },
            StateChange::EndpointCreated { endpoint, entity_id, is_local } => {
                if !*is_local {
                    self.on_remote_endpoint(*endpoint, entity_id);
                }
            },
            StateChange::EndpointDestroyed { endpoint, entity_id, reason } => {
                self.on_endpoint_destroyed(*endpoint, entity_id, reason.as_ref());
            },
            StateChange::ChatControlCreated { control, entity_id, is_local } => {
                if !*is_local {
                    self.on_remote_chat_control(*control, entity_id);
                }
            },
            StateChange::ChatControlDestroyed { control, reason } => {
                tracing::debug!(control = control.raw(), ?reason, "chat control destroyed");
                self.rebuild_chat_controls();
            },
            StateChange::EndpointMessageReceived { sender_entity_id, payload, .. } => {
                self.on_endpoint_message(sender_entity_id, payload);
            },
            StateChange::ChatTextReceived { sender_entity_id, text, translations, .. } => {
                let message = translations.first().unwrap_or(text).clone();
                self.raise_chat(sender_entity_id, message, ChatMessageType::Text, false);
            },
            StateChange::TranscriptionReceived {
                speaker_entity_id,
                result,
                phrase,
                transcription,
                translations,
            } => {
                if let Some(source) = result.error() {
                    self.surface_completion("transcription", source);
                    return;
                }
                if *phrase != PhraseType::Final {
                    return;
                }
                let message = translations.first().unwrap_or(transcription).clone();
                self.raise_chat(speaker_entity_id, message, ChatMessageType::SpeechToText, true);
            },
            StateChange::AudioDeviceChanged { direction, result } => {
                self.on_audio_device_changed(*direction, result);
            },
            StateChange::Other { kind } => {
                tracing::debug!(kind = %kind, "unhandled state change");
            },
        }
    }

    fn on_completed(&mut self, operation: EngineOperation, result: &StateChangeResult) {
        if let Some(source) = result.error() {
            self.surface_completion(operation_name(operation), source);
            if operation == EngineOperation::CreateNetwork {
                self.clear_connect_attempt();
            }
            return;
        }

        if operation == EngineOperation::AuthenticateLocalUser {
            self.on_authenticated();
        }
    }

    /// Authenticate on a freshly connected network and attach the local
    /// endpoint and chat control.
    fn authenticate(&mut self, network: NetworkHandle) {
        let (Some(user), Some(control)) = (self.local_user, self.roster.local().chat_control())
        else {
            self.surface(&SessionError::NoLocalUser);
            return;
        };
        let invitation_id = self.invitation_id.clone().unwrap_or_default();

        let result = self.engine.authenticate_local_user(network, user, &invitation_id);
        if self.check("authenticate_local_user", result).is_err() {
            return;
        }

        let result = self.engine.create_endpoint(network, user);
        if let Ok(endpoint) = self.check("create_endpoint", result)
            && !self.roster.local_mut().attach_endpoint(endpoint)
        {
            tracing::warn!(endpoint = endpoint.raw(), "local endpoint already attached");
        }

        let result = self.engine.connect_chat_control(network, control);
        let _ = self.check("connect_chat_control", result);
    }

    fn on_authenticated(&mut self) {
        if self.leaving || self.network.is_none() {
            tracing::debug!("authentication completed for a network being left");
            return;
        }

        self.set_stage(ConnectionStage::LocalUserAuthenticated);
        if let Some(control) = self.roster.local().chat_control() {
            let result = self.engine.set_audio_input(control, &AudioDevice::SystemDefault);
            let _ = self.check("set_audio_input", result);
            let result = self.engine.set_audio_output(control, &AudioDevice::SystemDefault);
            let _ = self.check("set_audio_output", result);
        }
        self.set_stage(ConnectionStage::ConnectedToNetwork);
        let _ = self.push_chat_options();

        if let Some(network_id) = self.network_id.clone() {
            if self.logs(LogLevel::Minimal) {
                tracing::info!(%network_id, "joined network");
            }
            self.events.push(SessionEvent::NetworkJoined { network_id });
        }
    }

    fn on_network_destroyed(&mut self, reason: Option<&EngineError>) {
        if let Some(source) = reason {
            self.surface_completion("network_destroyed", source);
        }

        self.leaving = false;
        self.network = None;
        self.descriptor = None;
        self.invitation_id = None;
        self.roster.local_mut().clear_endpoint();
        self.chat_controls.clear();

        let departed: Vec<EntityId> =
            self.roster.remotes().iter().map(|p| p.entity_id().clone()).collect();
        for entity_id in departed {
            if let Some(participant) = self.roster.remove(&entity_id) {
                self.events.push(SessionEvent::RemoteLeft { participant });
            }
        }
        if let Some(network_id) = self.network_id.take() {
            self.events.push(SessionEvent::NetworkLeft { network_id: Some(network_id) });
        }

        self.set_stage(ConnectionStage::Initialized);

        // A request that forced the leave runs again from the start.
        if reason.is_none()
            && let Some(request) = self.after_leave.release()
        {
            self.requests.stage(request);
        } else {
            self.after_leave.cancel();
        }
    }

    fn on_descriptor_changed(&mut self, network: NetworkHandle) {
        if self.leaving {
            return;
        }

        let result = self.engine.network_descriptor(network);
        let Ok(descriptor) = self.check("network_descriptor", result) else {
            return;
        };
        let result = self.engine.network_invitation_id(network);
        if let Ok(Some(invitation_id)) = self.check("network_invitation_id", result) {
            self.invitation_id = Some(invitation_id);
        }

        self.descriptor = Some(descriptor);
        if self.publish_network_id()
            && let Some(network_id) = self.network_id.clone()
        {
            self.events.push(SessionEvent::NetworkChanged { network_id });
        }
    }

    fn on_remote_endpoint(&mut self, endpoint: EndpointHandle, entity_id: &EntityId) {
        if self.roster.is_local_identity(entity_id) {
            return;
        }
        if let Some(existing) = self.roster.remote_mut(entity_id) {
            if !existing.attach_endpoint(endpoint) {
                tracing::warn!(entity_id = %entity_id, "participant already has an endpoint");
            }
            return;
        }

        let mut participant = Participant::remote(entity_id.clone());
        participant.attach_endpoint(endpoint);
        self.roster.insert(participant);

        let targets = [entity_id.clone()];
        self.call_policy(|policy, ctx| {
            policy.create_or_update_platform_user(ctx, &targets[0], false);
            policy.send_platform_identity(ctx, &targets);
        });

        if let Some(participant) = self.roster.remote(entity_id) {
            if self.logs(LogLevel::Minimal) {
                tracing::info!(entity_id = %entity_id, "remote participant joined");
            }
            self.events.push(SessionEvent::RemoteJoined { participant: participant.clone() });
        }
    }

    fn on_endpoint_destroyed(
        &mut self,
        endpoint: EndpointHandle,
        entity_id: &EntityId,
        reason: Option<&EngineError>,
    ) {
        if let Some(reason) = reason {
            tracing::debug!(entity_id = %entity_id, %reason, "endpoint destroyed");
        }

        if self.roster.local().endpoint() == Some(endpoint) {
            self.roster.local_mut().clear_endpoint();
            return;
        }
        let Some(participant) = self.roster.remove(entity_id) else {
            return;
        };

        if self.logs(LogLevel::Minimal) {
            tracing::info!(entity_id = %entity_id, "remote participant left");
        }
        self.rebuild_chat_controls();
        self.events.push(SessionEvent::RemoteLeft { participant });
    }

    fn on_remote_chat_control(&mut self, control: ChatControlHandle, entity_id: &EntityId) {
        let Some(participant) = self.roster.remote_mut(entity_id) else {
            tracing::debug!(entity_id = %entity_id, "chat control for unknown participant");
            return;
        };
        if !participant.attach_chat_control(control) {
            tracing::warn!(entity_id = %entity_id, "participant already has a chat control");
            return;
        }
        self.rebuild_chat_controls();

        let Some(participant) = self.roster.remote(entity_id) else {
            return;
        };
        if participant.is_muted() {
            return;
        }
        let permissions = self.policy.chat_permissions(participant);
        let Some(local) = self.roster.local().chat_control() else {
            return;
        };
        let result = self.engine.set_permissions(local, control, permissions);
        let _ = self.check("set_permissions", result);
    }

    fn on_endpoint_message(&mut self, sender: &EntityId, payload: &[u8]) {
        if self.roster.remote(sender).is_none() {
            self.surface(&SessionError::ParticipantNotFound { entity_id: sender.clone() });
            return;
        }

        let consumed =
            self.call_policy(|policy, ctx| policy.process_endpoint_message(ctx, sender, payload));
        if consumed || is_internal_message(payload) {
            return;
        }

        let Some(from) = self.roster.remote(sender) else {
            return;
        };
        if let Some(listener) = self.data_listener.as_mut() {
            listener(from, payload);
        }
        if self.config.copy_data_messages {
            self.events.push(SessionEvent::DataReceived {
                from: from.clone(),
                payload: Bytes::copy_from_slice(payload),
            });
        }
    }

    fn raise_chat(
        &mut self,
        sender: &EntityId,
        message: String,
        kind: ChatMessageType,
        allow_local: bool,
    ) {
        let from = if allow_local {
            self.roster.participant(sender)
        } else {
            self.roster.remote(sender)
        };
        let Some(from) = from.cloned() else {
            self.surface(&SessionError::ParticipantNotFound { entity_id: sender.clone() });
            return;
        };
        self.events.push(SessionEvent::ChatReceived { from, message, kind });
    }

    fn on_audio_device_changed(&mut self, direction: AudioDirection, result: &StateChangeResult) {
        let Some(source) = result.error() else {
            return;
        };
        if source.code == EngineError::RESOURCE_NOT_FOUND {
            self.surface(&SessionError::NoAudioDevice { direction });
        } else {
            self.surface_completion("set_audio_device", source);
        }
    }

    fn surface_completion(&mut self, operation: &'static str, source: &EngineError) {
        self.surface(&SessionError::Completion { operation, source: source.clone() });
    }
}

fn operation_name(operation: EngineOperation) -> &'static str {
    match operation {
        EngineOperation::CreateNetwork => "create_network",
        EngineOperation::AuthenticateLocalUser => "authenticate_local_user",
        EngineOperation::CreateEndpoint => "create_endpoint",
        EngineOperation::DestroyEndpoint => "destroy_endpoint",
        EngineOperation::CreateChatControl => "create_chat_control",
        EngineOperation::ConnectChatControl => "connect_chat_control",
        EngineOperation::DestroyChatControl => "destroy_chat_control",
        EngineOperation::DestroyLocalUser => "destroy_local_user",
        EngineOperation::SetTranscriptionOptions => "set_transcription_options",
        EngineOperation::SetTextChatOptions => "set_text_chat_options",
        EngineOperation::SynthesizeTextToSpeech => "synthesize_text_to_speech",
        EngineOperation::SendText => "send_text",
    }
}

/// Internal exchange messages never reach the host, even without a policy
/// provider to consume them.
fn is_internal_message(payload: &[u8]) -> bool {
    payload.len() < INTERNAL_MESSAGE_MAX_LEN && payload.starts_with(INTERNAL_MESSAGE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::IDENTITY_MESSAGE_PREFIX;

    #[test]
    fn internal_messages_are_short_prefixed_payloads() {
        assert!(is_internal_message(format!("{IDENTITY_MESSAGE_PREFIX}42").as_bytes()));
        assert!(is_internal_message(b"PFP-"));
        assert!(!is_internal_message(b"game state"));
        assert!(!is_internal_message(b"PFP"));

        let long = format!("PFP-{}", "x".repeat(INTERNAL_MESSAGE_MAX_LEN));
        assert!(!is_internal_message(long.as_bytes()));
    }
}
