//! Engine boundary.
//!
//! The engine owns transport, audio and permission enforcement. The session
//! holds opaque handles to engine objects and learns about asynchronous
//! completions only through the ordered batch returned by
//! [`Engine::drain_state_changes`], which must be handed back through
//! [`Engine::finish_processing_state_changes`] once processed.
//!
//! Every call reports success or an [`EngineError`]; none of them panic.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::roster::EntityId;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw engine value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw engine value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// Initialized engine instance.
    EngineHandle
);
opaque_handle!(
    /// Local user registered with the engine.
    LocalUserHandle
);
opaque_handle!(
    /// Chat control (voice/text) of a participant.
    ChatControlHandle
);
opaque_handle!(
    /// Network the local device is connected to.
    NetworkHandle
);
opaque_handle!(
    /// Data endpoint of a participant.
    EndpointHandle
);

/// Failure reported by an engine call or carried by a state change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    /// Engine result code.
    pub code: u32,
    /// Engine-provided description.
    pub message: String,
}

impl EngineError {
    /// The engine could not find a requested resource (e.g. an audio device).
    pub const RESOURCE_NOT_FOUND: u32 = 6;
    /// The engine was already initialized.
    pub const ALREADY_INITIALIZED: u32 = 4101;
    /// The target object is already being destroyed.
    pub const OBJECT_BEING_DESTROYED: u32 = 4104;

    /// Create a new engine error.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Returns true if the error reports an object already being torn down.
    ///
    /// During leave this is an expected race, not a failure.
    pub fn is_object_being_destroyed(&self) -> bool {
        self.code == Self::OBJECT_BEING_DESTROYED
    }
}

/// Result of an engine call.
pub type EngineResult<T> = Result<T, EngineError>;

/// Serialized description of a network, produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkDescriptor(Vec<u8>);

impl NetworkDescriptor {
    /// Wrap engine-produced descriptor bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Descriptor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Bit set of chat permissions granted to a remote chat control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChatPermissions(u8);

impl ChatPermissions {
    /// No permissions; what a muted remote receives.
    pub const NONE: Self = Self(0);
    /// Local audio may be sent to the target.
    pub const SEND_AUDIO: Self = Self(0x1);
    /// Audio from the target may be received.
    pub const RECEIVE_AUDIO: Self = Self(0x2);
    /// Text from the target may be received.
    pub const RECEIVE_TEXT: Self = Self(0x4);
    /// All chat permissions.
    pub const ALL: Self = Self(0x1 | 0x2 | 0x4);

    /// Raw bit value.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ChatPermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Which peers may be reached with a direct peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectPeerConnectivity(u8);

impl DirectPeerConnectivity {
    /// Direct connections are never attempted.
    pub const NONE: Self = Self(0);
    /// Peers on the same platform type.
    pub const SAME_PLATFORM_TYPE: Self = Self(0x1);
    /// Peers on a different platform type.
    pub const DIFFERENT_PLATFORM_TYPE: Self = Self(0x2);
    /// Peers on any platform type.
    pub const ANY_PLATFORM_TYPE: Self = Self(0x1 | 0x2);
    /// Peers using the same login provider.
    pub const SAME_ENTITY_LOGIN_PROVIDER: Self = Self(0x4);
    /// Peers using a different login provider.
    pub const DIFFERENT_ENTITY_LOGIN_PROVIDER: Self = Self(0x8);
    /// Peers using any login provider.
    pub const ANY_ENTITY_LOGIN_PROVIDER: Self = Self(0x4 | 0x8);

    /// Raw bit value.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for DirectPeerConnectivity {
    fn default() -> Self {
        Self::ANY_PLATFORM_TYPE | Self::ANY_ENTITY_LOGIN_PROVIDER
    }
}

impl BitOr for DirectPeerConnectivity {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Network limits passed to [`Engine::create_network`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineNetworkConfig {
    /// Maximum number of users in the network.
    pub max_user_count: u32,
    /// Maximum number of devices in the network.
    pub max_device_count: u32,
    /// Maximum number of users per device.
    pub max_users_per_device: u32,
    /// Maximum number of devices per user.
    pub max_devices_per_user: u32,
    /// Maximum number of endpoints per device.
    pub max_endpoints_per_device: u32,
    /// Allowed direct peer connections.
    pub direct_peer_connectivity: DirectPeerConnectivity,
}

/// Initial invitation created together with a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationConfig {
    /// Invitation identifier chosen by the creator.
    pub identifier: String,
}

/// Delivery options for an engine data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SendOptions {
    /// Retransmit until acknowledged.
    pub guaranteed: bool,
    /// Deliver in send order.
    pub sequential: bool,
    /// Allow the engine to coalesce with other pending messages.
    pub coalesce: bool,
}

/// Audio device selection for a chat control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AudioDevice {
    /// Operating system default device.
    SystemDefault,
    /// Default device of the signed-in platform user.
    PlatformUserDefault,
    /// Explicit device identifier.
    Manual(String),
}

/// Direction of a local audio device change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioDirection {
    /// Microphone.
    Input,
    /// Speakers or headset.
    Output,
}

/// Speech-to-text options for the local chat control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TranscriptionOptions {
    /// Transcribe the local participant.
    pub transcribe_self: bool,
    /// Transcribe remotes speaking the local language.
    pub transcribe_others_matching_language: bool,
    /// Transcribe remotes speaking another language.
    pub transcribe_others_other_language: bool,
    /// Translate transcriptions into the local language.
    pub translate_to_local_language: bool,
}

impl TranscriptionOptions {
    /// Transcription disabled.
    pub const NONE: Self = Self {
        transcribe_self: false,
        transcribe_others_matching_language: false,
        transcribe_others_other_language: false,
        translate_to_local_language: false,
    };

    /// Transcribe other participants that share the local language.
    pub const OTHERS_MATCHING_LANGUAGE: Self =
        Self { transcribe_others_matching_language: true, ..Self::NONE };
}

/// Text chat options for the local chat control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextChatOptions {
    /// Translate incoming text into the local language.
    pub translate_to_local_language: bool,
}

/// Talking indicator reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatIndicator {
    /// No audio is flowing.
    Silent,
    /// Audio is flowing.
    Talking,
    /// The local chat control has no input device.
    NoAudioInput,
    /// The local input is muted.
    InputMuted,
    /// Incoming communications from the target are muted.
    IncomingCommunicationsMuted,
    /// Incoming voice from the target is disabled by permissions.
    IncomingVoiceDisabled,
}

/// Outcome carried by a completion state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChangeResult {
    /// The operation completed.
    Succeeded,
    /// The operation was cut short because the network was left.
    LeaveNetworkCalled,
    /// The operation failed.
    Failed(EngineError),
}

impl StateChangeResult {
    /// `true` for [`Self::Succeeded`] and [`Self::LeaveNetworkCalled`].
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Succeeded | Self::LeaveNetworkCalled => None,
        }
    }
}

/// Asynchronous engine operation acknowledged through
/// [`StateChange::Completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOperation {
    /// [`Engine::create_network`].
    CreateNetwork,
    /// [`Engine::authenticate_local_user`].
    AuthenticateLocalUser,
    /// [`Engine::create_endpoint`].
    CreateEndpoint,
    /// Endpoint teardown.
    DestroyEndpoint,
    /// [`Engine::create_chat_control`].
    CreateChatControl,
    /// [`Engine::connect_chat_control`].
    ConnectChatControl,
    /// Chat control teardown.
    DestroyChatControl,
    /// Local user teardown.
    DestroyLocalUser,
    /// [`Engine::set_transcription_options`].
    SetTranscriptionOptions,
    /// [`Engine::set_text_chat_options`].
    SetTextChatOptions,
    /// [`Engine::synthesize_text_to_speech`].
    SynthesizeTextToSpeech,
    /// [`Engine::send_text`].
    SendText,
}

/// Whether a transcription is a partial hypothesis or the final phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhraseType {
    /// Partial, may still change.
    Hypothesis,
    /// Final transcription of the phrase.
    Final,
}

/// One item of the engine's per-tick state change queue.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// An asynchronous operation finished.
    Completed {
        /// Which operation.
        operation: EngineOperation,
        /// How it finished.
        result: StateChangeResult,
    },

    /// [`Engine::connect_to_network`] finished.
    ConnectToNetworkCompleted {
        /// Network that was connected.
        network: NetworkHandle,
        /// Descriptor of the connected network.
        descriptor: NetworkDescriptor,
        /// How it finished.
        result: StateChangeResult,
    },

    /// [`Engine::leave_network`] finished.
    LeaveNetworkCompleted {
        /// How it finished.
        result: StateChangeResult,
    },

    /// The network object was destroyed.
    NetworkDestroyed {
        /// Why, if the teardown was not a clean one.
        reason: Option<EngineError>,
    },

    /// The network descriptor or invitation changed.
    NetworkDescriptorChanged {
        /// Network whose descriptor changed.
        network: NetworkHandle,
    },

    /// An endpoint joined the network.
    EndpointCreated {
        /// The new endpoint.
        endpoint: EndpointHandle,
        /// Identity owning the endpoint.
        entity_id: EntityId,
        /// `true` for the local device's endpoint.
        is_local: bool,
    },

    /// An endpoint left the network.
    EndpointDestroyed {
        /// The departed endpoint.
        endpoint: EndpointHandle,
        /// Identity that owned the endpoint.
        entity_id: EntityId,
        /// Why, if the teardown was not a clean one.
        reason: Option<EngineError>,
    },

    /// A chat control became known to the engine.
    ChatControlCreated {
        /// The new chat control.
        control: ChatControlHandle,
        /// Identity owning the control.
        entity_id: EntityId,
        /// `true` for the local chat control.
        is_local: bool,
    },

    /// A chat control went away.
    ChatControlDestroyed {
        /// The departed chat control.
        control: ChatControlHandle,
        /// Why, if the teardown was not a clean one.
        reason: Option<EngineError>,
    },

    /// A data message arrived at the local endpoint.
    EndpointMessageReceived {
        /// Sending endpoint.
        sender: EndpointHandle,
        /// Identity owning the sending endpoint.
        sender_entity_id: EntityId,
        /// Message bytes.
        payload: Vec<u8>,
    },

    /// A text chat message arrived.
    ChatTextReceived {
        /// Sending chat control.
        sender: ChatControlHandle,
        /// Identity owning the sending control.
        sender_entity_id: EntityId,
        /// Original text.
        text: String,
        /// Translations into the local language, best first.
        translations: Vec<String>,
    },

    /// A voice transcription arrived.
    TranscriptionReceived {
        /// Identity of the speaker.
        speaker_entity_id: EntityId,
        /// Whether the transcription succeeded.
        result: StateChangeResult,
        /// Hypothesis or final phrase.
        phrase: PhraseType,
        /// Transcribed text.
        transcription: String,
        /// Translations into the local language, best first.
        translations: Vec<String>,
    },

    /// A local audio device selection finished.
    AudioDeviceChanged {
        /// Input or output.
        direction: AudioDirection,
        /// How it finished.
        result: StateChangeResult,
    },

    /// Any state change this layer does not interpret.
    Other {
        /// Engine name of the state change.
        kind: String,
    },
}

/// Operations the session needs from the network/voice engine.
///
/// Implementations wrap a real engine binding or, in tests, an in-memory
/// simulation. Asynchronous operations return once the request is accepted;
/// their completion arrives later as a [`StateChange`].
pub trait Engine {
    /// Initialize the engine for an application.
    fn initialize(&mut self, app_id: &str) -> EngineResult<EngineHandle>;

    /// Release the engine and every object created through it.
    fn cleanup(&mut self, engine: EngineHandle) -> EngineResult<()>;

    /// Register the signed-in local user.
    fn create_local_user(
        &mut self,
        engine: EngineHandle,
        entity_id: &EntityId,
        token: &str,
    ) -> EngineResult<LocalUserHandle>;

    /// Replace the local user's identity token.
    fn update_local_user_token(&mut self, user: LocalUserHandle, token: &str) -> EngineResult<()>;

    /// Create the local chat control.
    fn create_chat_control(
        &mut self,
        engine: EngineHandle,
        user: LocalUserHandle,
        language: Option<&str>,
    ) -> EngineResult<ChatControlHandle>;

    /// Create a new network. Returns its descriptor and the applied
    /// invitation identifier.
    fn create_network(
        &mut self,
        engine: EngineHandle,
        user: LocalUserHandle,
        config: &EngineNetworkConfig,
        invitation: &InvitationConfig,
    ) -> EngineResult<(NetworkDescriptor, String)>;

    /// Start connecting to the network described by `descriptor`.
    fn connect_to_network(
        &mut self,
        engine: EngineHandle,
        descriptor: &NetworkDescriptor,
    ) -> EngineResult<NetworkHandle>;

    /// Authenticate the local user on a network using an invitation.
    fn authenticate_local_user(
        &mut self,
        network: NetworkHandle,
        user: LocalUserHandle,
        invitation_id: &str,
    ) -> EngineResult<()>;

    /// Create the local data endpoint on a network.
    fn create_endpoint(
        &mut self,
        network: NetworkHandle,
        user: LocalUserHandle,
    ) -> EngineResult<EndpointHandle>;

    /// Attach the local chat control to a network.
    fn connect_chat_control(
        &mut self,
        network: NetworkHandle,
        control: ChatControlHandle,
    ) -> EngineResult<()>;

    /// Start leaving a network.
    fn leave_network(&mut self, network: NetworkHandle) -> EngineResult<()>;

    /// Send a data message. An empty `targets` slice broadcasts.
    fn send_message(
        &mut self,
        endpoint: EndpointHandle,
        targets: &[EndpointHandle],
        options: SendOptions,
        payload: &[u8],
    ) -> EngineResult<()>;

    /// Send a text chat message.
    fn send_text(
        &mut self,
        control: ChatControlHandle,
        targets: &[ChatControlHandle],
        text: &str,
    ) -> EngineResult<()>;

    /// Speak `text` to the participants the control is connected to.
    fn synthesize_text_to_speech(
        &mut self,
        control: ChatControlHandle,
        text: &str,
    ) -> EngineResult<()>;

    /// Grant `permissions` from the local control to a target control.
    fn set_permissions(
        &mut self,
        local: ChatControlHandle,
        target: ChatControlHandle,
        permissions: ChatPermissions,
    ) -> EngineResult<()>;

    /// Permissions the platform requires between the local control and a
    /// target control.
    fn get_permissions(
        &self,
        local: ChatControlHandle,
        target: ChatControlHandle,
    ) -> EngineResult<ChatPermissions>;

    /// Select the audio input device.
    fn set_audio_input(&mut self, control: ChatControlHandle, device: &AudioDevice)
    -> EngineResult<()>;

    /// Select the audio output device.
    fn set_audio_output(
        &mut self,
        control: ChatControlHandle,
        device: &AudioDevice,
    ) -> EngineResult<()>;

    /// Mute or unmute the local microphone.
    fn set_audio_input_muted(&mut self, control: ChatControlHandle, muted: bool)
    -> EngineResult<()>;

    /// Mute or unmute incoming audio from a target.
    fn set_incoming_audio_muted(
        &mut self,
        local: ChatControlHandle,
        target: ChatControlHandle,
        muted: bool,
    ) -> EngineResult<()>;

    /// Set the render volume of a target (the local control for input).
    fn set_audio_render_volume(
        &mut self,
        local: ChatControlHandle,
        target: ChatControlHandle,
        volume: f32,
    ) -> EngineResult<()>;

    /// Configure speech-to-text.
    fn set_transcription_options(
        &mut self,
        control: ChatControlHandle,
        options: TranscriptionOptions,
    ) -> EngineResult<()>;

    /// Configure text chat.
    fn set_text_chat_options(
        &mut self,
        control: ChatControlHandle,
        options: TextChatOptions,
    ) -> EngineResult<()>;

    /// Talking indicator of the local control.
    fn local_chat_indicator(&self, control: ChatControlHandle) -> EngineResult<ChatIndicator>;

    /// Talking indicator of a target as heard by the local control.
    fn chat_indicator(
        &self,
        local: ChatControlHandle,
        target: ChatControlHandle,
    ) -> EngineResult<ChatIndicator>;

    /// Serialize a descriptor for sharing with peers.
    fn serialize_network_descriptor(&self, descriptor: &NetworkDescriptor)
    -> EngineResult<String>;

    /// Parse a descriptor received from a peer.
    fn deserialize_network_descriptor(&self, serialized: &str) -> EngineResult<NetworkDescriptor>;

    /// Current descriptor of a connected network.
    fn network_descriptor(&self, network: NetworkHandle) -> EngineResult<NetworkDescriptor>;

    /// First open invitation of a network, if any.
    fn network_invitation_id(&self, network: NetworkHandle) -> EngineResult<Option<String>>;

    /// Take the state changes queued since the last call, in order.
    fn drain_state_changes(&mut self, engine: EngineHandle) -> EngineResult<Vec<StateChange>>;

    /// Return a processed batch to the engine.
    fn finish_processing_state_changes(
        &mut self,
        engine: EngineHandle,
        changes: Vec<StateChange>,
    ) -> EngineResult<()>;
}
