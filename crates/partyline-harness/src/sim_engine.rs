//! Per-device engine over a shared [`SimNetwork`].
//!
//! Every mutating call is recorded by name, so tests can assert exactly
//! which engine operations a session issued and in what order. A single
//! failure can be armed per operation with [`SimEngine::fail_next`].

use std::collections::HashMap;

use partyline_core::{
    Engine, EngineError, EntityId, StateChange,
    engine::{
        AudioDevice, AudioDirection, ChatControlHandle, ChatIndicator, ChatPermissions,
        EndpointHandle, EngineHandle, EngineNetworkConfig, EngineResult, InvitationConfig,
        LocalUserHandle, NetworkDescriptor, NetworkHandle, SendOptions, TextChatOptions,
        TranscriptionOptions,
    },
};

use crate::sim_network::{DeviceId, SharedSimNetwork, SimNetwork, codes, lock};

/// Engine implementation for one simulated device.
pub struct SimEngine {
    network: SharedSimNetwork,
    device: DeviceId,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, EngineError>,
    spoken: Vec<String>,
    render_volumes: HashMap<(ChatControlHandle, ChatControlHandle), f32>,
    transcription: Option<TranscriptionOptions>,
    text_chat: Option<TextChatOptions>,
    batches_returned: usize,
}

impl SimEngine {
    /// Register a new device on `network`.
    pub fn new(network: SharedSimNetwork) -> Self {
        let device = lock(&network).add_device();
        Self {
            network,
            device,
            calls: Vec::new(),
            failures: HashMap::new(),
            spoken: Vec::new(),
            render_volumes: HashMap::new(),
            transcription: None,
            text_chat: None,
            batches_returned: 0,
        }
    }

    /// Device this engine acts for.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Shared relay.
    pub fn network(&self) -> &SharedSimNetwork {
        &self.network
    }

    /// Mutating engine calls so far, in order.
    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    /// How many times `operation` was called.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.iter().filter(|&&call| call == operation).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Make the next call to `operation` fail with `err`.
    pub fn fail_next(&mut self, operation: &'static str, err: EngineError) {
        self.failures.insert(operation, err);
    }

    /// Text passed to text-to-speech.
    pub fn spoken(&self) -> &[String] {
        &self.spoken
    }

    /// Last render volume set from `local` towards `target`.
    pub fn render_volume(
        &self,
        local: ChatControlHandle,
        target: ChatControlHandle,
    ) -> Option<f32> {
        self.render_volumes.get(&(local, target)).copied()
    }

    /// Last transcription options applied.
    pub fn transcription_options(&self) -> Option<TranscriptionOptions> {
        self.transcription
    }

    /// Last text chat options applied.
    pub fn text_chat_options(&self) -> Option<TextChatOptions> {
        self.text_chat
    }

    /// Batches handed back through `finish_processing_state_changes`.
    pub fn batches_returned(&self) -> usize {
        self.batches_returned
    }

    fn record(&mut self, operation: &'static str) -> EngineResult<()> {
        self.calls.push(operation);
        match self.failures.remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn relay<T>(&self, f: impl FnOnce(&mut SimNetwork, DeviceId) -> T) -> T {
        f(&mut lock(&self.network), self.device)
    }
}

impl Engine for SimEngine {
    fn initialize(&mut self, app_id: &str) -> EngineResult<EngineHandle> {
        self.record("initialize")?;
        self.relay(|n, d| n.initialize(d, app_id))
    }

    fn cleanup(&mut self, engine: EngineHandle) -> EngineResult<()> {
        self.record("cleanup")?;
        self.relay(|n, d| n.cleanup(d, engine))?;
        self.render_volumes.clear();
        self.transcription = None;
        self.text_chat = None;
        Ok(())
    }

    fn create_local_user(
        &mut self,
        engine: EngineHandle,
        entity_id: &EntityId,
        token: &str,
    ) -> EngineResult<LocalUserHandle> {
        self.record("create_local_user")?;
        self.relay(|n, d| n.create_local_user(d, engine, entity_id, token))
    }

    fn update_local_user_token(&mut self, user: LocalUserHandle, token: &str) -> EngineResult<()> {
        self.record("update_local_user_token")?;
        self.relay(|n, d| n.update_local_user_token(d, user, token))
    }

    fn create_chat_control(
        &mut self,
        engine: EngineHandle,
        user: LocalUserHandle,
        _language: Option<&str>,
    ) -> EngineResult<ChatControlHandle> {
        self.record("create_chat_control")?;
        self.relay(|n, d| n.create_chat_control(d, engine, user))
    }

    fn create_network(
        &mut self,
        _engine: EngineHandle,
        user: LocalUserHandle,
        config: &EngineNetworkConfig,
        invitation: &InvitationConfig,
    ) -> EngineResult<(NetworkDescriptor, String)> {
        self.record("create_network")?;
        self.relay(|n, d| n.create_network(d, user, config, invitation))
    }

    fn connect_to_network(
        &mut self,
        engine: EngineHandle,
        descriptor: &NetworkDescriptor,
    ) -> EngineResult<NetworkHandle> {
        self.record("connect_to_network")?;
        self.relay(|n, d| n.connect_to_network(d, engine, descriptor))
    }

    fn authenticate_local_user(
        &mut self,
        network: NetworkHandle,
        user: LocalUserHandle,
        invitation_id: &str,
    ) -> EngineResult<()> {
        self.record("authenticate_local_user")?;
        self.relay(|n, d| n.authenticate_local_user(d, network, user, invitation_id))
    }

    fn create_endpoint(
        &mut self,
        network: NetworkHandle,
        user: LocalUserHandle,
    ) -> EngineResult<EndpointHandle> {
        self.record("create_endpoint")?;
        self.relay(|n, d| n.create_endpoint(d, network, user))
    }

    fn connect_chat_control(
        &mut self,
        network: NetworkHandle,
        control: ChatControlHandle,
    ) -> EngineResult<()> {
        self.record("connect_chat_control")?;
        self.relay(|n, d| n.connect_chat_control(d, network, control))
    }

    fn leave_network(&mut self, network: NetworkHandle) -> EngineResult<()> {
        self.record("leave_network")?;
        self.relay(|n, d| n.leave_network(d, network))
    }

    fn send_message(
        &mut self,
        endpoint: EndpointHandle,
        targets: &[EndpointHandle],
        options: SendOptions,
        payload: &[u8],
    ) -> EngineResult<()> {
        self.record("send_message")?;
        self.relay(|n, d| n.send_message(d, endpoint, targets, options, payload))
    }

    fn send_text(
        &mut self,
        control: ChatControlHandle,
        targets: &[ChatControlHandle],
        text: &str,
    ) -> EngineResult<()> {
        self.record("send_text")?;
        self.relay(|n, d| n.send_text(d, control, targets, text))
    }

    fn synthesize_text_to_speech(
        &mut self,
        _control: ChatControlHandle,
        text: &str,
    ) -> EngineResult<()> {
        self.record("synthesize_text_to_speech")?;
        self.spoken.push(text.to_owned());
        Ok(())
    }

    fn set_permissions(
        &mut self,
        _local: ChatControlHandle,
        target: ChatControlHandle,
        permissions: ChatPermissions,
    ) -> EngineResult<()> {
        self.record("set_permissions")?;
        self.relay(|n, d| n.set_permissions(d, target, permissions))
    }

    fn get_permissions(
        &self,
        _local: ChatControlHandle,
        target: ChatControlHandle,
    ) -> EngineResult<ChatPermissions> {
        self.relay(|n, d| n.required_permissions(d, target))
    }

    fn set_audio_input(
        &mut self,
        _control: ChatControlHandle,
        _device: &AudioDevice,
    ) -> EngineResult<()> {
        self.record("set_audio_input")?;
        self.relay(|n, d| n.select_audio_device(d, AudioDirection::Input));
        Ok(())
    }

    fn set_audio_output(
        &mut self,
        _control: ChatControlHandle,
        _device: &AudioDevice,
    ) -> EngineResult<()> {
        self.record("set_audio_output")?;
        self.relay(|n, d| n.select_audio_device(d, AudioDirection::Output));
        Ok(())
    }

    fn set_audio_input_muted(
        &mut self,
        _control: ChatControlHandle,
        muted: bool,
    ) -> EngineResult<()> {
        self.record("set_audio_input_muted")?;
        self.relay(|n, d| n.set_input_muted(d, muted))
    }

    fn set_incoming_audio_muted(
        &mut self,
        _local: ChatControlHandle,
        target: ChatControlHandle,
        muted: bool,
    ) -> EngineResult<()> {
        self.record("set_incoming_audio_muted")?;
        self.relay(|n, d| n.set_incoming_muted(d, target, muted))
    }

    fn set_audio_render_volume(
        &mut self,
        local: ChatControlHandle,
        target: ChatControlHandle,
        volume: f32,
    ) -> EngineResult<()> {
        self.record("set_audio_render_volume")?;
        self.render_volumes.insert((local, target), volume);
        Ok(())
    }

    fn set_transcription_options(
        &mut self,
        _control: ChatControlHandle,
        options: TranscriptionOptions,
    ) -> EngineResult<()> {
        self.record("set_transcription_options")?;
        self.transcription = Some(options);
        Ok(())
    }

    fn set_text_chat_options(
        &mut self,
        _control: ChatControlHandle,
        options: TextChatOptions,
    ) -> EngineResult<()> {
        self.record("set_text_chat_options")?;
        self.text_chat = Some(options);
        Ok(())
    }

    fn local_chat_indicator(&self, _control: ChatControlHandle) -> EngineResult<ChatIndicator> {
        self.relay(|n, d| n.local_indicator(d))
    }

    fn chat_indicator(
        &self,
        _local: ChatControlHandle,
        target: ChatControlHandle,
    ) -> EngineResult<ChatIndicator> {
        self.relay(|n, d| n.remote_indicator(d, target))
    }

    fn serialize_network_descriptor(
        &self,
        descriptor: &NetworkDescriptor,
    ) -> EngineResult<String> {
        String::from_utf8(descriptor.as_bytes().to_vec())
            .map_err(|_| EngineError::new(codes::INVALID_ARGUMENT, "descriptor is not utf-8"))
    }

    fn deserialize_network_descriptor(&self, serialized: &str) -> EngineResult<NetworkDescriptor> {
        if serialized.is_empty() {
            return Err(EngineError::new(codes::INVALID_ARGUMENT, "descriptor is empty"));
        }
        Ok(NetworkDescriptor::new(serialized.as_bytes()))
    }

    fn network_descriptor(&self, network: NetworkHandle) -> EngineResult<NetworkDescriptor> {
        self.relay(|n, _| n.descriptor(network))
    }

    fn network_invitation_id(&self, network: NetworkHandle) -> EngineResult<Option<String>> {
        self.relay(|n, _| n.invitation_id(network))
    }

    fn drain_state_changes(&mut self, engine: EngineHandle) -> EngineResult<Vec<StateChange>> {
        self.record("drain_state_changes")?;
        self.relay(|n, d| n.drain(d, engine))
    }

    fn finish_processing_state_changes(
        &mut self,
        _engine: EngineHandle,
        _changes: Vec<StateChange>,
    ) -> EngineResult<()> {
        self.batches_returned += 1;
        Ok(())
    }
}
