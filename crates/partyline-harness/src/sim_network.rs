//! In-memory relay shared by every simulated device.
//!
//! `SimNetwork` plays the engine's backend: it owns every network, hands out
//! handles and queues the state changes each device drains on its next
//! tick. Randomness (handle values and best-effort message loss) comes from
//! a seeded `ChaCha8Rng`, so a seed reproduces a run exactly.
//!
//! Devices talk to it through [`crate::SimEngine`]; tests talk to it
//! directly to inject faults and inspect what the engine was told.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use partyline_core::{
    EngineError, EntityId, StateChange,
    engine::{
        AudioDirection, ChatControlHandle, ChatIndicator, ChatPermissions, EndpointHandle,
        EngineHandle, EngineNetworkConfig, EngineOperation, EngineResult, InvitationConfig,
        LocalUserHandle, NetworkDescriptor, NetworkHandle, SendOptions, StateChangeResult,
    },
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

/// Index of a simulated device.
pub type DeviceId = usize;

/// Wraps `SimNetwork` in an `Arc<Mutex<>>` for shared access between
/// devices.
pub type SharedSimNetwork = Arc<Mutex<SimNetwork>>;

/// Create a shared relay seeded with `seed`.
pub fn create_shared_network(seed: u64) -> SharedSimNetwork {
    Arc::new(Mutex::new(SimNetwork::new(seed)))
}

/// Lock a shared relay.
///
/// A panicking test thread cannot leave the relay half-updated in a way
/// later assertions care about, so poisoning is ignored.
pub fn lock(network: &SharedSimNetwork) -> MutexGuard<'_, SimNetwork> {
    network.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine result codes reported by the simulation.
pub mod codes {
    /// Malformed argument (empty app id, unknown descriptor text).
    pub const INVALID_ARGUMENT: u32 = 1;
    /// The token was rejected.
    pub const INVALID_TOKEN: u32 = 1001;
    /// No network matches the descriptor or handle.
    pub const NETWORK_NOT_FOUND: u32 = 1002;
    /// The invitation does not belong to the network.
    pub const INVITATION_NOT_FOUND: u32 = 1003;
    /// The network has no room for another user.
    pub const NETWORK_FULL: u32 = 1004;
    /// The device is not a member of the network.
    pub const NOT_IN_NETWORK: u32 = 1005;
    /// The handle does not belong to this device.
    pub const INVALID_HANDLE: u32 = 1006;
    /// The network was shut down by the relay.
    pub const NETWORK_SHUT_DOWN: u32 = 1007;
}

/// Traffic counters, reported by the simulation binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    /// Networks created.
    pub networks_created: u64,
    /// Data messages queued to a recipient.
    pub messages_delivered: u64,
    /// Best-effort data messages lost.
    pub messages_dropped: u64,
    /// Chat texts queued to a recipient.
    pub texts_delivered: u64,
}

/// Per-device engine state.
#[derive(Debug, Default)]
struct Device {
    engine: Option<EngineHandle>,
    user: Option<LocalUserHandle>,
    entity_id: Option<EntityId>,
    chat_control: Option<ChatControlHandle>,
    network: Option<NetworkHandle>,
    authenticated: bool,
    input_muted: bool,
    talking: bool,
    incoming_muted: HashSet<ChatControlHandle>,
    granted: HashMap<ChatControlHandle, ChatPermissions>,
    queue: Vec<StateChange>,

    // Test configuration, kept across cleanup.
    no_audio_device: bool,
    required: HashMap<ChatControlHandle, ChatPermissions>,
}

impl Device {
    /// Forget every engine object, keeping test configuration.
    fn reset(&mut self) {
        *self = Self {
            no_audio_device: self.no_audio_device,
            required: std::mem::take(&mut self.required),
            ..Self::default()
        };
    }
}

#[derive(Debug, Clone)]
struct Member {
    device: DeviceId,
    entity_id: EntityId,
    endpoint: EndpointHandle,
    chat_control: Option<ChatControlHandle>,
}

#[derive(Debug)]
struct Network {
    handle: NetworkHandle,
    invitation_id: String,
    max_users: u32,
    members: Vec<Member>,
}

/// Simulated engine backend.
pub struct SimNetwork {
    rng: ChaCha8Rng,
    next_handle: u64,
    next_network: u64,
    devices: Vec<Device>,
    networks: BTreeMap<String, Network>,
    loss_rate: f64,
    stats: TrafficStats,
}

impl SimNetwork {
    /// Create an empty relay.
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let next_handle = rng.gen_range(1..=u64::from(u32::MAX));
        Self {
            rng,
            next_handle,
            next_network: 0,
            devices: Vec::new(),
            networks: BTreeMap::new(),
            loss_rate: 0.0,
            stats: TrafficStats::default(),
        }
    }

    /// Register a new device.
    pub fn add_device(&mut self) -> DeviceId {
        self.devices.push(Device::default());
        self.devices.len() - 1
    }

    /// Probability that a best-effort data message is lost, clamped to
    /// `[0, 1]`.
    pub fn set_loss_rate(&mut self, rate: f64) {
        self.loss_rate = rate.clamp(0.0, 1.0);
    }

    /// Make audio device selection fail on `device`.
    pub fn set_no_audio_device(&mut self, device: DeviceId, missing: bool) {
        if let Some(d) = self.devices.get_mut(device) {
            d.no_audio_device = missing;
        }
    }

    /// Permissions the platform requires from `device` towards `target`.
    pub fn require_permissions(
        &mut self,
        device: DeviceId,
        target: ChatControlHandle,
        permissions: ChatPermissions,
    ) {
        if let Some(d) = self.devices.get_mut(device) {
            d.required.insert(target, permissions);
        }
    }

    /// Mark the local participant of `device` as speaking.
    pub fn set_talking(&mut self, device: DeviceId, talking: bool) {
        if let Some(d) = self.devices.get_mut(device) {
            d.talking = talking;
        }
    }

    /// Queue a raw state change for `device`.
    pub fn inject(&mut self, device: DeviceId, change: StateChange) {
        self.push(device, change);
    }

    /// State changes waiting for `device`.
    pub fn pending(&self, device: DeviceId) -> usize {
        self.devices.get(device).map_or(0, |d| d.queue.len())
    }

    /// Chat control created on `device`, if any.
    pub fn chat_control(&self, device: DeviceId) -> Option<ChatControlHandle> {
        self.devices.get(device).and_then(|d| d.chat_control)
    }

    /// Permissions `device` last granted to `target`.
    pub fn granted_permissions(
        &self,
        device: DeviceId,
        target: ChatControlHandle,
    ) -> Option<ChatPermissions> {
        self.devices.get(device).and_then(|d| d.granted.get(&target).copied())
    }

    /// Whether `device` muted incoming audio from `target`.
    pub fn is_incoming_muted(&self, device: DeviceId, target: ChatControlHandle) -> bool {
        self.devices.get(device).is_some_and(|d| d.incoming_muted.contains(&target))
    }

    /// Whether `device` muted its microphone.
    pub fn is_input_muted(&self, device: DeviceId) -> bool {
        self.devices.get(device).is_some_and(|d| d.input_muted)
    }

    /// Number of live networks.
    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    /// Members of the network with serialized descriptor `key`, in join
    /// order.
    pub fn members(&self, key: &str) -> Vec<EntityId> {
        self.networks
            .get(key)
            .map(|n| n.members.iter().map(|m| m.entity_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Replace a network's invitation and tell every member.
    ///
    /// Returns `false` if the network does not exist.
    pub fn rotate_invitation(&mut self, key: &str, invitation_id: impl Into<String>) -> bool {
        let Some(network) = self.networks.get_mut(key) else {
            return false;
        };
        network.invitation_id = invitation_id.into();
        let handle = network.handle;
        let devices: Vec<DeviceId> = network.members.iter().map(|m| m.device).collect();

        for device in devices {
            self.push(device, StateChange::NetworkDescriptorChanged { network: handle });
        }
        true
    }

    /// Shut a network down under every connected device.
    ///
    /// Returns `false` if the network does not exist.
    pub fn destroy_network(&mut self, key: &str) -> bool {
        let Some(network) = self.networks.remove(key) else {
            return false;
        };
        let reason = EngineError::new(codes::NETWORK_SHUT_DOWN, "network shut down");

        for device in 0..self.devices.len() {
            let Some(d) = self.devices.get_mut(device) else {
                continue;
            };
            if d.network != Some(network.handle) {
                continue;
            }
            d.network = None;
            d.authenticated = false;
            self.push(device, StateChange::NetworkDestroyed { reason: Some(reason.clone()) });
        }
        tracing::debug!(network = key, "network destroyed by relay");
        true
    }

    /// Traffic counters so far.
    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    pub(crate) fn initialize(
        &mut self,
        device: DeviceId,
        app_id: &str,
    ) -> EngineResult<EngineHandle> {
        if app_id.is_empty() {
            return Err(EngineError::new(codes::INVALID_ARGUMENT, "app id is empty"));
        }
        let handle = EngineHandle::from_raw(self.allocate());
        let d = self.device_mut(device)?;
        if d.engine.is_some() {
            return Err(EngineError::new(
                EngineError::ALREADY_INITIALIZED,
                "engine is already initialized",
            ));
        }
        d.engine = Some(handle);
        Ok(handle)
    }

    pub(crate) fn cleanup(&mut self, device: DeviceId, engine: EngineHandle) -> EngineResult<()> {
        self.expect_engine(device, engine)?;
        self.depart(device);
        self.device_mut(device)?.reset();
        Ok(())
    }

    pub(crate) fn create_local_user(
        &mut self,
        device: DeviceId,
        engine: EngineHandle,
        entity_id: &EntityId,
        token: &str,
    ) -> EngineResult<LocalUserHandle> {
        self.expect_engine(device, engine)?;
        if token.is_empty() {
            return Err(EngineError::new(codes::INVALID_TOKEN, "token is empty"));
        }
        let user = LocalUserHandle::from_raw(self.allocate());
        let d = self.device_mut(device)?;
        d.user = Some(user);
        d.entity_id = Some(entity_id.clone());
        Ok(user)
    }

    pub(crate) fn update_local_user_token(
        &mut self,
        device: DeviceId,
        user: LocalUserHandle,
        token: &str,
    ) -> EngineResult<()> {
        self.expect_user(device, user)?;
        if token.is_empty() {
            return Err(EngineError::new(codes::INVALID_TOKEN, "token is empty"));
        }
        Ok(())
    }

    pub(crate) fn create_chat_control(
        &mut self,
        device: DeviceId,
        engine: EngineHandle,
        user: LocalUserHandle,
    ) -> EngineResult<ChatControlHandle> {
        self.expect_engine(device, engine)?;
        self.expect_user(device, user)?;
        let control = ChatControlHandle::from_raw(self.allocate());
        self.device_mut(device)?.chat_control = Some(control);
        Ok(control)
    }

    pub(crate) fn create_network(
        &mut self,
        device: DeviceId,
        user: LocalUserHandle,
        config: &EngineNetworkConfig,
        invitation: &InvitationConfig,
    ) -> EngineResult<(NetworkDescriptor, String)> {
        self.expect_user(device, user)?;

        self.next_network += 1;
        let key = format!("net-{}", self.next_network);
        let handle = NetworkHandle::from_raw(self.allocate());
        self.networks.insert(
            key.clone(),
            Network {
                handle,
                invitation_id: invitation.identifier.clone(),
                max_users: config.max_user_count,
                members: Vec::new(),
            },
        );
        self.stats.networks_created += 1;

        self.push(device, StateChange::Completed {
            operation: EngineOperation::CreateNetwork,
            result: StateChangeResult::Succeeded,
        });
        Ok((NetworkDescriptor::new(key.into_bytes()), invitation.identifier.clone()))
    }

    pub(crate) fn connect_to_network(
        &mut self,
        device: DeviceId,
        engine: EngineHandle,
        descriptor: &NetworkDescriptor,
    ) -> EngineResult<NetworkHandle> {
        self.expect_engine(device, engine)?;
        let key = String::from_utf8_lossy(descriptor.as_bytes()).into_owned();

        let (network, result) = match self.networks.get(&key) {
            Some(network) => (network.handle, StateChangeResult::Succeeded),
            None => {
                let missing = EngineError::new(
                    codes::NETWORK_NOT_FOUND,
                    format!("network {key} does not exist"),
                );
                (NetworkHandle::from_raw(self.allocate()), StateChangeResult::Failed(missing))
            },
        };
        if result.is_success() {
            self.device_mut(device)?.network = Some(network);
        }

        self.push(device, StateChange::ConnectToNetworkCompleted {
            network,
            descriptor: descriptor.clone(),
            result,
        });
        Ok(network)
    }

    pub(crate) fn authenticate_local_user(
        &mut self,
        device: DeviceId,
        network: NetworkHandle,
        user: LocalUserHandle,
        invitation_id: &str,
    ) -> EngineResult<()> {
        self.expect_user(device, user)?;

        let failure = match self.network_by_handle(network) {
            None => Some(EngineError::new(codes::NETWORK_NOT_FOUND, "network does not exist")),
            Some(n) if n.invitation_id != invitation_id => {
                Some(EngineError::new(codes::INVITATION_NOT_FOUND, "invitation not found"))
            },
            Some(n) if n.members.len() >= n.max_users as usize => {
                Some(EngineError::new(codes::NETWORK_FULL, "network is full"))
            },
            Some(_) => None,
        };

        let d = self.device_mut(device)?;
        d.authenticated = failure.is_none();
        let Some(err) = failure else {
            self.push(device, StateChange::Completed {
                operation: EngineOperation::AuthenticateLocalUser,
                result: StateChangeResult::Succeeded,
            });
            return Ok(());
        };

        // A device that fails to authenticate is dropped from the network.
        d.network = None;
        self.push(device, StateChange::Completed {
            operation: EngineOperation::AuthenticateLocalUser,
            result: StateChangeResult::Failed(err.clone()),
        });
        self.push(device, StateChange::NetworkDestroyed { reason: Some(err) });
        Ok(())
    }

    pub(crate) fn create_endpoint(
        &mut self,
        device: DeviceId,
        network: NetworkHandle,
        user: LocalUserHandle,
    ) -> EngineResult<EndpointHandle> {
        self.expect_user(device, user)?;
        let d = self.device(device)?;
        if !d.authenticated || d.network != Some(network) {
            return Err(EngineError::new(codes::NOT_IN_NETWORK, "user is not authenticated"));
        }
        let entity_id = d.entity_id.clone().unwrap_or_default();

        let endpoint = EndpointHandle::from_raw(self.allocate());
        let Some(n) = self.network_by_handle_mut(network) else {
            return Err(EngineError::new(codes::NETWORK_NOT_FOUND, "network does not exist"));
        };
        if n.members.iter().any(|m| m.device == device) {
            return Err(EngineError::new(codes::INVALID_HANDLE, "device already has an endpoint"));
        }
        if n.members.len() >= n.max_users as usize {
            return Err(EngineError::new(codes::NETWORK_FULL, "network is full"));
        }
        let peers = n.members.clone();
        n.members.push(Member {
            device,
            entity_id: entity_id.clone(),
            endpoint,
            chat_control: None,
        });

        self.push(device, StateChange::EndpointCreated {
            endpoint,
            entity_id: entity_id.clone(),
            is_local: true,
        });
        for peer in peers {
            self.push(peer.device, StateChange::EndpointCreated {
                endpoint,
                entity_id: entity_id.clone(),
                is_local: false,
            });
            self.push(device, StateChange::EndpointCreated {
                endpoint: peer.endpoint,
                entity_id: peer.entity_id.clone(),
                is_local: false,
            });
            if let Some(control) = peer.chat_control {
                self.push(device, StateChange::ChatControlCreated {
                    control,
                    entity_id: peer.entity_id,
                    is_local: false,
                });
            }
        }
        Ok(endpoint)
    }

    pub(crate) fn connect_chat_control(
        &mut self,
        device: DeviceId,
        network: NetworkHandle,
        control: ChatControlHandle,
    ) -> EngineResult<()> {
        if self.device(device)?.chat_control != Some(control) {
            return Err(EngineError::new(codes::INVALID_HANDLE, "unknown chat control"));
        }
        let Some(n) = self.network_by_handle_mut(network) else {
            return Err(EngineError::new(codes::NETWORK_NOT_FOUND, "network does not exist"));
        };
        let Some(member) = n.members.iter_mut().find(|m| m.device == device) else {
            return Err(EngineError::new(codes::NOT_IN_NETWORK, "device has no endpoint"));
        };
        member.chat_control = Some(control);
        let entity_id = member.entity_id.clone();
        let peers: Vec<DeviceId> =
            n.members.iter().map(|m| m.device).filter(|&d| d != device).collect();

        self.push(device, StateChange::ChatControlCreated {
            control,
            entity_id: entity_id.clone(),
            is_local: true,
        });
        for peer in peers {
            self.push(peer, StateChange::ChatControlCreated {
                control,
                entity_id: entity_id.clone(),
                is_local: false,
            });
        }
        Ok(())
    }

    pub(crate) fn leave_network(
        &mut self,
        device: DeviceId,
        network: NetworkHandle,
    ) -> EngineResult<()> {
        if self.device(device)?.network != Some(network) {
            // Connect or authentication already failed; the teardown still
            // completes asynchronously.
            self.push(device, StateChange::NetworkDestroyed { reason: None });
            return Err(EngineError::new(
                EngineError::OBJECT_BEING_DESTROYED,
                "network is already being destroyed",
            ));
        }

        self.depart(device);
        self.push(device, StateChange::LeaveNetworkCompleted {
            result: StateChangeResult::Succeeded,
        });
        self.push(device, StateChange::NetworkDestroyed { reason: None });
        Ok(())
    }

    pub(crate) fn send_message(
        &mut self,
        device: DeviceId,
        endpoint: EndpointHandle,
        targets: &[EndpointHandle],
        options: SendOptions,
        payload: &[u8],
    ) -> EngineResult<()> {
        let (sender, recipients) = self.recipients(device, |m| {
            targets.is_empty() || targets.contains(&m.endpoint)
        })?;
        if sender.endpoint != endpoint {
            return Err(EngineError::new(codes::INVALID_HANDLE, "unknown endpoint"));
        }

        for recipient in recipients {
            if !options.guaranteed && self.rng.gen_bool(self.loss_rate) {
                self.stats.messages_dropped += 1;
                continue;
            }
            self.stats.messages_delivered += 1;
            self.push(recipient, StateChange::EndpointMessageReceived {
                sender: endpoint,
                sender_entity_id: sender.entity_id.clone(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    pub(crate) fn send_text(
        &mut self,
        device: DeviceId,
        control: ChatControlHandle,
        targets: &[ChatControlHandle],
        text: &str,
    ) -> EngineResult<()> {
        let (sender, recipients) =
            self.recipients(device, |m| m.chat_control.is_some_and(|c| targets.contains(&c)))?;
        if sender.chat_control != Some(control) {
            return Err(EngineError::new(codes::INVALID_HANDLE, "unknown chat control"));
        }

        for recipient in recipients {
            self.stats.texts_delivered += 1;
            self.push(recipient, StateChange::ChatTextReceived {
                sender: control,
                sender_entity_id: sender.entity_id.clone(),
                text: text.to_owned(),
                translations: Vec::new(),
            });
        }
        Ok(())
    }

    pub(crate) fn select_audio_device(&mut self, device: DeviceId, direction: AudioDirection) {
        let missing = self.devices.get(device).is_some_and(|d| d.no_audio_device);
        let result = if missing {
            StateChangeResult::Failed(EngineError::new(
                EngineError::RESOURCE_NOT_FOUND,
                "no audio device",
            ))
        } else {
            StateChangeResult::Succeeded
        };
        self.push(device, StateChange::AudioDeviceChanged { direction, result });
    }

    pub(crate) fn set_permissions(
        &mut self,
        device: DeviceId,
        target: ChatControlHandle,
        permissions: ChatPermissions,
    ) -> EngineResult<()> {
        self.device_mut(device)?.granted.insert(target, permissions);
        Ok(())
    }

    pub(crate) fn required_permissions(
        &self,
        device: DeviceId,
        target: ChatControlHandle,
    ) -> EngineResult<ChatPermissions> {
        Ok(self.device(device)?.required.get(&target).copied().unwrap_or(ChatPermissions::ALL))
    }

    pub(crate) fn set_input_muted(&mut self, device: DeviceId, muted: bool) -> EngineResult<()> {
        self.device_mut(device)?.input_muted = muted;
        Ok(())
    }

    pub(crate) fn set_incoming_muted(
        &mut self,
        device: DeviceId,
        target: ChatControlHandle,
        muted: bool,
    ) -> EngineResult<()> {
        let d = self.device_mut(device)?;
        if muted {
            d.incoming_muted.insert(target);
        } else {
            d.incoming_muted.remove(&target);
        }
        Ok(())
    }

    pub(crate) fn local_indicator(&self, device: DeviceId) -> EngineResult<ChatIndicator> {
        let d = self.device(device)?;
        Ok(if d.no_audio_device {
            ChatIndicator::NoAudioInput
        } else if d.input_muted {
            ChatIndicator::InputMuted
        } else if d.talking {
            ChatIndicator::Talking
        } else {
            ChatIndicator::Silent
        })
    }

    pub(crate) fn remote_indicator(
        &self,
        device: DeviceId,
        target: ChatControlHandle,
    ) -> EngineResult<ChatIndicator> {
        let d = self.device(device)?;
        if d.incoming_muted.contains(&target) {
            return Ok(ChatIndicator::IncomingCommunicationsMuted);
        }
        if d.granted.get(&target).is_some_and(|p| !p.contains(ChatPermissions::RECEIVE_AUDIO)) {
            return Ok(ChatIndicator::IncomingVoiceDisabled);
        }

        let talking =
            self.devices.iter().any(|other| other.chat_control == Some(target) && other.talking);
        Ok(if talking { ChatIndicator::Talking } else { ChatIndicator::Silent })
    }

    pub(crate) fn descriptor(&self, network: NetworkHandle) -> EngineResult<NetworkDescriptor> {
        self.networks
            .iter()
            .find(|(_, n)| n.handle == network)
            .map(|(key, _)| NetworkDescriptor::new(key.as_bytes()))
            .ok_or_else(|| EngineError::new(codes::NETWORK_NOT_FOUND, "network does not exist"))
    }

    pub(crate) fn invitation_id(&self, network: NetworkHandle) -> EngineResult<Option<String>> {
        self.network_by_handle(network)
            .map(|n| Some(n.invitation_id.clone()))
            .ok_or_else(|| EngineError::new(codes::NETWORK_NOT_FOUND, "network does not exist"))
    }

    pub(crate) fn drain(
        &mut self,
        device: DeviceId,
        engine: EngineHandle,
    ) -> EngineResult<Vec<StateChange>> {
        self.expect_engine(device, engine)?;
        Ok(std::mem::take(&mut self.device_mut(device)?.queue))
    }

    /// Remove `device` from its network and tell the remaining members.
    /// A network left empty is destroyed.
    fn depart(&mut self, device: DeviceId) {
        let Some(d) = self.devices.get_mut(device) else {
            return;
        };
        d.authenticated = false;
        let Some(handle) = d.network.take() else {
            return;
        };
        let Some((key, n)) = self.networks.iter_mut().find(|(_, n)| n.handle == handle) else {
            return;
        };
        let key = key.clone();
        let Some(index) = n.members.iter().position(|m| m.device == device) else {
            return;
        };

        let member = n.members.remove(index);
        let peers: Vec<DeviceId> = n.members.iter().map(|m| m.device).collect();
        if peers.is_empty() {
            self.networks.remove(&key);
            tracing::debug!(network = %key, "last member left, network destroyed");
        }

        for peer in peers {
            self.push(peer, StateChange::EndpointDestroyed {
                endpoint: member.endpoint,
                entity_id: member.entity_id.clone(),
                reason: None,
            });
            if let Some(control) = member.chat_control {
                self.push(peer, StateChange::ChatControlDestroyed { control, reason: None });
            }
        }
    }

    /// The sending member on `device` and every other member matching
    /// `filter`.
    fn recipients(
        &self,
        device: DeviceId,
        filter: impl Fn(&Member) -> bool,
    ) -> EngineResult<(Member, Vec<DeviceId>)> {
        let not_member = || EngineError::new(codes::NOT_IN_NETWORK, "device is not connected");
        let network = self.device(device)?.network.ok_or_else(not_member)?;
        let n = self.network_by_handle(network).ok_or_else(not_member)?;
        let sender = n.members.iter().find(|m| m.device == device).ok_or_else(not_member)?;

        let recipients = n
            .members
            .iter()
            .filter(|m| m.device != device && filter(m))
            .map(|m| m.device)
            .collect();
        Ok((sender.clone(), recipients))
    }

    fn network_by_handle(&self, handle: NetworkHandle) -> Option<&Network> {
        self.networks.values().find(|n| n.handle == handle)
    }

    fn network_by_handle_mut(&mut self, handle: NetworkHandle) -> Option<&mut Network> {
        self.networks.values_mut().find(|n| n.handle == handle)
    }

    fn device(&self, device: DeviceId) -> EngineResult<&Device> {
        self.devices
            .get(device)
            .ok_or_else(|| EngineError::new(codes::INVALID_HANDLE, "unknown device"))
    }

    fn device_mut(&mut self, device: DeviceId) -> EngineResult<&mut Device> {
        self.devices
            .get_mut(device)
            .ok_or_else(|| EngineError::new(codes::INVALID_HANDLE, "unknown device"))
    }

    fn expect_engine(&self, device: DeviceId, engine: EngineHandle) -> EngineResult<()> {
        if self.device(device)?.engine == Some(engine) {
            return Ok(());
        }
        Err(EngineError::new(codes::INVALID_HANDLE, "engine is not initialized"))
    }

    fn expect_user(&self, device: DeviceId, user: LocalUserHandle) -> EngineResult<()> {
        if self.device(device)?.user == Some(user) {
            return Ok(());
        }
        Err(EngineError::new(codes::INVALID_HANDLE, "unknown local user"))
    }

    fn push(&mut self, device: DeviceId, change: StateChange) {
        if let Some(d) = self.devices.get_mut(device) {
            d.queue.push(change);
        }
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_allocates_same_handles() {
        let mut a = SimNetwork::new(42);
        let mut b = SimNetwork::new(42);
        assert_eq!(a.allocate(), b.allocate());
        assert_ne!(SimNetwork::new(43).allocate(), SimNetwork::new(42).allocate());
    }

    #[test]
    fn second_initialize_reports_already_initialized() {
        let mut network = SimNetwork::new(1);
        let device = network.add_device();

        assert!(network.initialize(device, "app").is_ok());
        let err = network.initialize(device, "app").err().map(|e| e.code);
        assert_eq!(err, Some(EngineError::ALREADY_INITIALIZED));
    }

    #[test]
    fn unknown_descriptor_fails_asynchronously() {
        let mut network = SimNetwork::new(1);
        let device = network.add_device();
        let engine = network.initialize(device, "app").expect("initialize");

        let result = network.connect_to_network(device, engine, &NetworkDescriptor::new("nope"));
        assert!(result.is_ok());

        let changes = network.drain(device, engine).expect("drain");
        assert!(matches!(
            changes.as_slice(),
            [StateChange::ConnectToNetworkCompleted { result: StateChangeResult::Failed(e), .. }]
                if e.code == codes::NETWORK_NOT_FOUND
        ));
    }

    #[test]
    fn cleanup_keeps_test_configuration() {
        let mut network = SimNetwork::new(1);
        let device = network.add_device();
        let engine = network.initialize(device, "app").expect("initialize");
        network.set_no_audio_device(device, true);

        network.cleanup(device, engine).expect("cleanup");
        network.select_audio_device(device, AudioDirection::Input);
        let queued = &network.devices[device].queue;
        assert!(matches!(
            queued.as_slice(),
            [StateChange::AudioDeviceChanged { result: StateChangeResult::Failed(_), .. }]
        ));
    }
}
