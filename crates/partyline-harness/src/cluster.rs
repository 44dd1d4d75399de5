//! Simulated cluster of sessions sharing one relay.
//!
//! Each peer is a real [`Session`] over a [`SimEngine`]. The cluster ticks
//! every peer in index order, collects the events each one raises and can
//! snapshot the whole system for invariant checks.

use partyline_core::{
    DeliveryOption, EntityId, NetworkConfiguration, NetworkId, NoPolicy, PolicyProvider, Session,
    SessionConfig, SessionEvent, SessionStage,
};

use crate::{
    error::SimError,
    invariants::{SessionSnapshot, SystemSnapshot},
    model::{Operation, PeerId},
    scripted::ScriptedIdentity,
    sim_engine::SimEngine,
    sim_network::{SharedSimNetwork, create_shared_network},
};

/// Session type every peer runs.
pub type SimSession<P = NoPolicy> = Session<SimEngine, ScriptedIdentity, P>;

/// Application id peers initialize with.
pub const APP_ID: &str = "partyline-sim";

/// Ticks allowed for a create or join to settle.
pub const SETTLE_TICKS: u64 = 32;

/// Identity of peer `peer`.
pub fn entity_id(peer: usize) -> EntityId {
    EntityId::new(format!("player-{peer}"))
}

/// Simulated peers on one relay.
pub struct Cluster<P = NoPolicy> {
    network: SharedSimNetwork,
    peers: Vec<SimSession<P>>,
    /// Events raised by each peer and not yet taken.
    events: Vec<Vec<SessionEvent>>,
    ticks: u64,
    last_snapshot: Option<SystemSnapshot>,
}

impl Cluster<NoPolicy> {
    /// Create `peers` signed-in, initialized sessions.
    pub fn new(seed: u64, peers: usize) -> Result<Self, SimError> {
        Self::with_config(seed, peers, &SessionConfig::new(APP_ID))
    }

    /// Create `peers` signed-in, initialized sessions sharing `config`.
    pub fn with_config(seed: u64, peers: usize, config: &SessionConfig) -> Result<Self, SimError> {
        let members = (0..peers).map(|i| (ScriptedIdentity::signed_in(entity_id(i)), NoPolicy));
        Self::build(seed, config, members)
    }
}

impl<P: PolicyProvider> Cluster<P> {
    /// Create one initialized session per `(identity, policy)` pair.
    pub fn build(
        seed: u64,
        config: &SessionConfig,
        members: impl IntoIterator<Item = (ScriptedIdentity, P)>,
    ) -> Result<Self, SimError> {
        let network = create_shared_network(seed);
        let mut peers = Vec::new();
        for (identity, policy) in members {
            let engine = SimEngine::new(network.clone());
            let mut session = Session::with_policy(config.clone(), engine, identity, policy);
            session.initialize()?;
            peers.push(session);
        }

        let events = vec![Vec::new(); peers.len()];
        Ok(Self { network, peers, events, ticks: 0, last_snapshot: None })
    }

    /// Shared relay.
    pub fn network(&self) -> &SharedSimNetwork {
        &self.network
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// `true` if the cluster has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Every peer, in index order.
    pub fn peers(&self) -> &[SimSession<P>] {
        &self.peers
    }

    /// Peer `peer`.
    pub fn peer(&self, peer: usize) -> Result<&SimSession<P>, SimError> {
        self.peers.get(peer).ok_or(SimError::UnknownPeer { peer })
    }

    /// Mutable peer `peer`.
    pub fn peer_mut(&mut self, peer: usize) -> Result<&mut SimSession<P>, SimError> {
        self.peers.get_mut(peer).ok_or(SimError::UnknownPeer { peer })
    }

    /// Advance every peer once, in index order.
    pub fn tick(&mut self) {
        for (session, events) in self.peers.iter_mut().zip(&mut self.events) {
            session.advance();
            events.extend(session.take_events());
        }
        self.ticks += 1;
    }

    /// Run `ticks` ticks.
    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Tick until `done` holds, at most `max_ticks` times.
    ///
    /// Returns the number of ticks run.
    pub fn run_until(
        &mut self,
        max_ticks: u64,
        done: impl Fn(&Self) -> bool,
    ) -> Result<u64, SimError> {
        for ran in 0..max_ticks {
            if done(self) {
                return Ok(ran);
            }
            self.tick();
        }
        if done(self) { Ok(max_ticks) } else { Err(SimError::Timeout { ticks: max_ticks }) }
    }

    /// Events raised by `peer` so far and not yet taken.
    pub fn events(&self, peer: usize) -> &[SessionEvent] {
        self.events.get(peer).map_or(&[], Vec::as_slice)
    }

    /// Take every event `peer` raised, including those raised by host
    /// calls since the last tick.
    pub fn take_events(&mut self, peer: usize) -> Vec<SessionEvent> {
        let (Some(session), Some(events)) = (self.peers.get_mut(peer), self.events.get_mut(peer))
        else {
            return Vec::new();
        };
        let mut taken = std::mem::take(events);
        taken.extend(session.take_events());
        taken
    }

    /// Have `host` create a network and wait until it is connected.
    pub fn create(&mut self, host: usize) -> Result<NetworkId, SimError> {
        self.create_with(host, NetworkConfiguration::default())
    }

    /// [`Self::create`] with an explicit configuration.
    pub fn create_with(
        &mut self,
        host: usize,
        config: NetworkConfiguration,
    ) -> Result<NetworkId, SimError> {
        self.peer_mut(host)?.create_and_join_network_with(config)?;
        self.run_until(SETTLE_TICKS, |c| c.is_connected(host))?;
        self.peer(host)?.network_id().cloned().ok_or(SimError::NoNetworkId { peer: host })
    }

    /// Have `peer` join `network_id` and wait until it is connected.
    pub fn join(&mut self, peer: usize, network_id: &NetworkId) -> Result<(), SimError> {
        self.peer_mut(peer)?.join_network(&network_id.to_string())?;
        self.run_until(SETTLE_TICKS, |c| c.is_connected(peer))?;
        Ok(())
    }

    /// Have `host` create a network, every other peer join it, and wait
    /// until everyone sees everyone with a chat control.
    pub fn connect_all(&mut self, host: usize) -> Result<NetworkId, SimError> {
        let network_id = self.create(host)?;
        for peer in (0..self.peers.len()).filter(|&p| p != host) {
            self.join(peer, &network_id)?;
        }

        let expected = self.peers.len().saturating_sub(1);
        self.run_until(SETTLE_TICKS, |c| {
            c.peers.iter().all(|s| {
                s.remote_participants().len() == expected
                    && s.remote_participants().iter().all(|p| p.chat_control().is_some())
            })
        })?;
        Ok(network_id)
    }

    /// `true` if `peer` exists and is connected.
    pub fn is_connected(&self, peer: usize) -> bool {
        self.peers.get(peer).is_some_and(|s| s.stage() == SessionStage::ConnectedToNetwork)
    }

    /// Snapshot every peer, carrying remote handles over from the previous
    /// snapshot.
    pub fn snapshot(&mut self) -> SystemSnapshot {
        let mut snapshot = SystemSnapshot::empty();
        for (peer, session) in self.peers.iter().enumerate() {
            snapshot.add_session(SessionSnapshot::capture(peer, session));
        }
        if let Some(previous) = &self.last_snapshot {
            snapshot.record_history(previous);
        }
        self.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Apply a host operation. Peer indices are taken modulo the cluster
    /// size.
    ///
    /// Session errors are returned as [`SimError::Session`]; random
    /// operations are expected to produce them.
    pub fn apply(&mut self, op: &Operation) -> Result<(), SimError> {
        if self.peers.is_empty() {
            return Ok(());
        }
        let op = op.clone().clamp(self.peers.len());
        let index = |peer: PeerId| usize::from(peer);

        match op {
            Operation::CreateNetwork { peer, max_players } => {
                let config = NetworkConfiguration {
                    max_player_count: u32::from(max_players % 40),
                    ..NetworkConfiguration::default()
                };
                self.peer_mut(index(peer))?.create_and_join_network_with(config)?;
            },
            Operation::JoinPeer { peer, host } => {
                let Some(network_id) = self.peer(index(host))?.network_id().map(ToString::to_string)
                else {
                    return Ok(());
                };
                self.peer_mut(index(peer))?.join_network(&network_id)?;
            },
            Operation::Leave { peer } => self.peer_mut(index(peer))?.leave_network()?,
            Operation::SendData { peer, len, to, guaranteed } => {
                let payload = vec![len; usize::from(len)];
                let recipients: Vec<EntityId> =
                    to.map(|t| entity_id(index(t))).into_iter().collect();
                let delivery = if guaranteed {
                    DeliveryOption::Guaranteed
                } else {
                    DeliveryOption::BestEffort
                };
                self.peer_mut(index(peer))?.send_data(&payload, &recipients, delivery)?;
            },
            Operation::SendChat { peer, seed } => {
                self.peer_mut(index(peer))?.send_chat_to_all(&format!("message {seed}"))?;
            },
            Operation::SetMuted { peer, target, muted } => {
                self.peer_mut(index(peer))?.set_muted(&entity_id(index(target)), muted)?;
            },
            Operation::SetVoiceLevel { peer, target, level } => {
                let level = f32::from(level) / f32::from(u8::MAX);
                self.peer_mut(index(peer))?.set_voice_level(&entity_id(index(target)), level)?;
            },
            Operation::Reset { peer } => self.peer_mut(index(peer))?.reset_session(),
            Operation::Suspend { peer } => self.peer_mut(index(peer))?.suspend()?,
            Operation::Resume { peer } => self.peer_mut(index(peer))?.resume()?,
            Operation::Tick { count } => self.run(u64::from(count % 8) + 1),
        }
        Ok(())
    }
}
