//! Operations for model-based testing.
//!
//! Operations cover everything a host can ask of a session. They are
//! generated randomly (by proptest in tests, from a seeded byte stream in
//! the simulation binary) and applied to a [`crate::Cluster`].

use arbitrary::Arbitrary;

/// Peer index (taken modulo the cluster size).
pub type PeerId = u8;

/// Host operation against one peer of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Create a network and join it.
    CreateNetwork {
        /// Peer creating the network.
        peer: PeerId,
        /// Requested player limit; out-of-range values are rejected.
        max_players: u8,
    },

    /// Join the network another peer published.
    JoinPeer {
        /// Peer joining.
        peer: PeerId,
        /// Peer whose network id is used. A no-op if it has none.
        host: PeerId,
    },

    /// Leave the current network.
    Leave {
        /// Peer leaving.
        peer: PeerId,
    },

    /// Send a data message.
    SendData {
        /// Sender.
        peer: PeerId,
        /// Payload length; zero is rejected.
        len: u8,
        /// Single recipient, or everyone.
        to: Option<PeerId>,
        /// Guaranteed delivery.
        guaranteed: bool,
    },

    /// Send a chat message to everyone.
    SendChat {
        /// Sender.
        peer: PeerId,
        /// Distinguishes message texts.
        seed: u8,
    },

    /// Mute or unmute a participant.
    SetMuted {
        /// Peer changing the setting.
        peer: PeerId,
        /// Participant affected (the peer itself for the microphone).
        target: PeerId,
        /// New mute state.
        muted: bool,
    },

    /// Change a participant's volume.
    SetVoiceLevel {
        /// Peer changing the setting.
        peer: PeerId,
        /// Participant affected.
        target: PeerId,
        /// Level in 255ths.
        level: u8,
    },

    /// Schedule a full reset.
    Reset {
        /// Peer resetting.
        peer: PeerId,
    },

    /// Suspend the session.
    Suspend {
        /// Peer suspending.
        peer: PeerId,
    },

    /// Resume after a suspend.
    Resume {
        /// Peer resuming.
        peer: PeerId,
    },

    /// Advance every peer.
    Tick {
        /// Number of ticks.
        count: u8,
    },
}

impl Operation {
    /// Map every peer index into `0..peers`.
    #[must_use]
    pub fn clamp(self, peers: usize) -> Self {
        let peers = peers.clamp(1, usize::from(u8::MAX));
        let c = |peer: PeerId| (usize::from(peer) % peers) as PeerId;
        match self {
            Self::CreateNetwork { peer, max_players } => {
                Self::CreateNetwork { peer: c(peer), max_players }
            },
            Self::JoinPeer { peer, host } => Self::JoinPeer { peer: c(peer), host: c(host) },
            Self::Leave { peer } => Self::Leave { peer: c(peer) },
            Self::SendData { peer, len, to, guaranteed } => {
                Self::SendData { peer: c(peer), len, to: to.map(c), guaranteed }
            },
            Self::SendChat { peer, seed } => Self::SendChat { peer: c(peer), seed },
            Self::SetMuted { peer, target, muted } => {
                Self::SetMuted { peer: c(peer), target: c(target), muted }
            },
            Self::SetVoiceLevel { peer, target, level } => {
                Self::SetVoiceLevel { peer: c(peer), target: c(target), level }
            },
            Self::Reset { peer } => Self::Reset { peer: c(peer) },
            Self::Suspend { peer } => Self::Suspend { peer: c(peer) },
            Self::Resume { peer } => Self::Resume { peer: c(peer) },
            Self::Tick { count } => Self::Tick { count },
        }
    }

    /// Peer the operation is issued on, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::CreateNetwork { peer, .. }
            | Self::JoinPeer { peer, .. }
            | Self::Leave { peer }
            | Self::SendData { peer, .. }
            | Self::SendChat { peer, .. }
            | Self::SetMuted { peer, .. }
            | Self::SetVoiceLevel { peer, .. }
            | Self::Reset { peer }
            | Self::Suspend { peer }
            | Self::Resume { peer } => Some(*peer),
            Self::Tick { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_maps_every_peer_into_range() {
        let op = Operation::SetMuted { peer: 7, target: 4, muted: true }.clamp(3);
        assert_eq!(op, Operation::SetMuted { peer: 1, target: 1, muted: true });

        let op = Operation::SendData { peer: 2, len: 1, to: Some(5), guaranteed: false }.clamp(2);
        assert_eq!(op.peer(), Some(0));
        assert!(matches!(op, Operation::SendData { to: Some(1), .. }));
    }
}
