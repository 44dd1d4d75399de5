//! Simulation errors.

use partyline_core::SessionError;
use thiserror::Error;

/// Errors raised while driving a simulated cluster.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// A condition was not reached in time
    #[error("condition not reached after {ticks} ticks")]
    Timeout {
        /// Ticks run before giving up
        ticks: u64,
    },

    /// Peer index out of range
    #[error("peer {peer} does not exist")]
    UnknownPeer {
        /// Requested index
        peer: usize,
    },

    /// Peer connected without publishing a network id
    #[error("peer {peer} has no network id")]
    NoNetworkId {
        /// Peer index
        peer: usize,
    },

    /// A session call failed
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SimError {
    /// Returns true if more ticks might have let the run succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
