//! Simulation report.

use partyline_core::SessionEvent;
use partyline_harness::{SystemSnapshot, TrafficStats};
use serde::Serialize;

/// Session events seen by one peer, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    /// `NetworkJoined` events.
    pub network_joined: u64,
    /// `NetworkLeft` events.
    pub network_left: u64,
    /// `NetworkChanged` events.
    pub network_changed: u64,
    /// `RemoteJoined` events.
    pub remote_joined: u64,
    /// `RemoteLeft` events.
    pub remote_left: u64,
    /// Chat messages received.
    pub chat_received: u64,
    /// Data messages received.
    pub data_received: u64,
    /// Error and warning events.
    pub errors: u64,
}

impl EventCounts {
    /// Count `event`.
    pub fn record(&mut self, event: &SessionEvent) {
        let counter = match event {
            SessionEvent::NetworkJoined { .. } => &mut self.network_joined,
            SessionEvent::NetworkLeft { .. } => &mut self.network_left,
            SessionEvent::NetworkChanged { .. } => &mut self.network_changed,
            SessionEvent::RemoteJoined { .. } => &mut self.remote_joined,
            SessionEvent::RemoteLeft { .. } => &mut self.remote_left,
            SessionEvent::ChatReceived { .. } => &mut self.chat_received,
            SessionEvent::DataReceived { .. } => &mut self.data_received,
            SessionEvent::Error { .. } => &mut self.errors,
        };
        *counter += 1;
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// RNG seed of the run.
    pub seed: u64,
    /// Ticks completed.
    pub ticks: u64,
    /// Random operations applied.
    pub operations: u64,
    /// Operations the session rejected.
    pub rejected: u64,
    /// Invariant violations, formatted with the tick they were seen at.
    pub violations: Vec<String>,
    /// Per-peer event counts.
    pub events: Vec<EventCounts>,
    /// Relay traffic.
    pub traffic: TrafficStats,
    /// Observable state at the end of the run.
    pub final_state: SystemSnapshot,
}

#[cfg(test)]
mod tests {
    use partyline_core::{ErrorKind, ErrorType, NetworkId};

    use super::*;

    #[test]
    fn counts_by_kind() {
        let mut counts = EventCounts::default();
        let network_id = NetworkId::new("invite", "descriptor");
        counts.record(&SessionEvent::NetworkJoined { network_id: network_id.clone() });
        counts.record(&SessionEvent::NetworkLeft { network_id: Some(network_id) });
        counts.record(&SessionEvent::Error {
            code: 1,
            message: "warning".to_owned(),
            error_type: ErrorType::Warning,
            kind: ErrorKind::Engine,
        });

        assert_eq!(counts.network_joined, 1);
        assert_eq!(counts.network_left, 1);
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.remote_joined, 0);
    }
}
