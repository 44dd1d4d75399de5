//! One simulated multi-peer session.
//!
//! Peer 0 creates a network and every other peer joins it. From then on
//! each step may apply one random host operation, then advances every peer
//! once and checks the session invariants.

use arbitrary::{Arbitrary, Unstructured};
use partyline_core::{NetworkConfiguration, SessionConfig};
use partyline_harness::{Cluster, InvariantRegistry, Operation, SETTLE_TICKS, SimError, lock};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::{
    error::RunError,
    report::{EventCounts, Report},
};

/// Bytes of randomness fed to each operation.
const OPERATION_BYTES: usize = 16;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// RNG seed for the relay and the operation stream.
    pub seed: u64,
    /// Number of peers.
    pub peers: usize,
    /// Player limit of the initial network.
    pub max_players: u32,
    /// Best-effort loss probability.
    pub loss_rate: f64,
    /// Probability that a step applies a random operation.
    pub operation_rate: f64,
    /// Session configuration shared by every peer.
    pub session: SessionConfig,
}

/// A running simulation.
pub struct Simulation {
    cluster: Cluster,
    registry: InvariantRegistry,
    operation_rate: f64,
    report: Report,
}

impl Simulation {
    /// Build the cluster and connect every peer that fits in the network.
    pub fn start(config: &SimConfig) -> Result<Self, RunError> {
        let network_config = NetworkConfiguration {
            max_player_count: config.max_players,
            ..NetworkConfiguration::default()
        };
        network_config.validate()?;

        let mut cluster = Cluster::with_config(config.seed, config.peers, &config.session)?;
        lock(cluster.network()).set_loss_rate(config.loss_rate);

        let network_id = cluster.create_with(0, network_config)?;
        tracing::info!(%network_id, "host created network");
        for peer in 1..cluster.len() {
            match cluster.join(peer, &network_id) {
                Ok(()) => tracing::info!(peer, "peer joined"),
                Err(err) => tracing::warn!(peer, %err, "peer could not join"),
            }
        }
        cluster.run(SETTLE_TICKS);

        let report = Report {
            seed: config.seed,
            events: vec![EventCounts::default(); cluster.len()],
            ..Report::default()
        };
        let mut sim = Self {
            cluster,
            registry: InvariantRegistry::standard(),
            operation_rate: config.operation_rate.clamp(0.0, 1.0),
            report,
        };
        sim.collect_events();
        Ok(sim)
    }

    /// Run one step.
    pub fn step(&mut self, rng: &mut ChaCha8Rng) {
        if rng.gen_bool(self.operation_rate)
            && let Some(op) = next_operation(rng)
        {
            self.apply(&op);
        }

        self.cluster.tick();
        self.report.ticks += 1;
        self.collect_events();
        self.check_invariants();
    }

    /// Violations recorded so far.
    pub fn violations(&self) -> usize {
        self.report.violations.len()
    }

    /// Stop and produce the report.
    pub fn finish(mut self) -> Report {
        self.report.traffic = lock(self.cluster.network()).stats();
        self.report.final_state = self.cluster.snapshot();
        self.report
    }

    fn apply(&mut self, op: &Operation) {
        self.report.operations += 1;
        match self.cluster.apply(op) {
            Ok(()) => tracing::debug!(?op, "applied"),
            Err(SimError::Session(err)) => {
                self.report.rejected += 1;
                tracing::debug!(?op, %err, "rejected");
            },
            Err(err) => tracing::warn!(?op, %err, "operation failed"),
        }
    }

    fn collect_events(&mut self) {
        for (peer, counts) in self.report.events.iter_mut().enumerate() {
            for event in self.cluster.take_events(peer) {
                counts.record(&event);
            }
        }
    }

    fn check_invariants(&mut self) {
        let snapshot = self.cluster.snapshot();
        let Err(violations) = self.registry.check_all(&snapshot) else {
            return;
        };
        let tick = self.report.ticks;
        for violation in violations {
            tracing::error!(tick, %violation, "invariant violated");
            self.report.violations.push(format!("tick {tick}: {violation}"));
        }
    }
}

/// Decode a random host operation. Tick operations are skipped; the
/// simulation ticks on its own.
fn next_operation(rng: &mut ChaCha8Rng) -> Option<Operation> {
    let mut bytes = [0u8; OPERATION_BYTES];
    rng.fill(&mut bytes);
    Operation::arbitrary(&mut Unstructured::new(&bytes))
        .ok()
        .filter(|op| !matches!(op, Operation::Tick { .. }))
}

#[cfg(test)]
mod tests {
    use partyline_harness::APP_ID;
    use rand::SeedableRng;

    use super::*;

    fn config(seed: u64) -> SimConfig {
        SimConfig {
            seed,
            peers: 3,
            max_players: 8,
            loss_rate: 0.1,
            operation_rate: 0.5,
            session: SessionConfig::new(APP_ID),
        }
    }

    fn run(seed: u64, steps: u64) -> Report {
        let mut sim = Simulation::start(&config(seed)).expect("simulation should start");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for _ in 0..steps {
            sim.step(&mut rng);
        }
        sim.finish()
    }

    #[test]
    fn start_connects_every_peer() {
        let report = run(1, 0);
        assert_eq!(report.events.len(), 3);
        assert_eq!(report.events[0].network_joined, 1);
        assert_eq!(report.events[0].remote_joined, 2);
        assert!(report.final_state.sessions.iter().all(|s| s.remotes.len() == 2));
    }

    #[test]
    fn random_run_keeps_invariants() {
        let report = run(2, 200);
        assert!(report.violations.is_empty(), "{:?}", report.violations);
        assert_eq!(report.ticks, 200);
        assert!(report.operations > 0);
    }

    #[test]
    fn same_seed_same_report() {
        let first = run(3, 100);
        let second = run(3, 100);
        assert_eq!(first.events, second.events);
        assert_eq!(first.traffic, second.traffic);
        assert_eq!(first.operations, second.operations);
        assert_eq!(first.rejected, second.rejected);
    }

    #[test]
    fn small_network_leaves_late_peers_out() {
        let mut config = config(4);
        config.max_players = 2;
        let report = Simulation::start(&config).expect("simulation should start").finish();
        assert_eq!(report.events[0].remote_joined, 1);
        assert_eq!(report.final_state.sessions[2].remotes.len(), 0);
    }

    #[test]
    fn invalid_player_limit_is_rejected() {
        let mut config = config(5);
        config.max_players = 0;
        assert!(matches!(Simulation::start(&config), Err(RunError::Config(_))));
    }
}
