//! Model-based tests for the request gate.
//!
//! Create-and-join and join requests made before the local user exists
//! wait in a gate that keeps only the most recent one. The reference model
//! is a single optional slot; the real gate and the session must agree
//! with it after every operation.

use partyline_core::{
    NetworkConfiguration, NetworkId,
    queue::{NetworkRequest, NetworkRequests},
};
use partyline_harness::{
    Cluster, GateModel, GateOp, ModelRequest, ScriptedIdentity, SessionSnapshot, entity_id,
};
use proptest::prelude::*;

fn network_id(network: u8) -> NetworkId {
    NetworkId::new(format!("invite-{network}"), format!("net-{network}"))
}

fn to_model(request: &NetworkRequest) -> ModelRequest {
    match request {
        NetworkRequest::CreateAndJoin(config) => {
            ModelRequest::Create { max_players: config.max_player_count }
        },
        NetworkRequest::Join(id) => {
            let network = id
                .descriptor()
                .strip_prefix("net-")
                .and_then(|n| n.parse().ok())
                .expect("test network ids are net-<u8>");
            ModelRequest::Join { network }
        },
    }
}

fn waiting(requests: &NetworkRequests) -> Option<ModelRequest> {
    requests
        .queued_create()
        .map(|config| NetworkRequest::CreateAndJoin(config.clone()))
        .or_else(|| requests.queued_join().map(|id| NetworkRequest::Join(id.clone())))
        .map(|request| to_model(&request))
}

fn gate_op_strategy() -> impl Strategy<Value = GateOp> {
    prop_oneof![
        3 => (0u8..32).prop_map(|max_players| GateOp::Create { max_players }),
        3 => any::<u8>().prop_map(|network| GateOp::Join { network }),
        1 => Just(GateOp::Release),
        1 => Just(GateOp::Cancel),
    ]
}

/// Only create and join: the operations a host can issue directly.
fn host_request_strategy() -> impl Strategy<Value = GateOp> {
    prop_oneof![
        (0u8..32).prop_map(|max_players| GateOp::Create { max_players }),
        any::<u8>().prop_map(|network| GateOp::Join { network }),
    ]
}

fn apply_to_gate(requests: &mut NetworkRequests, op: GateOp) -> Option<ModelRequest> {
    match op {
        GateOp::Create { max_players } => {
            let config = NetworkConfiguration {
                max_player_count: u32::from(max_players) + 1,
                ..NetworkConfiguration::default()
            };
            requests.stage_create(config);
            None
        },
        GateOp::Join { network } => {
            requests.stage_join(network_id(network));
            None
        },
        GateOp::Release => requests.release().as_ref().map(to_model),
        GateOp::Cancel => {
            requests.cancel();
            None
        },
    }
}

proptest! {
    /// The two-slot gate behaves like a single latest-wins slot.
    #[test]
    fn prop_gate_matches_model(ops in prop::collection::vec(gate_op_strategy(), 1..64)) {
        let mut model = GateModel::new();
        let mut gate = NetworkRequests::default();

        for op in ops {
            let expected = model.apply(op);
            let actual = apply_to_gate(&mut gate, op);

            prop_assert_eq!(actual, expected, "release differs after {:?}", op);
            let slot = model.waiting().cloned();
            prop_assert_eq!(waiting(&gate), slot, "slot differs after {:?}", op);
            prop_assert!(gate.queued_create().is_none() || gate.queued_join().is_none());
        }
    }

    /// Requests made while signing in leave exactly the latest one staged,
    /// and only that one reaches the engine.
    #[test]
    fn prop_session_runs_latest_request(
        ops in prop::collection::vec(host_request_strategy(), 1..16)
    ) {
        let config = partyline_core::SessionConfig::new(partyline_harness::APP_ID);
        let identity = ScriptedIdentity::signed_in(entity_id(0)).with_delay(2);
        let mut cluster = Cluster::build(41, &config, [(identity, partyline_core::NoPolicy)])
            .expect("cluster should build");
        let mut model = GateModel::new();

        for op in &ops {
            model.apply(*op);
            let session = cluster.peer_mut(0).expect("peer exists");
            let result = match *op {
                GateOp::Create { max_players } => {
                    session.create_and_join_network_with(NetworkConfiguration {
                        max_player_count: u32::from(max_players) + 1,
                        ..NetworkConfiguration::default()
                    })
                },
                GateOp::Join { network } => session.join_network(&network_id(network).to_string()),
                GateOp::Release | GateOp::Cancel => Ok(()),
            };
            prop_assert!(result.is_ok());

            let session = cluster.peer(0).expect("peer exists");
            prop_assert_eq!(waiting(session.pending_requests()), model.waiting().cloned());
            let snapshot = SessionSnapshot::capture(0, session);
            prop_assert!(!(snapshot.queued_create && snapshot.queued_join));
        }

        cluster.run(4);
        let engine = cluster.peer(0).expect("peer exists").engine();
        match model.waiting() {
            Some(ModelRequest::Create { .. }) => {
                prop_assert_eq!(engine.call_count("create_network"), 1);
                prop_assert_eq!(engine.call_count("connect_to_network"), 1);
            },
            Some(ModelRequest::Join { .. }) => {
                prop_assert_eq!(engine.call_count("create_network"), 0);
                prop_assert_eq!(engine.call_count("connect_to_network"), 1);
            },
            None => prop_assert!(false, "the last host request is always waiting"),
        }
        prop_assert!(!cluster.peer(0).expect("peer exists").pending_requests().is_queued());
    }
}

/// Identity is requested once however many requests pile up.
#[test]
fn identity_is_requested_once() {
    let config = partyline_core::SessionConfig::new(partyline_harness::APP_ID);
    let identity = ScriptedIdentity::signed_in(entity_id(0)).with_delay(3);
    let mut cluster = Cluster::build(42, &config, [(identity, partyline_core::NoPolicy)])
        .expect("cluster should build");

    cluster.peer_mut(0).expect("peer exists").create_and_join_network().expect("staged");
    cluster.tick();
    cluster.peer_mut(0).expect("peer exists").join_network("invite-1|net-1").expect("staged");
    cluster.tick();
    cluster.peer_mut(0).expect("peer exists").create_and_join_network().expect("staged");

    cluster.run_until(16, |c| c.is_connected(0)).expect("latest create should connect");
    let session = cluster.peer(0).expect("peer exists");
    assert_eq!(session.engine().call_count("create_local_user"), 1);
    assert_eq!(session.engine().call_count("create_network"), 1);
}
