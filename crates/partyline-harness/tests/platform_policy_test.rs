//! Platform policy integration.
//!
//! Every peer signs in through a scripted platform backend and announces
//! its platform id to the others with an internal data message.

use partyline_core::{
    ChatState, EngineError, NetworkConfiguration, Participant, SessionConfig, SessionEvent,
    SessionStage, engine::ChatPermissions, policy::PlatformPolicy,
};
use partyline_harness::{
    APP_ID, Cluster, SETTLE_TICKS, ScriptedIdentity, ScriptedPlatform, entity_id, lock,
};

type PlatformCluster = Cluster<PlatformPolicy<ScriptedPlatform>>;

fn platform_cluster(seed: u64, peers: usize) -> PlatformCluster {
    let config = SessionConfig::new(APP_ID);
    let members = (0..peers).map(|i| {
        let platform = ScriptedPlatform::new(entity_id(i), format!("xuid-{i}"));
        (ScriptedIdentity::signed_out(), PlatformPolicy::new(platform))
    });
    Cluster::build(seed, &config, members).expect("cluster should build")
}

/// Wait until every peer has registered every other peer's platform id.
fn exchange_identities(cluster: &mut PlatformCluster) {
    let expected = cluster.len() - 1;
    cluster
        .run_until(SETTLE_TICKS, |c| {
            c.peers().iter().all(|s| s.policy().backend().registered().len() == expected)
        })
        .expect("identities should be exchanged");
}

/// Remotes learn each other's platform id and register it, without the
/// exchange surfacing as application data.
#[test]
fn identities_are_exchanged_and_registered() {
    let mut cluster = platform_cluster(61, 2);
    cluster.connect_all(0).expect("peers should connect");
    exchange_identities(&mut cluster);

    let host = cluster.peer(0).expect("peer exists");
    assert_eq!(host.policy().backend().registered(), ["xuid-1"]);
    assert_eq!(host.local_participant().platform_id(), Some("xuid-0"));
    let remote = host.participant(&entity_id(1)).expect("remote is known");
    assert_eq!(remote.platform_id(), Some("xuid-1"));
    assert_eq!(host.policy().pending_registrations().count(), 0);

    let guest = cluster.peer(1).expect("peer exists");
    assert_eq!(guest.policy().backend().registered(), ["xuid-0"]);

    for peer in 0..cluster.len() {
        let data = cluster
            .events(peer)
            .iter()
            .filter(|e| matches!(e, SessionEvent::DataReceived { .. }))
            .count();
        assert_eq!(data, 0, "peer {peer} saw identity messages as data");
    }
}

/// The platform signs the user in; the identity provider is never asked.
#[test]
fn platform_signs_in_once_per_local_user() {
    let mut cluster = platform_cluster(62, 1);
    cluster.create(0).expect("network should be created");
    assert_eq!(cluster.peer(0).expect("peer exists").policy().backend().sign_ins(), 1);

    cluster.peer_mut(0).expect("peer exists").leave_network().expect("leave");
    cluster
        .run_until(SETTLE_TICKS, |c| {
            c.peer(0).is_ok_and(|s| s.stage() == SessionStage::Initialized)
        })
        .expect("leave should finish");
    cluster
        .create_with(0, NetworkConfiguration::default())
        .expect("second network should be created");

    let session = cluster.peer_mut(0).expect("peer exists");
    assert_eq!(session.policy().backend().sign_ins(), 1);
    assert_eq!(session.identity_mut().requests(), 0);
}

/// A platform permission change mutes the remote and is reported as a
/// platform mute rather than a user one.
#[test]
fn required_permissions_mute_remote() {
    let mut cluster = platform_cluster(63, 2);
    cluster.connect_all(0).expect("peers should connect");
    exchange_identities(&mut cluster);

    let host = cluster.peer_mut(0).expect("peer exists");
    let control = host
        .participant(&entity_id(1))
        .and_then(Participant::chat_control)
        .expect("remote has a chat control");
    let device = host.engine().device();
    lock(host.engine().network()).require_permissions(device, control, ChatPermissions::NONE);
    host.policy_mut().backend_mut().change_permissions("xuid-0", "xuid-1");
    cluster.tick();

    let host = cluster.peer(0).expect("peer exists");
    assert_eq!(host.chat_state(&entity_id(1)), ChatState::MutedByPlatform);
    let remote = host.participant(&entity_id(1)).expect("remote is known");
    assert!(remote.is_muted_by_platform());

    let network = lock(cluster.network());
    assert_eq!(network.granted_permissions(device, control), Some(ChatPermissions::NONE));
    assert!(network.is_incoming_muted(device, control));
}

/// A permission change waiting for identities is replaced by a newer one,
/// and runs once both users are known.
#[test]
fn waiting_permission_update_is_replaced() {
    let mut cluster = platform_cluster(64, 3);
    {
        let backend = cluster.peer_mut(0).expect("peer exists").policy_mut().backend_mut();
        backend.change_permissions("xuid-0", "xuid-1");
        backend.change_permissions("xuid-0", "xuid-2");
    }
    cluster.tick();

    let pending = cluster
        .peer(0)
        .expect("peer exists")
        .policy()
        .pending_permission_update()
        .cloned()
        .expect("update should wait for identities");
    assert_eq!(pending.target_platform_id, "xuid-2");

    cluster.connect_all(0).expect("peers should connect");
    exchange_identities(&mut cluster);
    cluster.run(2);

    let host = cluster.peer(0).expect("peer exists");
    assert!(host.policy().pending_permission_update().is_none());
    assert_eq!(host.chat_state(&entity_id(1)), host.chat_state(&entity_id(2)));
}

/// A failed registration stays queued and succeeds on a later tick.
#[test]
fn failed_registration_is_retried() {
    let mut cluster = platform_cluster(65, 2);
    cluster.peer_mut(0).expect("peer exists").policy_mut().backend_mut().fail_registrations(1);
    cluster.connect_all(0).expect("peers should connect");
    exchange_identities(&mut cluster);

    let host = cluster.peer(0).expect("peer exists");
    assert_eq!(host.policy().backend().registered(), ["xuid-1"]);
    assert_eq!(host.policy().pending_registrations().count(), 0);
    let failures = cluster
        .events(0)
        .iter()
        .filter(|e| {
            matches!(e, SessionEvent::Error { code: EngineError::RESOURCE_NOT_FOUND, .. })
        })
        .count();
    assert_eq!(failures, 1);
}
