//! End-to-end session flows over the simulated relay.
//!
//! Every test runs real sessions against a seeded [`SimNetwork`], so the
//! handles, drops and event order are the same on every run.

use std::{cell::RefCell, rc::Rc};

use partyline_core::{
    ChatMessageType, ChatState, EngineError, ErrorKind, ErrorType, MAX_RECIPIENTS,
    NetworkConfiguration, SessionConfig, SessionError, SessionEvent, SessionStage,
    engine::{PhraseType, StateChange, StateChangeResult},
};
use partyline_harness::{
    APP_ID, Cluster, ScriptedIdentity, SimError, entity_id, lock, sim_network::codes,
};

/// Count events of `peer` matching `pred`.
fn count(cluster: &Cluster, peer: usize, pred: impl Fn(&SessionEvent) -> bool) -> usize {
    cluster.events(peer).iter().filter(|e| pred(e)).count()
}

/// Error codes `peer` raised so far.
fn error_codes(cluster: &Cluster, peer: usize) -> Vec<u32> {
    cluster
        .events(peer)
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Error { code, .. } => Some(*code),
            _ => None,
        })
        .collect()
}

fn connected_pair(seed: u64) -> Cluster {
    let mut cluster = Cluster::new(seed, 2).expect("cluster should build");
    cluster.connect_all(0).expect("peers should connect");
    cluster
}

#[test]
fn create_and_join_connects_both_peers() {
    let mut cluster = Cluster::new(1, 2).expect("cluster should build");
    let network_id = cluster.connect_all(0).expect("peers should connect");

    for peer in 0..2 {
        let session = cluster.peer(peer).expect("peer exists");
        assert_eq!(session.stage(), SessionStage::ConnectedToNetwork);
        assert_eq!(session.network_id(), Some(&network_id));
        assert_eq!(session.remote_participants().len(), 1);
    }

    let host = cluster.peer(0).expect("peer exists");
    assert_eq!(host.remote_participants()[0].entity_id(), &entity_id(1));
    let guest = cluster.peer(1).expect("peer exists");
    assert_eq!(guest.remote_participants()[0].entity_id(), &entity_id(0));
}

/// NetworkJoined is raised exactly once per connection, carrying the
/// shareable identity.
#[test]
fn network_joined_is_raised_once() {
    let mut cluster = connected_pair(2);
    cluster.run(8);
    let network_id = cluster.peer(0).expect("peer exists").network_id().cloned();

    for peer in 0..2 {
        let joined: Vec<_> = cluster
            .events(peer)
            .iter()
            .filter_map(|e| match e {
                SessionEvent::NetworkJoined { network_id } => Some(network_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(joined.len(), 1, "peer {peer} joined events: {joined:?}");
        assert_eq!(Some(&joined[0]), network_id.as_ref());
    }
}

/// Every remote is announced once on join and once on leave; the leaver
/// sees exactly one NetworkLeft.
#[test]
fn roster_changes_are_announced_once() {
    let mut cluster = connected_pair(3);
    let joined = |e: &SessionEvent| matches!(e, SessionEvent::RemoteJoined { .. });
    assert_eq!(count(&cluster, 0, joined), 1);
    assert_eq!(count(&cluster, 1, joined), 1);

    cluster.peer_mut(1).expect("peer exists").leave_network().expect("leave should start");
    assert!(cluster.peer(1).expect("peer exists").is_leaving());
    cluster.run(4);

    let left = |e: &SessionEvent| matches!(e, SessionEvent::RemoteLeft { .. });
    let network_left = |e: &SessionEvent| matches!(e, SessionEvent::NetworkLeft { .. });
    assert_eq!(count(&cluster, 0, left), 1);
    assert_eq!(count(&cluster, 0, network_left), 0);
    assert_eq!(count(&cluster, 1, network_left), 1);

    let host = cluster.peer(0).expect("peer exists");
    assert!(host.remote_participants().is_empty());
    assert_eq!(host.stage(), SessionStage::ConnectedToNetwork);

    let guest = cluster.peer(1).expect("peer exists");
    assert_eq!(guest.stage(), SessionStage::Initialized);
    assert!(guest.network_id().is_none());
    assert!(!guest.is_leaving());
}

#[test]
fn leave_without_network_is_a_noop() {
    let mut cluster = Cluster::new(4, 1).expect("cluster should build");
    let session = cluster.peer_mut(0).expect("peer exists");

    session.leave_network().expect("leave should be a no-op");

    assert_eq!(session.engine().call_count("leave_network"), 0);
    assert!(session.take_events().is_empty());
    assert!(!session.is_leaving());
}

/// Malformed sends are rejected before the engine is touched, whatever the
/// stage.
#[test]
fn invalid_sends_are_rejected_in_every_stage() {
    let mut cluster = connected_pair(5);
    let too_many: Vec<_> = (0..=MAX_RECIPIENTS).map(entity_id).collect();

    let check = |cluster: &mut Cluster| {
        let session = cluster.peer_mut(0).expect("peer exists");
        let before = session.engine().call_count("send_message");

        let err = session.send_data(&[], &[], Default::default()).expect_err("empty payload");
        assert_eq!(err, SessionError::EmptyPayload);
        let err = session.send_data(b"x", &too_many, Default::default()).expect_err("too many");
        assert!(matches!(err, SessionError::TooManyRecipients { max: MAX_RECIPIENTS, .. }));

        assert_eq!(session.engine().call_count("send_message"), before);
        let events = session.take_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            SessionEvent::Error { kind: ErrorKind::Configuration, error_type: ErrorType::Error, .. }
        )));
    };

    check(&mut cluster);
    cluster.peer_mut(0).expect("peer exists").cleanup().expect("cleanup");
    check(&mut cluster);
    cluster.peer_mut(0).expect("peer exists").initialize().expect("initialize");
    check(&mut cluster);
}

#[test]
fn send_requires_connection() {
    let mut cluster = Cluster::new(6, 1).expect("cluster should build");
    let session = cluster.peer_mut(0).expect("peer exists");

    let err = session.send_data_to_all(b"state").expect_err("not connected");
    assert!(matches!(err, SessionError::NotConnected { .. }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(session.engine().call_count("send_message"), 0);
}

#[test]
fn targeted_send_to_unknown_participant_fails() {
    let mut cluster = connected_pair(7);
    let session = cluster.peer_mut(0).expect("peer exists");

    let err = session
        .send_data(b"state", &[entity_id(9)], Default::default())
        .expect_err("unknown recipient");

    assert_eq!(err, SessionError::ParticipantNotFound { entity_id: entity_id(9) });
    assert_eq!(session.engine().call_count("send_message"), 0);
}

#[test]
fn data_reaches_remote_as_owned_copy() {
    let mut cluster = connected_pair(8);
    cluster.peer_mut(0).expect("peer exists").send_data_to_all(b"snapshot").expect("send");
    cluster.run(2);

    let received: Vec<_> = cluster
        .events(1)
        .iter()
        .filter_map(|e| match e {
            SessionEvent::DataReceived { from, payload } => Some((from.clone(), payload.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.entity_id(), &entity_id(0));
    assert_eq!(received[0].1.as_ref(), b"snapshot");
}

/// With copying disabled the listener sees the engine's buffer and no
/// DataReceived event is raised.
#[test]
fn data_listener_sees_messages_without_copy() {
    let mut config = SessionConfig::new(APP_ID);
    config.copy_data_messages = false;
    let mut cluster = Cluster::with_config(9, 2, &config).expect("cluster should build");
    cluster.connect_all(0).expect("peers should connect");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    cluster.peer_mut(1).expect("peer exists").set_data_listener(move |from, payload| {
        sink.borrow_mut().push((from.entity_id().clone(), payload.to_vec()));
    });

    cluster.peer_mut(0).expect("peer exists").send_data_to_all(b"tick 1").expect("send");
    cluster.run(2);

    assert_eq!(*seen.borrow(), vec![(entity_id(0), b"tick 1".to_vec())]);
    assert_eq!(count(&cluster, 1, |e| matches!(e, SessionEvent::DataReceived { .. })), 0);
}

#[test]
fn chat_reaches_remote() {
    let mut cluster = connected_pair(10);
    cluster.peer_mut(0).expect("peer exists").send_chat_to_all("gg").expect("send");
    cluster.run(2);

    let chats: Vec<_> = cluster
        .events(1)
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ChatReceived { from, message, kind } => {
                Some((from.entity_id().clone(), message.clone(), *kind))
            },
            _ => None,
        })
        .collect();
    assert_eq!(chats, vec![(entity_id(0), "gg".to_owned(), ChatMessageType::Text)]);
}

#[test]
fn muting_a_remote_mutes_incoming_audio() {
    let mut cluster = connected_pair(11);
    let session = cluster.peer_mut(0).expect("peer exists");
    let target = session.participant(&entity_id(1)).and_then(|p| p.chat_control());
    let target = target.expect("remote has a chat control");

    session.set_muted(&entity_id(1), true).expect("mute");
    assert_eq!(session.chat_state(&entity_id(1)), ChatState::Muted);
    let device = session.engine().device();
    assert!(lock(session.engine().network()).is_incoming_muted(device, target));

    session.set_muted(&entity_id(1), false).expect("unmute");
    assert_eq!(session.chat_state(&entity_id(1)), ChatState::Silent);
    assert!(!lock(session.engine().network()).is_incoming_muted(device, target));
}

#[test]
fn voice_level_sets_render_volume() {
    let mut cluster = connected_pair(12);
    let session = cluster.peer_mut(0).expect("peer exists");
    let local = session.local_participant().chat_control().expect("local chat control");
    let target = session
        .participant(&entity_id(1))
        .and_then(|p| p.chat_control())
        .expect("remote has a chat control");

    session.set_voice_level(&entity_id(1), 0.25).expect("set level");
    assert_eq!(session.engine().render_volume(local, target), Some(0.25));

    let err = session.set_voice_level(&entity_id(1), 1.5).expect_err("out of range");
    assert_eq!(err, SessionError::VoiceLevelOutOfRange { level: 1.5 });
    assert_eq!(session.engine().render_volume(local, target), Some(0.25));
}

/// Local audio preferences set before sign-in are applied to the chat
/// control once it exists.
#[test]
fn local_preferences_apply_after_sign_in() {
    let mut cluster = Cluster::new(13, 1).expect("cluster should build");
    let session = cluster.peer_mut(0).expect("peer exists");
    session.set_local_muted(true).expect("mute before sign-in");
    session.set_local_voice_level(0.5).expect("level before sign-in");
    assert_eq!(session.engine().call_count("set_audio_input_muted"), 0);

    cluster.create(0).expect("network should be created");

    let session = cluster.peer(0).expect("peer exists");
    let device = session.engine().device();
    let control = session.local_participant().chat_control().expect("local chat control");
    assert!(lock(session.engine().network()).is_input_muted(device));
    assert_eq!(session.engine().render_volume(control, control), Some(0.5));
    assert_eq!(session.chat_state(&entity_id(0)), ChatState::Muted);
}

#[test]
fn full_network_rejects_joiner() {
    let mut cluster = Cluster::new(14, 2).expect("cluster should build");
    let config = NetworkConfiguration { max_player_count: 1, ..NetworkConfiguration::default() };
    let network_id = cluster.create_with(0, config).expect("network should be created");

    let err = cluster.join(1, &network_id).expect_err("join should not complete");
    assert!(err.is_timeout());

    assert!(error_codes(&cluster, 1).contains(&codes::NETWORK_FULL));
    let guest = cluster.peer(1).expect("peer exists");
    assert_eq!(guest.stage(), SessionStage::Initialized);
    assert!(guest.remote_participants().is_empty());
    assert!(cluster.peer(0).expect("peer exists").remote_participants().is_empty());
}

#[test]
fn unknown_network_fails_asynchronously() {
    let mut cluster = Cluster::new(15, 1).expect("cluster should build");
    cluster.peer_mut(0).expect("peer exists").join_network("invite|net-404").expect("staged");
    cluster.run(4);

    assert!(error_codes(&cluster, 0).contains(&codes::NETWORK_NOT_FOUND));
    let session = cluster.peer(0).expect("peer exists");
    assert_ne!(session.stage(), SessionStage::ConnectedToNetwork);
    assert!(session.network_id().is_none());
}

#[test]
fn malformed_network_id_is_rejected() {
    let mut cluster = Cluster::new(16, 1).expect("cluster should build");
    let session = cluster.peer_mut(0).expect("peer exists");

    assert_eq!(session.join_network(""), Err(SessionError::MissingNetworkId));
    assert_eq!(session.join_network("no-separator"), Err(SessionError::MalformedNetworkId));
    assert!(!session.pending_requests().is_queued());
}

/// A relay-side shutdown drops every member back to Initialized and is
/// reported with the relay's reason.
#[test]
fn network_shutdown_returns_members_to_initialized() {
    let mut cluster = connected_pair(17);
    let network_id = cluster.peer(0).expect("peer exists").network_id().cloned();
    let network_id = network_id.expect("network id published");

    assert!(lock(cluster.network()).destroy_network(network_id.descriptor()));
    cluster.run(2);

    for peer in 0..2 {
        let session = cluster.peer(peer).expect("peer exists");
        assert_eq!(session.stage(), SessionStage::Initialized);
        assert!(session.remote_participants().is_empty());
        assert!(error_codes(&cluster, peer).contains(&codes::NETWORK_SHUT_DOWN));
        let left = |e: &SessionEvent| matches!(e, SessionEvent::NetworkLeft { .. });
        assert_eq!(count(&cluster, peer, left), 1);
    }
}

#[test]
fn rotated_invitation_is_republished() {
    let mut cluster = connected_pair(18);
    let network_id = cluster.peer(0).expect("peer exists").network_id().cloned();
    let network_id = network_id.expect("network id published");

    assert!(lock(cluster.network()).rotate_invitation(network_id.descriptor(), "invite-2"));
    cluster.run(2);

    for peer in 0..2 {
        let changed: Vec<_> = cluster
            .events(peer)
            .iter()
            .filter_map(|e| match e {
                SessionEvent::NetworkChanged { network_id } => Some(network_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].invitation_id(), "invite-2");
        assert_eq!(changed[0].descriptor(), network_id.descriptor());
    }
}

#[test]
fn missing_audio_device_is_a_warning() {
    let mut cluster = Cluster::new(19, 1).expect("cluster should build");
    let device = cluster.peer(0).expect("peer exists").engine().device();
    lock(cluster.network()).set_no_audio_device(device, true);

    cluster.create(0).expect("network should still be created");
    cluster.run(2);

    let warnings: Vec<_> = cluster
        .events(0)
        .iter()
        .filter(|e| matches!(e, SessionEvent::Error { error_type: ErrorType::Warning, .. }))
        .collect();
    // input and output
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|e| matches!(
        e,
        SessionEvent::Error { code: EngineError::RESOURCE_NOT_FOUND, .. }
    )));
    assert!(cluster.is_connected(0));
}

/// A refused cleanup releases nothing.
#[test]
fn failed_cleanup_keeps_state() {
    let mut cluster = connected_pair(20);
    let session = cluster.peer_mut(0).expect("peer exists");
    session.engine_mut().fail_next("cleanup", EngineError::new(77, "engine busy"));

    let err = session.cleanup().expect_err("cleanup should fail");
    assert_eq!(err.code(), 77);
    assert_eq!(session.stage(), SessionStage::ConnectedToNetwork);
    assert_eq!(session.remote_participants().len(), 1);
    assert!(session.network_id().is_some());

    session.cleanup().expect("second cleanup should succeed");
    assert_eq!(session.stage(), SessionStage::NotInitialized);
    assert!(session.remote_participants().is_empty());
    assert!(session.network_id().is_none());
}

#[test]
fn signed_out_user_cannot_create() {
    let config = SessionConfig::new(APP_ID);
    let members = [(ScriptedIdentity::signed_out(), partyline_core::NoPolicy)];
    let mut cluster = Cluster::build(21, &config, members).expect("cluster should build");
    let session = cluster.peer_mut(0).expect("peer exists");

    assert_eq!(session.create_and_join_network(), Err(SessionError::NoUserLoggedIn));
    assert!(!session.pending_requests().is_queued());
    assert_eq!(session.engine().call_count("create_network"), 0);
}

#[test]
fn identity_failure_cancels_waiting_request() {
    let config = SessionConfig::new(APP_ID);
    let members = [(ScriptedIdentity::failing("token expired"), partyline_core::NoPolicy)];
    let mut cluster = Cluster::build(22, &config, members).expect("cluster should build");
    cluster.peer_mut(0).expect("peer exists").create_and_join_network().expect("staged");

    let err = cluster.run_until(4, |c| c.is_connected(0)).expect_err("never connects");
    assert_eq!(err, SimError::Timeout { ticks: 4 });

    let session = cluster.peer(0).expect("peer exists");
    assert_eq!(session.stage(), SessionStage::Initialized);
    assert!(!session.pending_requests().is_queued());
    assert_eq!(session.engine().call_count("create_local_user"), 0);
    let identity_errors = count(&cluster, 0, |e| {
        matches!(e, SessionEvent::Error { kind: ErrorKind::Identity, .. })
    });
    assert_eq!(identity_errors, 1);
}

/// A second create while connected leaves first, then creates once the old
/// network is gone.
#[test]
fn create_while_connected_leaves_first() {
    let mut cluster = Cluster::new(23, 1).expect("cluster should build");
    let first = cluster.create(0).expect("network should be created");

    cluster.peer_mut(0).expect("peer exists").create_and_join_network().expect("staged");
    let session = cluster.peer(0).expect("peer exists");
    assert!(session.is_leaving());
    assert!(session.requests_after_leave().queued_create().is_some());

    cluster.run_until(16, |c| {
        c.peer(0).is_ok_and(|s| s.network_id().is_some_and(|id| id != &first))
            && c.is_connected(0)
    })
    .expect("second network should be joined");

    let session = cluster.peer(0).expect("peer exists");
    assert_eq!(session.engine().call_count("create_network"), 2);
    assert_eq!(session.engine().call_count("leave_network"), 1);
    assert_eq!(lock(cluster.network()).network_count(), 1);
}

/// Leaving while a request waits for the leave cancels that request.
#[test]
fn leave_cancels_request_waiting_for_leave() {
    let mut cluster = Cluster::new(24, 1).expect("cluster should build");
    cluster.create(0).expect("network should be created");

    let session = cluster.peer_mut(0).expect("peer exists");
    session.create_and_join_network().expect("staged");
    session.leave_network().expect("leave");
    assert!(!session.requests_after_leave().is_queued());

    cluster.run(8);
    let session = cluster.peer(0).expect("peer exists");
    assert_eq!(session.stage(), SessionStage::Initialized);
    assert_eq!(session.engine().call_count("create_network"), 1);
}

/// Every tick at or above LocalUserCreated drains one batch and hands it
/// back; a failed drain hands nothing back and leaves the queue in place.
#[test]
fn every_drained_batch_is_returned() {
    let mut cluster = connected_pair(25);
    let before = cluster.peer(0).expect("peer exists").engine().batches_returned();
    cluster.run(5);
    assert_eq!(cluster.peer(0).expect("peer exists").engine().batches_returned(), before + 5);

    cluster.take_events(0);
    let session = cluster.peer_mut(0).expect("peer exists");
    session.engine_mut().fail_next("drain_state_changes", EngineError::new(88, "queue busy"));
    cluster.tick();
    let session = cluster.peer(0).expect("peer exists");
    assert_eq!(session.engine().batches_returned(), before + 5);
    assert_eq!(error_codes(&cluster, 0), vec![88]);

    cluster.tick();
    let session = cluster.peer(0).expect("peer exists");
    assert_eq!(session.engine().batches_returned(), before + 6);
    let device = session.engine().device();
    assert_eq!(lock(cluster.network()).pending(device), 0);
}

/// A leave that completes after the network was already torn down reports
/// the departure once.
#[test]
fn late_leave_completion_is_not_reported_twice() {
    let mut cluster = connected_pair(26);
    cluster.take_events(0);
    let device = cluster.peer(0).expect("peer exists").engine().device();
    {
        let mut network = lock(cluster.network());
        network.inject(device, StateChange::NetworkDestroyed { reason: None });
        network.inject(
            device,
            StateChange::LeaveNetworkCompleted { result: StateChangeResult::Succeeded },
        );
    }
    cluster.tick();

    let left = |e: &SessionEvent| matches!(e, SessionEvent::NetworkLeft { .. });
    assert_eq!(count(&cluster, 0, left), 1);
    let session = cluster.peer(0).expect("peer exists");
    assert!(session.network_id().is_none());
    assert!(!session.is_leaving());
}

/// A failed leave keeps the network and raises an error instead.
#[test]
fn failed_leave_completion_keeps_network() {
    let mut cluster = connected_pair(27);
    cluster.take_events(0);
    let device = cluster.peer(0).expect("peer exists").engine().device();
    let failure = StateChangeResult::Failed(EngineError::new(91, "leave refused"));
    lock(cluster.network()).inject(device, StateChange::LeaveNetworkCompleted { result: failure });
    cluster.tick();

    let left = |e: &SessionEvent| matches!(e, SessionEvent::NetworkLeft { .. });
    assert_eq!(count(&cluster, 0, left), 0);
    assert_eq!(error_codes(&cluster, 0), vec![91]);
    assert!(cluster.peer(0).expect("peer exists").network_id().is_some());
}

/// Final transcriptions surface as speech-to-text chat, preferring the
/// first translation; hypotheses are dropped. The local user's own
/// transcription is attributed to the local participant.
#[test]
fn final_transcriptions_become_chat() {
    let mut cluster = connected_pair(28);
    cluster.take_events(0);
    let device = cluster.peer(0).expect("peer exists").engine().device();
    let transcription =
        |speaker: usize, phrase: PhraseType, text: &str, translations: &[&str]| {
            StateChange::TranscriptionReceived {
                speaker_entity_id: entity_id(speaker),
                result: StateChangeResult::Succeeded,
                phrase,
                transcription: text.to_owned(),
                translations: translations.iter().map(|t| (*t).to_owned()).collect(),
            }
        };
    {
        let mut network = lock(cluster.network());
        network.inject(device, transcription(1, PhraseType::Hypothesis, "remote partial", &[]));
        network.inject(device, transcription(1, PhraseType::Final, "remote final", &[]));
        network.inject(device, transcription(0, PhraseType::Final, "self final", &[]));
        network.inject(device, transcription(1, PhraseType::Final, "hola", &["hello"]));
    }
    cluster.tick();

    let chats: Vec<_> = cluster
        .events(0)
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ChatReceived { from, message, kind } => {
                Some((from.entity_id().clone(), message.clone(), *kind))
            },
            _ => None,
        })
        .collect();
    let speech = ChatMessageType::SpeechToText;
    assert_eq!(
        chats,
        vec![
            (entity_id(1), "remote final".to_owned(), speech),
            (entity_id(0), "self final".to_owned(), speech),
            (entity_id(1), "hello".to_owned(), speech),
        ]
    );
    assert!(error_codes(&cluster, 0).is_empty());
}

/// Targeted chat rejects oversized recipient lists and sends nothing when
/// no recipient has a chat control.
#[test]
fn targeted_chat_validates_recipients() {
    let mut cluster = connected_pair(29);
    cluster.take_events(0);
    let session = cluster.peer_mut(0).expect("peer exists");
    let too_many: Vec<_> = (0..=MAX_RECIPIENTS).map(entity_id).collect();

    let err = session.send_chat("hi", &too_many).expect_err("too many recipients");
    assert_eq!(
        err,
        SessionError::TooManyRecipients { count: MAX_RECIPIENTS + 1, max: MAX_RECIPIENTS }
    );
    session.send_chat("hi", &[]).expect("empty recipients are ignored");
    session.send_chat("hi", &[entity_id(9)]).expect("unknown recipients are skipped");
    assert_eq!(session.engine().call_count("send_text"), 0);

    let events = session.take_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SessionEvent::Error { kind: ErrorKind::Configuration, .. }));

    session.send_chat("hi", &[entity_id(1)]).expect("send");
    assert_eq!(session.engine().call_count("send_text"), 1);
}
