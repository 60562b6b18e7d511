//! Integration test: the link protocol between a tug and a barge.
//!
//! Covers linking sessions, the linked-pair invariant, rejected links,
//! collaborator notifications, relinking and restoring persisted links.

use std::sync::{Arc, Mutex};

use bevy::prelude::Vec3;
use linkage_core::config::{JointConfig, PeerConfig};
use linkage_core::error::{LinkCheckError, LinkError};
use linkage_core::events::BusEvent;
use linkage_core::types::{AttachPoint, LinkActor, LinkEvent, LinkState, LinkingMode, PeerId};
use linkage_link::LinkSession;
use linkage_link::peer::PersistedLink;
use linkage_test_utils::{
    RecordingListener, RecordingRenderer, TowScene, source_config, target_config, tow_scene_with,
    weightless_session,
};

fn scene() -> TowScene {
    tow_scene_with(weightless_session(), source_config(), target_config())
}

/// Both peers are linked to each other and the source holds a live joint,
/// or neither is linked and no joint exists.
fn assert_pair_consistent(session: &LinkSession, source: PeerId, target: PeerId) {
    let src = session.peer(source).unwrap();
    let tgt = session.peer(target).unwrap();
    let joint = src.joint().unwrap();
    if src.is_linked() {
        assert!(tgt.is_linked());
        assert_eq!(src.other_peer(), Some(target));
        assert_eq!(tgt.other_peer(), Some(source));
        assert!(joint.is_live(session.physics()));
    } else {
        assert!(!tgt.is_linked());
        assert!(src.other_peer().is_none());
        assert!(tgt.other_peer().is_none());
        assert!(!joint.has_joint());
    }
}

#[test]
fn interactive_link_lifecycle() {
    let TowScene {
        mut session,
        hitch,
        eye,
        ..
    } = scene();

    session
        .start_linking(hitch, LinkingMode::Interactive, LinkActor::Player)
        .unwrap();
    assert_eq!(session.peer_state(eye), Some(LinkState::AcceptingLinks));
    assert_eq!(
        session.peer(hitch).unwrap().linking_mode(),
        Some(LinkingMode::Interactive)
    );
    assert!(session.check_can_link(hitch, eye).unwrap().is_empty());

    session.link_to_target(hitch, eye, LinkActor::Player).unwrap();
    assert_eq!(session.peer_state(hitch), Some(LinkState::Linked));
    assert_pair_consistent(&session, hitch, eye);

    session.run_steps(3);
    assert_pair_consistent(&session, hitch, eye);

    session.break_current_link(hitch, LinkActor::Player).unwrap();
    assert_eq!(session.peer_state(hitch), Some(LinkState::Available));
    assert_eq!(session.peer_state(eye), Some(LinkState::Available));
    assert_pair_consistent(&session, hitch, eye);
}

#[test]
fn link_publishes_events_in_order() {
    let TowScene {
        mut session,
        hitch,
        eye,
        ..
    } = scene();
    session
        .link_to_target_with(LinkActor::Api, hitch, eye)
        .unwrap();
    let created = LinkEvent::new(hitch, eye, LinkActor::Api);
    assert_eq!(
        session.drain_events(),
        vec![
            BusEvent::LinkingStarted(hitch),
            BusEvent::LinkingStopped(hitch),
            BusEvent::LinkAccepted(eye),
            BusEvent::LinkCreated(created),
        ]
    );

    session.break_current_link(eye, LinkActor::Player).unwrap();
    assert_eq!(
        session.drain_events(),
        vec![BusEvent::LinkBroken(LinkEvent::new(
            hitch,
            eye,
            LinkActor::Player
        ))]
    );
}

#[test]
fn second_source_rejects_while_linking() {
    let TowScene {
        mut session,
        tug,
        hitch,
        eye,
        ..
    } = scene();
    let bow = session
        .add_peer(
            tug,
            PeerConfig::source("tow", AttachPoint::new("bow", Vec3::ZERO, Vec3::X)),
        )
        .unwrap();

    session
        .start_linking(hitch, LinkingMode::Interactive, LinkActor::Player)
        .unwrap();
    assert_eq!(session.peer_state(bow), Some(LinkState::RejectingLinks));
    let err = session
        .start_linking(bow, LinkingMode::Interactive, LinkActor::Player)
        .unwrap_err();
    assert!(matches!(err, LinkError::IllegalTransition { .. }));

    let errors = session.check_can_link(bow, eye).unwrap();
    assert!(errors.contains(&LinkCheckError::SourceNotAvailable));

    session.cancel_linking(hitch).unwrap();
    assert_eq!(session.peer_state(bow), Some(LinkState::Available));
    assert_eq!(session.peer_state(eye), Some(LinkState::Available));
}

#[test]
fn rejected_link_changes_nothing() {
    let renderer = RecordingRenderer::with_hits(vec![LinkCheckError::ColliderHit("pier".into())]);
    let log = renderer.log();
    let TowScene {
        mut session,
        tug,
        hitch,
        eye,
        ..
    } = tow_scene_with(
        weightless_session(),
        source_config()
            .with_renderer("line")
            .with_joint(JointConfig {
                max_length: 2.0,
                ..JointConfig::default()
            }),
        target_config(),
    );
    session.add_renderer(tug, "line", Box::new(renderer)).unwrap();

    session
        .start_linking(hitch, LinkingMode::Interactive, LinkActor::Player)
        .unwrap();
    let err = session.link_to_target(hitch, eye, LinkActor::Player).unwrap_err();
    let LinkError::Rejected(errors) = &err else {
        panic!("expected rejection, got {err:?}");
    };
    assert!(matches!(errors[0], LinkCheckError::TooLong { .. }));
    assert_eq!(errors[1], LinkCheckError::ColliderHit("pier".into()));
    assert!(err.to_string().starts_with("Cannot link: "));

    assert_eq!(session.peer_state(hitch), Some(LinkState::Linking));
    assert_eq!(session.peer_state(eye), Some(LinkState::AcceptingLinks));
    assert_pair_consistent(&session, hitch, eye);
    assert_eq!(log.lock().unwrap().starts, 0);
    assert!(session.status().last().unwrap().is_error);
}

#[test]
fn failed_api_link_cancels_session() {
    let TowScene {
        mut session,
        hitch,
        eye,
        ..
    } = tow_scene_with(
        weightless_session(),
        source_config().with_joint(JointConfig {
            max_length: 1.0,
            ..JointConfig::default()
        }),
        target_config(),
    );
    assert!(session.link_to_target_with(LinkActor::Api, hitch, eye).is_err());
    assert_eq!(session.peer_state(hitch), Some(LinkState::Available));
    assert_eq!(session.peer_state(eye), Some(LinkState::Available));
}

#[test]
fn collaborators_notified_on_link_and_unlink() {
    let TowScene {
        mut session,
        tug,
        barge,
        hitch,
        eye,
    } = tow_scene_with(
        weightless_session(),
        source_config().with_renderer("line"),
        target_config(),
    );
    assert_eq!(session.find_peer("barge", "eye"), Some(eye));
    let renderer = RecordingRenderer::new();
    let render_log = renderer.log();
    session.add_renderer(tug, "line", Box::new(renderer)).unwrap();
    let tug_listener = RecordingListener::new();
    let tug_log = tug_listener.log();
    session.add_state_listener(tug, Box::new(tug_listener)).unwrap();
    let barge_listener = RecordingListener::new();
    let barge_log = barge_listener.log();
    session.add_state_listener(barge, Box::new(barge_listener)).unwrap();

    session
        .link_to_target_with(LinkActor::Player, hitch, eye)
        .unwrap();
    {
        let log = render_log.lock().unwrap();
        assert!(log.started);
        let (from, to) = log.last_endpoints.unwrap();
        assert!((to - from).length() > 2.9);
    }
    let event = LinkEvent::new(hitch, eye, LinkActor::Player);
    assert_eq!(tug_log.lock().unwrap().as_slice(), &[(event, true)]);
    assert_eq!(barge_log.lock().unwrap().as_slice(), &[(event, true)]);

    session.break_current_link(hitch, LinkActor::Api).unwrap();
    assert!(!render_log.lock().unwrap().started);
    let broken = LinkEvent::new(hitch, eye, LinkActor::Api);
    assert_eq!(tug_log.lock().unwrap().last(), Some(&(broken, false)));
}

#[test]
fn relink_recreates_identical_joint() {
    let TowScene {
        mut session,
        hitch,
        eye,
        ..
    } = scene();
    session
        .link_to_target_with(LinkActor::Api, hitch, eye)
        .unwrap();
    let first = session.peer(hitch).unwrap().joint().unwrap().spec().unwrap();
    session.break_current_link(hitch, LinkActor::Api).unwrap();
    session
        .link_to_target_with(LinkActor::Api, hitch, eye)
        .unwrap();
    let second = session.peer(hitch).unwrap().joint().unwrap().spec().unwrap();
    assert_eq!(first, second);
    assert!((first.length - 3.0).abs() < 1e-4);
}

#[test]
fn bus_listener_observes_link() {
    let TowScene {
        mut session,
        hitch,
        eye,
        ..
    } = scene();
    let created = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&created);
    session.add_bus_listener(Box::new(move |event| {
        if matches!(event, BusEvent::LinkCreated(_)) {
            *counter.lock().unwrap() += 1;
        }
    }));
    session
        .link_to_target_with(LinkActor::Api, hitch, eye)
        .unwrap();
    assert_eq!(*created.lock().unwrap(), 1);
}

#[test]
fn restore_relinks_without_events() {
    let TowScene {
        mut session,
        hitch,
        eye,
        ..
    } = scene();
    let record = PersistedLink {
        target_body: "barge".into(),
        target_attach_point: "eye".into(),
        coupled: false,
    };
    session.restore_other_peer(hitch, &record).unwrap();
    assert_eq!(session.peer_state(hitch), Some(LinkState::Linked));
    assert_eq!(session.peer_state(eye), Some(LinkState::Linked));
    assert_pair_consistent(&session, hitch, eye);
    assert!(session.drain_events().is_empty());
    assert_eq!(session.persisted_link(hitch), Some(record));
}

#[test]
fn restore_of_missing_target_fails() {
    let TowScene {
        mut session,
        hitch,
        eye,
        ..
    } = scene();
    let record = PersistedLink {
        target_body: "ghost".into(),
        target_attach_point: "eye".into(),
        coupled: false,
    };
    let err = session.restore_other_peer(hitch, &record).unwrap_err();
    assert_eq!(err, LinkError::CannotRestore { body: "tug".into() });
    assert_eq!(session.peer_state(hitch), Some(LinkState::Available));
    assert_eq!(session.peer_state(eye), Some(LinkState::Available));
    assert!(session.status().last().unwrap().is_error);
}
