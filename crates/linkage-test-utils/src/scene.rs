//! Ready-made sessions for link tests.

use bevy::prelude::Vec3;
use linkage_core::config::{LinkageConfig, PeerConfig};
use linkage_core::types::{AttachPoint, BodyId, PeerId, Pose};
use linkage_link::LinkSession;
use linkage_link::registry::BodySpec;

/// Distance between the tug hitch and the barge eye at spawn.
pub const TOW_DISTANCE: f32 = 3.0;

/// A fixed tug with a tow hitch facing +X and a 10 kg barge at
/// [`TOW_DISTANCE`] along +X with a tow eye facing back.
pub struct TowScene {
    pub session: LinkSession,
    pub tug: BodyId,
    pub barge: BodyId,
    pub hitch: PeerId,
    pub eye: PeerId,
}

pub fn source_config() -> PeerConfig {
    PeerConfig::source("tow", AttachPoint::new("hitch", Vec3::ZERO, Vec3::X))
}

pub fn target_config() -> PeerConfig {
    PeerConfig::target("tow", AttachPoint::new("eye", Vec3::ZERO, Vec3::NEG_X))
}

/// Default tow scene.
pub fn tow_scene() -> TowScene {
    tow_scene_with(LinkSession::default(), source_config(), target_config())
}

/// Tow scene built on `session` with custom peer configs.
///
/// # Panics
///
/// Panics if the session already holds bodies named `tug` or `barge`.
pub fn tow_scene_with(mut session: LinkSession, source: PeerConfig, target: PeerConfig) -> TowScene {
    let tug = session
        .add_body(BodySpec::fixed("tug", Pose::IDENTITY))
        .expect("tug body");
    let barge = session
        .add_body(BodySpec::dynamic(
            "barge",
            Pose::from_translation(Vec3::new(TOW_DISTANCE, 0.0, 0.0)),
            10.0,
        ))
        .expect("barge body");
    let hitch = session.add_peer(tug, source).expect("hitch peer");
    let eye = session.add_peer(barge, target).expect("eye peer");
    TowScene {
        session,
        tug,
        barge,
        hitch,
        eye,
    }
}

/// Session without gravity, for tests that only care about protocol state.
pub fn weightless_session() -> LinkSession {
    LinkSession::new(LinkageConfig {
        gravity: [0.0; 3],
        ..LinkageConfig::default()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
