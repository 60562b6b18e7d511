//! Link peer data: one end of a potential or actual link.

use linkage_core::config::{CableConfig, PeerConfig};
use linkage_core::events::Topic;
use linkage_core::state::LinkStateMachine;
use linkage_core::types::{
    AttachPoint, BodyId, CoupleMode, LinkState, LinkingMode, PeerId, PeerRole,
};
use linkage_physics::joint::JointController;
use serde::{Deserialize, Serialize};

/// Bus topics a peer listens to while in `state`.
///
/// Sources hear `LinkingStarted` while available and `LinkingStopped` while
/// rejecting. Targets also hear `LinkingStopped` while accepting.
pub const fn topics_for(role: PeerRole, state: LinkState) -> &'static [Topic] {
    match (role, state) {
        (_, LinkState::Available) => &[Topic::LinkingStarted],
        (_, LinkState::RejectingLinks) | (PeerRole::Target, LinkState::AcceptingLinks) => {
            &[Topic::LinkingStopped]
        }
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// CableExtension
// ---------------------------------------------------------------------------

/// Winch of a cable-carrying peer.
#[derive(Debug, Clone, PartialEq)]
pub struct CableExtension {
    max_length: f32,
    deployed_length: f32,
    /// Maximum winch speed in m/s.
    max_speed: f32,
    /// Signed winch speed: positive extends, negative retracts.
    motor_speed: f32,
}

impl CableExtension {
    pub fn new(config: &CableConfig) -> Self {
        Self {
            max_length: config.max_length,
            deployed_length: config.deployed_length.clamp(0.0, config.max_length),
            max_speed: config.motor_speed,
            motor_speed: 0.0,
        }
    }

    pub const fn max_length(&self) -> f32 {
        self.max_length
    }

    pub const fn deployed_length(&self) -> f32 {
        self.deployed_length
    }

    pub const fn motor_speed(&self) -> f32 {
        self.motor_speed
    }

    pub fn is_motor_running(&self) -> bool {
        self.motor_speed.abs() > f32::EPSILON
    }

    /// Set the deployed length, clamped to the winch range. Stops the motor.
    pub fn set_deployed_length(&mut self, length: f32) -> f32 {
        self.deployed_length = length.clamp(0.0, self.max_length);
        self.motor_speed = 0.0;
        self.deployed_length
    }

    /// Set the signed winch speed, clamped to the winch's maximum.
    pub fn set_motor_speed(&mut self, speed: f32) -> f32 {
        self.motor_speed = speed.clamp(-self.max_speed, self.max_speed);
        self.motor_speed
    }

    /// Integrate the motor over `dt`. Returns the new length when it changed.
    ///
    /// The motor stops at either end of its range.
    pub fn advance(&mut self, dt: f32) -> Option<f32> {
        if !self.is_motor_running() {
            return None;
        }
        let next = self.deployed_length + self.motor_speed * dt;
        let clamped = next.clamp(0.0, self.max_length);
        if (clamped - next).abs() > f32::EPSILON {
            self.motor_speed = 0.0;
        }
        self.deployed_length = clamped;
        Some(clamped)
    }

    /// Adopt the length of a freshly created joint.
    pub(crate) fn sync_to_joint(&mut self, length: f32) {
        self.deployed_length = length.min(self.max_length);
    }
}

// ---------------------------------------------------------------------------
// PersistedLink
// ---------------------------------------------------------------------------

/// Previously recorded identity of the other end of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedLink {
    pub target_body: String,
    pub target_attach_point: String,
    /// Whether the bodies were structurally coupled.
    #[serde(default)]
    pub coupled: bool,
}

// ---------------------------------------------------------------------------
// LinkPeer
// ---------------------------------------------------------------------------

/// One end of a link, held in the session arena.
#[derive(Debug, Clone)]
pub struct LinkPeer {
    pub(crate) id: PeerId,
    pub(crate) body: BodyId,
    /// `<body>:<attach point>/<role>`, used as log prefix.
    pub(crate) descriptor: String,
    pub(crate) config: PeerConfig,
    pub(crate) machine: LinkStateMachine,
    pub(crate) other_peer: Option<PeerId>,
    /// Set by the external lock authority.
    pub(crate) locked: bool,
    pub(crate) linking_mode: Option<LinkingMode>,
    pub(crate) joint: Option<JointController>,
    pub(crate) cable: Option<CableExtension>,
    /// A node-check task is already queued.
    pub(crate) node_check_pending: bool,
}

impl LinkPeer {
    pub(crate) fn new(id: PeerId, body: BodyId, body_name: &str, config: PeerConfig) -> Self {
        let descriptor = format!("{body_name}:{}/{}", config.attach_point.id, config.role);
        let joint = (config.role == PeerRole::Source).then(|| {
            let mut joint = JointController::new(config.joint.clone().unwrap_or_default());
            joint.set_couple_on_link(config.couple_mode == CoupleMode::AlwaysCoupled);
            joint
        });
        let cable = config.cable.as_ref().map(CableExtension::new);
        Self {
            id,
            body,
            descriptor,
            machine: LinkStateMachine::new(config.role),
            config,
            other_peer: None,
            locked: false,
            linking_mode: None,
            joint,
            cable,
            node_check_pending: false,
        }
    }

    pub const fn id(&self) -> PeerId {
        self.id
    }

    pub const fn body(&self) -> BodyId {
        self.body
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub const fn role(&self) -> PeerRole {
        self.config.role
    }

    pub const fn state(&self) -> LinkState {
        self.machine.state()
    }

    pub const fn is_linked(&self) -> bool {
        matches!(self.machine.state(), LinkState::Linked)
    }

    pub const fn other_peer(&self) -> Option<PeerId> {
        self.other_peer
    }

    pub fn link_type(&self) -> &str {
        &self.config.link_type
    }

    pub const fn attach_point(&self) -> &AttachPoint {
        &self.config.attach_point
    }

    pub const fn couple_mode(&self) -> CoupleMode {
        self.config.couple_mode
    }

    pub const fn allow_coupling(&self) -> bool {
        self.config.allow_coupling
    }

    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    pub const fn linking_mode(&self) -> Option<LinkingMode> {
        self.linking_mode
    }

    pub const fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub const fn joint(&self) -> Option<&JointController> {
        self.joint.as_ref()
    }

    pub const fn cable(&self) -> Option<&CableExtension> {
        self.cable.as_ref()
    }

    /// Whether `other` may be the far end of a link with this peer.
    pub fn is_compatible(&self, other: &Self) -> bool {
        self.role() == other.role().opposite() && self.link_type() == other.link_type()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bevy::prelude::Vec3;

    use super::*;

    fn source_config() -> PeerConfig {
        PeerConfig::source("tow", AttachPoint::new("hitch", Vec3::ZERO, Vec3::Z))
    }

    #[test]
    fn source_owns_joint_target_does_not() {
        let source = LinkPeer::new(PeerId::new(0), BodyId::new(0), "tug", source_config());
        assert!(source.joint().is_some());
        let target = LinkPeer::new(
            PeerId::new(1),
            BodyId::new(1),
            "barge",
            PeerConfig::target("tow", AttachPoint::new("eye", Vec3::ZERO, Vec3::Z)),
        );
        assert!(target.joint().is_none());
        assert!(source.is_compatible(&target));
        assert!(!source.is_compatible(&source));
    }

    #[test]
    fn descriptor_format() {
        let peer = LinkPeer::new(PeerId::new(0), BodyId::new(0), "tug", source_config());
        assert_eq!(peer.descriptor(), "tug:hitch/source");
        assert_eq!(peer.state(), LinkState::Available);
    }

    #[test]
    fn always_coupled_sets_couple_flag() {
        let config = source_config()
            .with_couple_mode(CoupleMode::AlwaysCoupled)
            .with_allow_coupling(true);
        let peer = LinkPeer::new(PeerId::new(0), BodyId::new(0), "tug", config);
        assert!(peer.joint().unwrap().couple_on_link());
    }

    #[test]
    fn subscription_topics() {
        assert_eq!(
            topics_for(PeerRole::Source, LinkState::Available),
            &[Topic::LinkingStarted]
        );
        assert_eq!(
            topics_for(PeerRole::Target, LinkState::AcceptingLinks),
            &[Topic::LinkingStopped]
        );
        assert!(topics_for(PeerRole::Source, LinkState::Linking).is_empty());
        assert!(topics_for(PeerRole::Target, LinkState::Linked).is_empty());
    }

    #[test]
    fn cable_motor_stops_at_range_end() {
        let mut cable = CableExtension::new(&CableConfig {
            max_length: 1.0,
            deployed_length: 0.9,
            motor_speed: 1.0,
        });
        assert!((cable.set_motor_speed(5.0) - 1.0).abs() < f32::EPSILON);
        let length = cable.advance(0.5).unwrap();
        assert!((length - 1.0).abs() < f32::EPSILON);
        assert!(!cable.is_motor_running());
        assert!(cable.advance(0.5).is_none());
    }

    #[test]
    fn cable_retracts() {
        let mut cable = CableExtension::new(&CableConfig {
            max_length: 10.0,
            deployed_length: 5.0,
            motor_speed: 0.5,
        });
        cable.set_motor_speed(-0.5);
        let length = cable.advance(2.0).unwrap();
        assert!((length - 4.0).abs() < 1e-5);
        assert!(cable.is_motor_running());
    }

    #[test]
    fn cable_set_length_clamps_and_stops() {
        let mut cable = CableExtension::new(&CableConfig::default());
        cable.set_motor_speed(0.2);
        let length = cable.set_deployed_length(100.0);
        assert!((length - cable.max_length()).abs() < f32::EPSILON);
        assert!(!cable.is_motor_running());
    }

    #[test]
    fn persisted_link_from_save_file() {
        let record: PersistedLink = toml::from_str(
            r#"
            target_body = "barge"
            target_attach_point = "eye"
            "#,
        )
        .unwrap();
        assert_eq!(record.target_body, "barge");
        assert!(!record.coupled);
    }
}
