use std::fmt;

use bevy::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

macro_rules! arena_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            pub const fn index(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_handle!(
    /// Stable handle of a link peer inside a session arena.
    ///
    /// Handles are never reused, so a stale handle simply stops resolving.
    PeerId,
    "peer"
);
arena_handle!(
    /// Stable handle of a simulated body.
    BodyId,
    "body"
);
arena_handle!(
    /// Structural group (a set of rigidly merged bodies).
    GroupId,
    "group"
);
arena_handle!(
    /// Stable handle of a detachable physics child.
    ProxyId,
    "proxy"
);

/// Monotonic allocator for arena handles.
#[derive(Debug, Clone, Default)]
pub struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Next raw index. Never returns the same value twice.
    pub const fn allocate(&mut self) -> u32 {
        let index = self.next;
        self.next = self.next.wrapping_add(1);
        index
    }
}

// ---------------------------------------------------------------------------
// LinkState
// ---------------------------------------------------------------------------

/// State of a link peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Idle and ready to start or accept a link.
    Available,
    /// Source only: a linking session is open on this peer.
    Linking,
    /// Target only: some compatible source is linking.
    AcceptingLinks,
    /// Another peer is linking; this one refuses new links.
    RejectingLinks,
    /// Connected to the other peer through a joint.
    Linked,
    /// Forced out of service by an external authority.
    Locked,
    /// The attach node is occupied by an incompatible object.
    NodeBlocked,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Available => "Available",
            Self::Linking => "Linking",
            Self::AcceptingLinks => "AcceptingLinks",
            Self::RejectingLinks => "RejectingLinks",
            Self::Linked => "Linked",
            Self::Locked => "Locked",
            Self::NodeBlocked => "NodeBlocked",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// PeerRole
// ---------------------------------------------------------------------------

/// Which end of a link a peer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Initiates links and owns the joint.
    Source,
    /// Accepts links.
    Target,
}

impl PeerRole {
    /// The role a peer must have to link with this one.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Source => Self::Target,
            Self::Target => Self::Source,
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Target => "target",
        })
    }
}

// ---------------------------------------------------------------------------
// LinkActor / CoupleMode / LinkingMode
// ---------------------------------------------------------------------------

/// Who or what caused a link state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkActor {
    /// A direct player action.
    Player,
    /// Another module or script.
    #[default]
    Api,
    /// The physics engine (joint broke, body destroyed).
    Physics,
    /// No actor recorded.
    None,
}

/// Whether a link also merges the two bodies into one structural group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoupleMode {
    /// The couple flag is flipped manually and kept across links.
    ManualToggle,
    /// Every link couples the bodies.
    AlwaysCoupled,
    /// Links never couple the bodies.
    #[default]
    NeverCoupled,
}

/// How a linking session was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkingMode {
    /// Interactive session driven by the player.
    Interactive,
    /// Programmatic session, no user interaction.
    #[default]
    Api,
}

// ---------------------------------------------------------------------------
// LinkEvent
// ---------------------------------------------------------------------------

/// Immutable record describing a link state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkEvent {
    pub source: PeerId,
    pub target: PeerId,
    pub actor: LinkActor,
}

impl LinkEvent {
    pub const fn new(source: PeerId, target: PeerId, actor: LinkActor) -> Self {
        Self {
            source,
            target,
            actor,
        }
    }
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Rigid transform: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub const fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub const fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            rotation: Quat::IDENTITY,
        }
    }

    /// Map a point from this pose's local frame to the parent frame.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.translation + self.rotation * point
    }

    /// Map a direction from this pose's local frame to the parent frame.
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            translation: rotation * -self.translation,
            rotation,
        }
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn mul_pose(&self, other: &Self) -> Self {
        Self {
            translation: self.transform_point(other.translation),
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    /// Express `world` relative to `self`.
    pub fn relative(&self, world: &Self) -> Self {
        self.inverse().mul_pose(world)
    }

    /// Approximate equality within `tolerance` on translation and rotation.
    pub fn abs_diff_eq(&self, other: &Self, tolerance: f32) -> bool {
        self.translation.abs_diff_eq(other.translation, tolerance)
            && (self.rotation.abs_diff_eq(other.rotation, tolerance)
                || self.rotation.abs_diff_eq(-other.rotation, tolerance))
    }
}

// ---------------------------------------------------------------------------
// AttachPoint
// ---------------------------------------------------------------------------

/// Geometric attachment point on a body, in body-local coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachPoint {
    /// Identifier, unique per body.
    pub id: String,
    #[serde(default)]
    pub position: [f32; 3],
    /// Outward normal of the attach node.
    #[serde(default = "default_normal")]
    pub normal: [f32; 3],
}

const fn default_normal() -> [f32; 3] {
    [0.0, 0.0, 1.0]
}

impl AttachPoint {
    pub fn new(id: impl Into<String>, position: Vec3, normal: Vec3) -> Self {
        Self {
            id: id.into(),
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }

    pub fn local_position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn local_normal(&self) -> Vec3 {
        Vec3::from_array(self.normal).normalize_or_zero()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_display_with_prefix() {
        assert_eq!(PeerId::new(3).to_string(), "peer#3");
        assert_eq!(BodyId::new(0).to_string(), "body#0");
        assert_eq!(GroupId::new(7).to_string(), "group#7");
        assert_eq!(ProxyId::new(1).to_string(), "proxy#1");
    }

    #[test]
    fn allocator_never_repeats() {
        let mut alloc = HandleAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn role_opposite() {
        assert_eq!(PeerRole::Source.opposite(), PeerRole::Target);
        assert_eq!(PeerRole::Target.opposite(), PeerRole::Source);
    }

    #[test]
    fn link_state_serde_names() {
        let text = toml::to_string(&Wrapper {
            state: LinkState::NodeBlocked,
        })
        .unwrap();
        assert!(text.contains("node_blocked"));
    }

    #[derive(Serialize)]
    struct Wrapper {
        state: LinkState,
    }

    #[test]
    fn pose_inverse_round_trip() {
        let pose = Pose::new(
            Vec3::new(1.0, -2.0, 3.0),
            Quat::from_rotation_z(0.7) * Quat::from_rotation_x(-0.3),
        );
        let identity = pose.mul_pose(&pose.inverse());
        assert!(identity.abs_diff_eq(&Pose::IDENTITY, 1e-5));
    }

    #[test]
    fn pose_relative_then_compose_restores_world() {
        let owner = Pose::new(Vec3::new(5.0, 0.0, 0.0), Quat::from_rotation_y(1.2));
        let world = Pose::new(Vec3::new(6.0, 1.0, -1.0), Quat::from_rotation_x(0.4));
        let local = owner.relative(&world);
        let back = owner.mul_pose(&local);
        assert!(back.abs_diff_eq(&world, 1e-5));
    }

    #[test]
    fn attach_point_normal_is_normalized() {
        let point = AttachPoint::new("top", Vec3::ZERO, Vec3::new(0.0, 0.0, 5.0));
        assert!((point.local_normal().length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn defaults() {
        assert_eq!(LinkActor::default(), LinkActor::Api);
        assert_eq!(CoupleMode::default(), CoupleMode::NeverCoupled);
        assert_eq!(LinkingMode::default(), LinkingMode::Api);
    }
}
