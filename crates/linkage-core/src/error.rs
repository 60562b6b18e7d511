use thiserror::Error;

use crate::types::{BodyId, CoupleMode, LinkState, PeerId, PeerRole, ProxyId};

/// Top-level error type for linkage.
#[derive(Debug, Error)]
pub enum LinkageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid physics_dt: {0} (must be > 0)")]
    InvalidPhysicsDt(f64),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// A single reason why two peers cannot be linked.
///
/// `Display` yields the user-facing message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkCheckError {
    #[error("Link is too long: {distance:.2} m > {max:.2} m")]
    TooLong { distance: f32, max: f32 },

    #[error("Link is too short: {distance:.2} m < {min:.2} m")]
    TooShort { distance: f32, min: f32 },

    #[error("Link angle at source is too steep: {angle:.0}\u{b0} > {limit:.0}\u{b0}")]
    SourceAngle { angle: f32, limit: f32 },

    #[error("Link angle at target is too steep: {angle:.0}\u{b0} > {limit:.0}\u{b0}")]
    TargetAngle { angle: f32, limit: f32 },

    #[error("{0}")]
    ColliderHit(String),

    #[error("Source is not available for a link")]
    SourceNotAvailable,

    #[error("Target doesn't accept links")]
    TargetNotAccepting,

    #[error("Incompatible target link type")]
    IncompatibleLinkType,

    #[error("Target cannot couple")]
    TargetCannotCouple,
}

/// Errors returned by link protocol operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Unknown body: {0}")]
    UnknownBody(BodyId),

    #[error("Body name already registered: {0}")]
    DuplicateBody(String),

    #[error("{body} already has a peer on attach point {attach_point}")]
    DuplicateAttachPoint { body: String, attach_point: String },

    #[error("Peer {peer} has role {actual}, expected {expected}")]
    WrongRole {
        peer: PeerId,
        expected: PeerRole,
        actual: PeerRole,
    },

    #[error("Illegal transition for {peer}: {from} => {to}")]
    IllegalTransition {
        peer: PeerId,
        from: LinkState,
        to: LinkState,
    },

    #[error("{peer} is not linked")]
    NotLinked { peer: PeerId },

    #[error("Cannot link: {}", join_reasons(.0))]
    Rejected(Vec<LinkCheckError>),

    #[error("Cannot restore link for: {body}")]
    CannotRestore { body: String },

    #[error("{peer} has no joint configured")]
    NoJoint { peer: PeerId },

    #[error("{peer} has no cable")]
    NoCable { peer: PeerId },

    #[error("Structural coupling is not allowed on {peer}")]
    CouplingNotAllowed { peer: PeerId },

    #[error("Couple mode of {peer} is fixed to {mode:?}")]
    CoupleModeFixed { peer: PeerId, mode: CoupleMode },
}

fn join_reasons(reasons: &[LinkCheckError]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Physics layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhysicsError {
    #[error("Rigid body is missing for {0}")]
    MissingBody(String),

    #[error("Unknown proxy: {0}")]
    UnknownProxy(ProxyId),

    #[error("Illegal transition for {proxy}: {operation} in state {state}")]
    ProxyTransition {
        proxy: ProxyId,
        operation: &'static str,
        state: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
