// linkage-physics: rapier3d-backed joints and detachable physics children.
//
// We own the rapier `PhysicsPipeline` directly (not `bevy_rapier3d`) so the
// link session controls exactly when joints are created, stepped and checked
// for breakage.

pub mod ambient;
pub mod context;
pub mod joint;
pub mod proxy;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ambient::{AmbientPhysics, PointGravity, UniformGravity},
        context::{BodyKind, RapierContext},
        joint::{JointController, JointEnds, JointSpec, JointStrain, JointStrength},
        proxy::{PhysicsBodyProxy, ProxyState},
    };
}

pub use context::RapierContext;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
