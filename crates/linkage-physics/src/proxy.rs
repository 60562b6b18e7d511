//! Detachable physics child.
//!
//! A [`PhysicsBodyProxy`] is either parented to its owner body (no rigid body
//! of its own, pose stored relative to the owner) or simulated by its own
//! rigid body. Pack/unpack moves a detached child in two phases: the state
//! flips immediately and the pose/velocity resync runs on the next physics
//! step, once the owner's transform has settled.
//!
//! ```text
//! Parented --detach--> Detached --attach--> Parented
//! Detached --suspend--> Attaching --resync--> Detached (non-reactive)
//! Detached (non-reactive) --resume--> Detaching --resync--> Detached
//! ```

use bevy::log::{debug, warn};
use bevy::prelude::Vec3;
use rapier3d::prelude::RigidBodyHandle;

use linkage_core::error::PhysicsError;
use linkage_core::schedule::Due;
use linkage_core::types::{Pose, ProxyId};

use crate::ambient::AmbientPhysics;
use crate::context::{BodyKind, RapierContext};

/// Delay between a pack transition and its pose/velocity resync.
pub const RESYNC_DELAY: Due = Due::AfterSteps(1);

/// Attachment state of a physics child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Parented,
    /// Resuming: dynamics restored, velocity resync pending.
    Detaching,
    Detached,
    /// Suspending: kinematic, pose resync pending.
    Attaching,
}

impl ProxyState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Parented => "Parented",
            Self::Detaching => "Detaching",
            Self::Detached => "Detached",
            Self::Attaching => "Attaching",
        }
    }
}

/// A sub-object that can be simulated on its own.
#[derive(Debug, Clone)]
pub struct PhysicsBodyProxy {
    id: ProxyId,
    owner: RigidBodyHandle,
    state: ProxyState,
    /// False while the body only follows the owner (packed).
    reactive: bool,
    body: Option<RigidBodyHandle>,
    /// Pose relative to the owner. Valid while parented or packed.
    local_pose: Pose,
    mass: f32,
}

impl PhysicsBodyProxy {
    /// Create a parented child at `local_pose` relative to `owner`.
    pub const fn new(id: ProxyId, owner: RigidBodyHandle, local_pose: Pose, mass: f32) -> Self {
        Self {
            id,
            owner,
            state: ProxyState::Parented,
            reactive: false,
            body: None,
            local_pose,
            mass,
        }
    }

    pub const fn id(&self) -> ProxyId {
        self.id
    }

    pub const fn owner(&self) -> RigidBodyHandle {
        self.owner
    }

    pub const fn state(&self) -> ProxyState {
        self.state
    }

    pub const fn is_detached(&self) -> bool {
        !matches!(self.state, ProxyState::Parented)
    }

    pub const fn is_reactive(&self) -> bool {
        self.reactive
    }

    pub const fn body(&self) -> Option<RigidBodyHandle> {
        self.body
    }

    pub const fn local_pose(&self) -> Pose {
        self.local_pose
    }

    pub const fn mass(&self) -> f32 {
        self.mass
    }

    fn illegal(&self, operation: &'static str) -> PhysicsError {
        PhysicsError::ProxyTransition {
            proxy: self.id,
            operation,
            state: self.state.name(),
        }
    }

    fn owner_pose(&self, ctx: &RapierContext) -> Result<Pose, PhysicsError> {
        ctx.body_pose(self.owner)
            .ok_or_else(|| PhysicsError::MissingBody(format!("owner of {}", self.id)))
    }

    fn owned_body(&self) -> Result<RigidBodyHandle, PhysicsError> {
        self.body
            .ok_or_else(|| PhysicsError::MissingBody(self.id.to_string()))
    }

    /// World pose of the child.
    pub fn world_pose(&self, ctx: &RapierContext) -> Option<Pose> {
        match self.body {
            Some(body) => ctx.body_pose(body),
            None => ctx
                .body_pose(self.owner)
                .map(|owner| owner.mul_pose(&self.local_pose)),
        }
    }

    /// Owner velocity at the child's position.
    fn inherited_velocity(&self, ctx: &RapierContext, at: Vec3) -> (Vec3, Vec3) {
        let angvel = ctx.body_velocity(self.owner).map_or(Vec3::ZERO, |(_, w)| w);
        let linvel = ctx.point_velocity(self.owner, at).unwrap_or(Vec3::ZERO);
        (linvel, angvel)
    }

    /// Give the child its own dynamic body. Legal only while parented.
    pub fn detach(&mut self, ctx: &mut RapierContext) -> Result<(), PhysicsError> {
        if self.state != ProxyState::Parented {
            return Err(self.illegal("detach"));
        }
        let world = self.owner_pose(ctx)?.mul_pose(&self.local_pose);
        let handle = ctx.add_body(BodyKind::Dynamic, world, self.mass);
        if let Some(body) = ctx.rigid_body_set.get_mut(handle) {
            body.set_gravity_scale(0.0, true);
        }
        let (linvel, angvel) = self.inherited_velocity(ctx, world.translation);
        ctx.set_body_velocity(handle, linvel, angvel);

        self.body = Some(handle);
        self.reactive = true;
        self.state = ProxyState::Detached;
        debug!("{} detached", self.id);
        Ok(())
    }

    /// Destroy the child's body and parent it to the owner. Legal only while
    /// detached.
    pub fn attach(&mut self, ctx: &mut RapierContext) -> Result<(), PhysicsError> {
        if self.state != ProxyState::Detached {
            return Err(self.illegal("attach"));
        }
        let owner = self.owner_pose(ctx)?;
        let body = self.owned_body()?;
        if let Some(world) = ctx.body_pose(body) {
            self.local_pose = owner.relative(&world);
        }
        ctx.remove_body(body);

        self.body = None;
        self.reactive = false;
        self.state = ProxyState::Parented;
        debug!("{} attached", self.id);
        Ok(())
    }

    /// Freeze a detached child to its owner before packing.
    ///
    /// Returns when the resync must run. Parented children and children that
    /// are already packed need no work. A child still resuming is frozen
    /// where it is.
    pub fn suspend_for_pack(&mut self, ctx: &mut RapierContext) -> Result<Option<Due>, PhysicsError> {
        match self.state {
            ProxyState::Parented => return Ok(None),
            ProxyState::Detached | ProxyState::Detaching if self.reactive => {}
            ProxyState::Detached | ProxyState::Attaching if !self.reactive => return Ok(None),
            _ => return Err(self.illegal("suspend")),
        }
        let owner = self.owner_pose(ctx)?;
        let body = self.owned_body()?;
        let world = ctx
            .body_pose(body)
            .ok_or_else(|| PhysicsError::MissingBody(self.id.to_string()))?;
        self.local_pose = owner.relative(&world);
        ctx.set_body_kind(body, BodyKind::Kinematic);

        self.reactive = false;
        self.state = ProxyState::Attaching;
        debug!("{} suspended for pack", self.id);
        Ok(Some(RESYNC_DELAY))
    }

    /// Return a packed child to reactive dynamics after unpacking.
    ///
    /// Returns when the resync must run. Children that are already reactive
    /// or parented need no work.
    pub fn resume_from_pack(&mut self, ctx: &mut RapierContext) -> Result<Option<Due>, PhysicsError> {
        if self.reactive || self.state == ProxyState::Parented {
            return Ok(None);
        }
        let world = self.owner_pose(ctx)?.mul_pose(&self.local_pose);
        let body = self.owned_body()?;
        ctx.set_body_pose(body, world);
        ctx.set_body_kind(body, BodyKind::Dynamic);
        if let Some(rb) = ctx.rigid_body_set.get_mut(body) {
            rb.set_gravity_scale(0.0, true);
        }

        self.reactive = true;
        self.state = ProxyState::Detaching;
        debug!("{} resumed from pack", self.id);
        Ok(Some(RESYNC_DELAY))
    }

    /// Deferred half of a pack transition.
    ///
    /// Suspending: snap to the owner and copy its velocity. Resuming: copy the
    /// owner's current velocity. Anything else is a no-op.
    pub fn resync(&mut self, ctx: &mut RapierContext) {
        let Some(body) = self.body else {
            return;
        };
        match self.state {
            ProxyState::Attaching => {
                let Some(owner) = ctx.body_pose(self.owner) else {
                    warn!("{}: owner vanished before resync", self.id);
                    return;
                };
                let world = owner.mul_pose(&self.local_pose);
                ctx.set_body_pose(body, world);
                let (linvel, angvel) = self.inherited_velocity(ctx, world.translation);
                ctx.set_body_velocity(body, linvel, angvel);
                self.state = ProxyState::Detached;
            }
            ProxyState::Detaching => {
                let at = ctx
                    .body_pose(body)
                    .map_or(Vec3::ZERO, |pose| pose.translation);
                let (linvel, angvel) = self.inherited_velocity(ctx, at);
                ctx.set_body_velocity(body, linvel, angvel);
                self.state = ProxyState::Detached;
            }
            ProxyState::Parented | ProxyState::Detached => {}
        }
    }

    /// Per-step update.
    ///
    /// A reactive child gets `mass * gravity` applied manually; a packed child
    /// follows its owner rigidly. Both hold while a resync is still pending.
    pub fn step(&self, ctx: &mut RapierContext, ambient: &dyn AmbientPhysics) {
        let Some(body) = self.body else {
            return;
        };
        if self.state == ProxyState::Parented {
            return;
        }
        if self.reactive {
            if let Some(pose) = ctx.body_pose(body) {
                let force = ambient.gravity_at(pose.translation) * self.mass;
                ctx.set_body_force(body, force);
            }
        } else if let Some(owner) = ctx.body_pose(self.owner) {
            ctx.set_body_pose(body, owner.mul_pose(&self.local_pose));
        }
    }

    /// Release the child's body. Always safe; the proxy ends parented.
    pub fn release(&mut self, ctx: &mut RapierContext) {
        if let Some(body) = self.body.take() {
            ctx.remove_body(body);
            debug!("{} released", self.id);
        }
        self.reactive = false;
        self.state = ProxyState::Parented;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
