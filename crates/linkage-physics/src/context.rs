//! Owned rapier3d pipeline state.

use std::collections::HashMap;

use bevy::prelude::{Quat, Vec3};
use rapier3d::prelude::{
    CCDSolver, ColliderSet, DefaultBroadPhase, GenericJoint, ImpulseJointHandle, ImpulseJointSet,
    IntegrationParameters, IslandManager, MultibodyJointSet, NarrowPhase, PhysicsPipeline,
    RigidBody, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, RigidBodyType,
};

use linkage_core::config::LinkageConfig;
use linkage_core::types::Pose;

// ---------------------------------------------------------------------------
// BodyKind
// ---------------------------------------------------------------------------

/// Simulation mode of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Dynamic,
    Fixed,
    /// Moved by setting its pose; not affected by forces.
    Kinematic,
}

impl BodyKind {
    const fn body_type(self) -> RigidBodyType {
        match self {
            Self::Dynamic => RigidBodyType::Dynamic,
            Self::Fixed => RigidBodyType::Fixed,
            Self::Kinematic => RigidBodyType::KinematicPositionBased,
        }
    }
}

// ---------------------------------------------------------------------------
// RapierContext
// ---------------------------------------------------------------------------

/// All rapier state of one link session.
///
/// `PhysicsPipeline::step()` requires mutable access to every set
/// simultaneously, so they must all live together.
pub struct RapierContext {
    // -- Rapier sets --
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,

    // -- Pipeline objects --
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub ccd_solver: CCDSolver,

    // -- Parameters --
    pub integration_parameters: IntegrationParameters,
    pub gravity: Vec3,

    /// Mass assigned at creation, per body.
    masses: HashMap<RigidBodyHandle, f32>,
}

impl RapierContext {
    /// Create a new context with given gravity and timestep.
    pub fn new(gravity: Vec3, dt: f32) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = dt;

        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            ccd_solver: CCDSolver::new(),
            integration_parameters,
            gravity,
            masses: HashMap::new(),
        }
    }

    pub fn from_config(config: &LinkageConfig) -> Self {
        Self::new(config.gravity_vec(), config.dt())
    }

    pub fn dt(&self) -> f32 {
        self.integration_parameters.dt
    }

    // -- Bodies --

    /// Insert a body at `pose`. `mass` is only used by dynamic bodies.
    pub fn add_body(&mut self, kind: BodyKind, pose: Pose, mass: f32) -> RigidBodyHandle {
        let builder = match kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic().additional_mass(mass),
            BodyKind::Fixed => RigidBodyBuilder::fixed(),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
        };
        let mut body = builder.translation(pose.translation).can_sleep(false).build();
        body.set_rotation(pose.rotation, false);
        self.insert_body(body, mass)
    }

    /// Insert a prebuilt body and remember its mass.
    pub fn insert_body(&mut self, body: RigidBody, mass: f32) -> RigidBodyHandle {
        let handle = self.rigid_body_set.insert(body);
        self.masses.insert(handle, mass);
        handle
    }

    /// Remove a body together with every joint attached to it.
    ///
    /// Returns `false` when the body was already gone.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.masses.remove(&handle);
        self.rigid_body_set
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            )
            .is_some()
    }

    pub fn contains_body(&self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set.get(handle).is_some()
    }

    pub fn body_pose(&self, handle: RigidBodyHandle) -> Option<Pose> {
        self.rigid_body_set.get(handle).map(read_pose)
    }

    /// Linear and angular velocity of a body.
    pub fn body_velocity(&self, handle: RigidBodyHandle) -> Option<(Vec3, Vec3)> {
        self.rigid_body_set.get(handle).map(|body| {
            let v = body.linvel();
            let w = body.angvel();
            (Vec3::new(v.x, v.y, v.z), Vec3::new(w.x, w.y, w.z))
        })
    }

    /// Velocity of the material point of `handle` located at `world_point`.
    pub fn point_velocity(&self, handle: RigidBodyHandle, world_point: Vec3) -> Option<Vec3> {
        let pose = self.body_pose(handle)?;
        let (linvel, angvel) = self.body_velocity(handle)?;
        Some(linvel + angvel.cross(world_point - pose.translation))
    }

    pub fn set_body_pose(&mut self, handle: RigidBodyHandle, pose: Pose) -> bool {
        let Some(body) = self.rigid_body_set.get_mut(handle) else {
            return false;
        };
        body.set_translation(pose.translation, true);
        body.set_rotation(pose.rotation, true);
        true
    }

    pub fn set_body_velocity(&mut self, handle: RigidBodyHandle, linvel: Vec3, angvel: Vec3) -> bool {
        let Some(body) = self.rigid_body_set.get_mut(handle) else {
            return false;
        };
        body.set_linvel(linvel, true);
        body.set_angvel(angvel, true);
        true
    }

    pub fn set_body_kind(&mut self, handle: RigidBodyHandle, kind: BodyKind) -> bool {
        let Some(body) = self.rigid_body_set.get_mut(handle) else {
            return false;
        };
        body.set_body_type(kind.body_type(), true);
        true
    }

    pub fn is_dynamic(&self, handle: RigidBodyHandle) -> bool {
        self.rigid_body_set
            .get(handle)
            .is_some_and(RigidBody::is_dynamic)
    }

    /// Mass assigned when the body was inserted.
    pub fn body_mass(&self, handle: RigidBodyHandle) -> Option<f32> {
        self.masses.get(&handle).copied()
    }

    /// Replace the accumulated user force of a body.
    pub fn set_body_force(&mut self, handle: RigidBodyHandle, force: Vec3) -> bool {
        let Some(body) = self.rigid_body_set.get_mut(handle) else {
            return false;
        };
        body.reset_forces(true);
        body.add_force(force, true);
        true
    }

    // -- Joints --

    pub fn insert_joint(
        &mut self,
        body1: RigidBodyHandle,
        body2: RigidBodyHandle,
        joint: impl Into<GenericJoint>,
    ) -> ImpulseJointHandle {
        self.impulse_joint_set.insert(body1, body2, joint, true)
    }

    /// Remove a joint. Missing joints are ignored.
    pub fn remove_joint(&mut self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joint_set.remove(handle, true).is_some()
    }

    pub fn contains_joint(&self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joint_set.get(handle).is_some()
    }

    /// Run one physics step.
    pub fn step(&mut self) {
        self.physics_pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }
}

impl Default for RapierContext {
    fn default() -> Self {
        Self::from_config(&LinkageConfig::default())
    }
}

fn read_pose(body: &RigidBody) -> Pose {
    let t = body.translation();
    let r = body.rotation();
    Pose::new(
        Vec3::new(t.x, t.y, t.z),
        Quat::from_xyzw(r.x, r.y, r.z, r.w),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_read_pose() {
        let mut ctx = RapierContext::new(Vec3::ZERO, 0.02);
        let pose = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_z(0.5));
        let handle = ctx.add_body(BodyKind::Dynamic, pose, 2.0);
        let read = ctx.body_pose(handle).unwrap();
        assert!(read.abs_diff_eq(&pose, 1e-5));
        assert_eq!(ctx.body_mass(handle), Some(2.0));
        assert!(ctx.is_dynamic(handle));
    }

    #[test]
    fn remove_body_is_idempotent() {
        let mut ctx = RapierContext::default();
        let handle = ctx.add_body(BodyKind::Fixed, Pose::IDENTITY, 1.0);
        assert!(ctx.remove_body(handle));
        assert!(!ctx.remove_body(handle));
        assert!(ctx.body_pose(handle).is_none());
        assert!(ctx.body_mass(handle).is_none());
    }

    #[test]
    fn gravity_moves_dynamic_body() {
        let mut ctx = RapierContext::new(Vec3::new(0.0, 0.0, -9.81), 0.02);
        let handle = ctx.add_body(BodyKind::Dynamic, Pose::IDENTITY, 1.0);
        for _ in 0..10 {
            ctx.step();
        }
        let pose = ctx.body_pose(handle).unwrap();
        assert!(pose.translation.z < -0.1, "z = {}", pose.translation.z);
    }

    #[test]
    fn fixed_body_does_not_fall() {
        let mut ctx = RapierContext::new(Vec3::new(0.0, 0.0, -9.81), 0.02);
        let handle = ctx.add_body(BodyKind::Fixed, Pose::IDENTITY, 1.0);
        ctx.step();
        let pose = ctx.body_pose(handle).unwrap();
        assert!(pose.translation.z.abs() < 1e-6);
        assert!(!ctx.is_dynamic(handle));
    }

    #[test]
    fn point_velocity_includes_rotation() {
        let mut ctx = RapierContext::new(Vec3::ZERO, 0.02);
        let handle = ctx.add_body(BodyKind::Dynamic, Pose::IDENTITY, 1.0);
        ctx.set_body_velocity(handle, Vec3::X, Vec3::Z);
        let v = ctx.point_velocity(handle, Vec3::X).unwrap();
        assert!((v - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn remove_body_drops_attached_joints() {
        use rapier3d::prelude::FixedJointBuilder;

        let mut ctx = RapierContext::default();
        let a = ctx.add_body(BodyKind::Fixed, Pose::IDENTITY, 1.0);
        let b = ctx.add_body(BodyKind::Dynamic, Pose::IDENTITY, 1.0);
        let joint = ctx.insert_joint(a, b, FixedJointBuilder::new().build());
        assert!(ctx.contains_joint(joint));
        ctx.remove_body(b);
        assert!(!ctx.contains_joint(joint));
        assert!(!ctx.remove_joint(joint));
    }
}
