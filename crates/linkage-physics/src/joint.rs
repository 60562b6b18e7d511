//! Physical joint owned by a source peer.
//!
//! [`JointController`] creates, drops and re-tunes one rapier impulse joint.
//! Both joint kinds are built from a rope joint: a cable limits the anchor
//! distance to `[0, length]`, a strut pins it to `[length, length]`.
//!
//! rapier has no breakable joints, so after every physics step the session
//! calls [`JointController::check_strain`], which estimates the constraint
//! load from the residual anchor error and reports a break when the load
//! exceeds the joint's limits.

use bevy::log::debug;
use bevy::prelude::Vec3;
use rapier3d::prelude::{GenericJoint, ImpulseJointHandle, JointAxis, RigidBodyHandle, RopeJointBuilder};

use linkage_core::config::{JointConfig, JointKind};
use linkage_core::constraint::{LinkEnd, check_link};
use linkage_core::error::{LinkCheckError, PhysicsError};

use crate::context::RapierContext;

// ---------------------------------------------------------------------------
// Strength policy
// ---------------------------------------------------------------------------

/// Break limits of a joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointStrength {
    pub break_force: f32,
    pub break_torque: f32,
}

/// Resolve a configured break limit.
///
/// A positive `configured` value wins. Otherwise the weaker of the two body
/// strengths is used, then `default`.
pub fn resolve_break_limit(
    configured: f32,
    body_a: Option<f32>,
    body_b: Option<f32>,
    default: f32,
) -> f32 {
    if configured > 0.0 {
        return configured;
    }
    [body_a, body_b]
        .into_iter()
        .flatten()
        .filter(|s| *s > 0.0)
        .reduce(f32::min)
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// JointSpec / ActiveJoint
// ---------------------------------------------------------------------------

/// Both ends of a joint to create.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointEnds {
    pub source_body: RigidBodyHandle,
    /// Source anchor in source body coordinates.
    pub source_anchor: Vec3,
    pub target_body: RigidBodyHandle,
    /// Target anchor in target body coordinates.
    pub target_anchor: Vec3,
}

/// Geometry and limits of a materialized joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSpec {
    pub kind: JointKind,
    pub ends: JointEnds,
    /// Anchor distance the joint maintains (strut) or allows (cable).
    pub length: f32,
    pub strength: JointStrength,
}

/// A live joint and its rapier handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveJoint {
    pub handle: ImpulseJointHandle,
    pub spec: JointSpec,
}

/// Estimated constraint load after a physics step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointStrain {
    pub force: f32,
    pub torque: f32,
}

impl JointStrain {
    pub fn exceeds(&self, strength: &JointStrength) -> bool {
        self.force > strength.break_force || self.torque > strength.break_torque
    }
}

fn build_joint(kind: JointKind, ends: &JointEnds, length: f32) -> GenericJoint {
    let mut joint: GenericJoint = RopeJointBuilder::new(length)
        .local_anchor1(ends.source_anchor)
        .local_anchor2(ends.target_anchor)
        .build()
        .into();
    let min = match kind {
        JointKind::Strut => length,
        JointKind::Cable => 0.0,
    };
    joint.set_limits(JointAxis::LinX, [min, length]);
    joint
}

// ---------------------------------------------------------------------------
// JointController
// ---------------------------------------------------------------------------

/// Owns the physical joint of one source peer.
#[derive(Debug, Clone)]
pub struct JointController {
    config: JointConfig,
    unbreakable: bool,
    couple_on_link: bool,
    active: Option<ActiveJoint>,
}

impl JointController {
    pub const fn new(config: JointConfig) -> Self {
        Self {
            config,
            unbreakable: false,
            couple_on_link: false,
            active: None,
        }
    }

    pub const fn config(&self) -> &JointConfig {
        &self.config
    }

    /// Validate a candidate link against this joint's limits.
    pub fn check_constraints(&self, source: LinkEnd, target: LinkEnd) -> Vec<LinkCheckError> {
        check_link(source, target, &self.config.limits())
    }

    /// Create the joint, replacing any existing one.
    ///
    /// Strut and cable length default to the current anchor distance. A
    /// cable length may be given to start with a longer deployed cable.
    pub fn create_joint(
        &mut self,
        ctx: &mut RapierContext,
        ends: JointEnds,
        strength: JointStrength,
        cable_length: Option<f32>,
    ) -> Result<JointSpec, PhysicsError> {
        self.drop_joint(ctx);

        let source_pose = ctx
            .body_pose(ends.source_body)
            .ok_or_else(|| PhysicsError::MissingBody("joint source".into()))?;
        let target_pose = ctx
            .body_pose(ends.target_body)
            .ok_or_else(|| PhysicsError::MissingBody("joint target".into()))?;
        let distance = source_pose
            .transform_point(ends.source_anchor)
            .distance(target_pose.transform_point(ends.target_anchor));
        let length = match (self.config.kind, cable_length) {
            (JointKind::Cable, Some(cable)) => cable.max(distance),
            _ => distance,
        };

        let joint = build_joint(self.config.kind, &ends, length);
        let handle = ctx.insert_joint(ends.source_body, ends.target_body, joint);
        let spec = JointSpec {
            kind: self.config.kind,
            ends,
            length,
            strength,
        };
        debug!(
            "Joint created: kind={:?} length={:.3} break_force={:.1} break_torque={:.1}",
            spec.kind, spec.length, strength.break_force, strength.break_torque
        );
        self.active = Some(ActiveJoint { handle, spec });
        Ok(spec)
    }

    /// Remove the joint if one exists. Always safe.
    pub fn drop_joint(&mut self, ctx: &mut RapierContext) {
        if let Some(active) = self.active.take() {
            // The joint is already gone when one of its bodies was removed.
            ctx.remove_joint(active.handle);
            debug!("Joint dropped");
        }
    }

    /// Toggle whether the joint can be broken by load.
    pub fn adjust_joint(&mut self, unbreakable: bool) {
        self.unbreakable = unbreakable;
    }

    pub const fn is_unbreakable(&self) -> bool {
        self.unbreakable
    }

    pub const fn couple_on_link(&self) -> bool {
        self.couple_on_link
    }

    pub fn set_couple_on_link(&mut self, couple: bool) {
        self.couple_on_link = couple;
    }

    pub const fn active(&self) -> Option<&ActiveJoint> {
        self.active.as_ref()
    }

    pub fn spec(&self) -> Option<JointSpec> {
        self.active.map(|a| a.spec)
    }

    pub const fn has_joint(&self) -> bool {
        self.active.is_some()
    }

    /// Whether the recorded joint still exists in the physics world.
    pub fn is_live(&self, ctx: &RapierContext) -> bool {
        self.active.is_some_and(|a| ctx.contains_joint(a.handle))
    }

    /// Change the maintained length of the live joint.
    ///
    /// Returns `false` when no joint exists.
    pub fn set_length(&mut self, ctx: &mut RapierContext, length: f32) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let length = length.max(0.0);
        let Some(joint) = ctx.impulse_joint_set.get_mut(active.handle, true) else {
            return false;
        };
        let min = match active.spec.kind {
            JointKind::Strut => length,
            JointKind::Cable => 0.0,
        };
        joint.data.set_limits(JointAxis::LinX, [min, length]);
        active.spec.length = length;
        true
    }

    /// Estimate the load on the live joint after a physics step.
    ///
    /// Uses the residual anchor error and the effective mass of the pair:
    /// `force = error * m_eff / dt^2`. Non-dynamic bodies count as infinitely
    /// heavy. Returns `None` without a live joint or without a dynamic body.
    pub fn strain(&self, ctx: &RapierContext) -> Option<JointStrain> {
        let active = self.active?;
        let ends = active.spec.ends;
        let source_pose = ctx.body_pose(ends.source_body)?;
        let target_pose = ctx.body_pose(ends.target_body)?;

        let mass = |handle| {
            ctx.is_dynamic(handle)
                .then(|| ctx.body_mass(handle))
                .flatten()
                .filter(|m| *m > 0.0)
        };
        let effective_mass = match (mass(ends.source_body), mass(ends.target_body)) {
            (Some(a), Some(b)) => a * b / (a + b),
            (Some(m), None) | (None, Some(m)) => m,
            (None, None) => return None,
        };

        let source_anchor = source_pose.transform_point(ends.source_anchor);
        let target_anchor = target_pose.transform_point(ends.target_anchor);
        let link = target_anchor - source_anchor;
        let distance = link.length();
        let error = match active.spec.kind {
            JointKind::Strut => (distance - active.spec.length).abs(),
            JointKind::Cable => (distance - active.spec.length).max(0.0),
        };

        let dt = ctx.dt().max(f32::EPSILON);
        let force = error * effective_mass / (dt * dt);
        let lever = source_anchor - source_pose.translation;
        let torque = lever.cross(link.normalize_or_zero()).length() * force;
        Some(JointStrain { force, torque })
    }

    /// Strain of a breakable joint whose load exceeds its limits.
    pub fn check_strain(&self, ctx: &RapierContext) -> Option<JointStrain> {
        if self.unbreakable {
            return None;
        }
        let active = self.active?;
        self.strain(ctx)
            .filter(|strain| strain.exceeds(&active.spec.strength))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BodyKind;
    use linkage_core::types::Pose;

    fn strength(value: f32) -> JointStrength {
        JointStrength {
            break_force: value,
            break_torque: value,
        }
    }

    fn scene(kind: JointKind) -> (RapierContext, JointController, JointEnds) {
        let mut ctx = RapierContext::new(Vec3::ZERO, 0.02);
        let source = ctx.add_body(BodyKind::Fixed, Pose::IDENTITY, 10.0);
        let target = ctx.add_body(
            BodyKind::Dynamic,
            Pose::from_translation(Vec3::new(0.0, 0.0, 3.0)),
            1.0,
        );
        let controller = JointController::new(JointConfig {
            kind,
            ..JointConfig::default()
        });
        let ends = JointEnds {
            source_body: source,
            source_anchor: Vec3::new(0.0, 0.0, 0.5),
            target_body: target,
            target_anchor: Vec3::new(0.0, 0.0, -0.5),
        };
        (ctx, controller, ends)
    }

    #[test]
    fn resolve_prefers_configured_value() {
        assert!((resolve_break_limit(50.0, Some(10.0), None, 100.0) - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn resolve_uses_weaker_body() {
        let value = resolve_break_limit(0.0, Some(30.0), Some(20.0), 100.0);
        assert!((value - 20.0).abs() < f32::EPSILON);
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let value = resolve_break_limit(0.0, None, Some(0.0), 100.0);
        assert!((value - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn create_joint_uses_anchor_distance() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Strut);
        let spec = controller
            .create_joint(&mut ctx, ends, strength(100.0), None)
            .unwrap();
        assert!((spec.length - 2.0).abs() < 1e-5);
        assert!(controller.is_live(&ctx));
    }

    #[test]
    fn create_joint_replaces_existing() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Strut);
        controller
            .create_joint(&mut ctx, ends, strength(100.0), None)
            .unwrap();
        let first = controller.active().unwrap().handle;
        controller
            .create_joint(&mut ctx, ends, strength(100.0), None)
            .unwrap();
        assert!(!ctx.contains_joint(first));
        assert!(controller.is_live(&ctx));
    }

    #[test]
    fn create_joint_missing_body_fails() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Strut);
        ctx.remove_body(ends.target_body);
        let err = controller
            .create_joint(&mut ctx, ends, strength(100.0), None)
            .unwrap_err();
        assert!(matches!(err, PhysicsError::MissingBody(_)));
        assert!(!controller.has_joint());
    }

    #[test]
    fn cable_starts_at_deployed_length() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Cable);
        let spec = controller
            .create_joint(&mut ctx, ends, strength(100.0), Some(5.0))
            .unwrap();
        assert!((spec.length - 5.0).abs() < 1e-5);
    }

    #[test]
    fn drop_joint_is_safe_in_any_state() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Strut);
        controller.drop_joint(&mut ctx);
        controller
            .create_joint(&mut ctx, ends, strength(100.0), None)
            .unwrap();
        ctx.remove_body(ends.target_body);
        assert!(!controller.is_live(&ctx));
        controller.drop_joint(&mut ctx);
        controller.drop_joint(&mut ctx);
        assert!(!controller.has_joint());
    }

    #[test]
    fn adjust_joint_keeps_topology() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Strut);
        let spec = controller
            .create_joint(&mut ctx, ends, strength(100.0), None)
            .unwrap();
        controller.adjust_joint(true);
        assert!(controller.is_unbreakable());
        assert_eq!(controller.spec(), Some(spec));
        controller.adjust_joint(false);
        assert!(!controller.is_unbreakable());
    }

    #[test]
    fn relaxed_joint_has_no_strain() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Strut);
        controller
            .create_joint(&mut ctx, ends, strength(1.0), None)
            .unwrap();
        let strain = controller.strain(&ctx).unwrap();
        assert!(strain.force < 1e-3);
        assert!(controller.check_strain(&ctx).is_none());
    }

    #[test]
    fn stretched_joint_breaks_unless_unbreakable() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Cable);
        controller
            .create_joint(&mut ctx, ends, strength(10.0), None)
            .unwrap();
        ctx.set_body_pose(ends.target_body, Pose::from_translation(Vec3::new(0.0, 0.0, 4.0)));
        let strain = controller.check_strain(&ctx).unwrap();
        // 1 m error, 1 kg, dt = 0.02 s
        assert!((strain.force - 2500.0).abs() < 1.0);

        controller.adjust_joint(true);
        assert!(controller.check_strain(&ctx).is_none());
    }

    #[test]
    fn slack_cable_has_no_strain() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Cable);
        controller
            .create_joint(&mut ctx, ends, strength(1.0), None)
            .unwrap();
        ctx.set_body_pose(ends.target_body, Pose::from_translation(Vec3::new(0.0, 0.0, 1.5)));
        assert!(controller.check_strain(&ctx).is_none());
    }

    #[test]
    fn set_length_updates_spec() {
        let (mut ctx, mut controller, ends) = scene(JointKind::Cable);
        assert!(!controller.set_length(&mut ctx, 3.0));
        controller
            .create_joint(&mut ctx, ends, strength(100.0), None)
            .unwrap();
        assert!(controller.set_length(&mut ctx, 3.0));
        assert!((controller.spec().unwrap().length - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn check_constraints_uses_config_limits() {
        let controller = JointController::new(JointConfig {
            max_length: 1.0,
            ..JointConfig::default()
        });
        let errors = controller.check_constraints(
            LinkEnd {
                position: Vec3::ZERO,
                normal: Vec3::Z,
            },
            LinkEnd {
                position: Vec3::new(0.0, 0.0, 2.0),
                normal: -Vec3::Z,
            },
        );
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], LinkCheckError::TooLong { .. }));
    }

    #[test]
    fn couple_flag_round_trip() {
        let mut controller = JointController::new(JointConfig::default());
        assert!(!controller.couple_on_link());
        controller.set_couple_on_link(true);
        assert!(controller.couple_on_link());
    }
}
