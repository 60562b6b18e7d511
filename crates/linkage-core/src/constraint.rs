//! Geometric legality checks between two connection points.
//!
//! Pure functions with no side effects. A limit of `0` disables the check on
//! that side. Each check yields `Some(error)` or `None`; callers concatenate
//! the results without short-circuiting so the full set of failures can be
//! shown at once.

use bevy::math::Vec3;

use crate::error::LinkCheckError;

/// Check a link length against optional bounds.
pub fn check_length(distance: f32, min: f32, max: f32) -> Option<LinkCheckError> {
    if min > 0.0 && distance < min {
        return Some(LinkCheckError::TooShort { distance, min });
    }
    if max > 0.0 && distance > max {
        return Some(LinkCheckError::TooLong { distance, max });
    }
    None
}

/// Angle in degrees between an attach node normal and the vector toward the
/// other end of the link. Degenerate vectors yield `0`.
pub fn link_angle_deg(point_normal: Vec3, link_vector: Vec3) -> f32 {
    if point_normal.length_squared() <= f32::EPSILON || link_vector.length_squared() <= f32::EPSILON
    {
        return 0.0;
    }
    point_normal.angle_between(link_vector).to_degrees()
}

fn angle_exceeds(point_normal: Vec3, link_vector: Vec3, limit_deg: f32) -> Option<f32> {
    if limit_deg <= 0.0 {
        return None;
    }
    let angle = link_angle_deg(point_normal, link_vector);
    (angle > limit_deg).then_some(angle)
}

/// Check the angle at the source end of the link.
pub fn check_source_angle(
    point_normal: Vec3,
    link_vector: Vec3,
    limit_deg: f32,
) -> Option<LinkCheckError> {
    angle_exceeds(point_normal, link_vector, limit_deg).map(|angle| {
        LinkCheckError::SourceAngle {
            angle,
            limit: limit_deg,
        }
    })
}

/// Check the angle at the target end of the link.
pub fn check_target_angle(
    point_normal: Vec3,
    link_vector: Vec3,
    limit_deg: f32,
) -> Option<LinkCheckError> {
    angle_exceeds(point_normal, link_vector, limit_deg).map(|angle| {
        LinkCheckError::TargetAngle {
            angle,
            limit: limit_deg,
        }
    })
}

/// World-space description of one end of a candidate link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkEnd {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Length and angle limits of a link.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkLimits {
    pub min_length: f32,
    pub max_length: f32,
    pub source_angle_limit: f32,
    pub target_angle_limit: f32,
}

/// Run every geometric check for a candidate link.
///
/// Order: length, angle at source, angle at target.
pub fn check_link(source: LinkEnd, target: LinkEnd, limits: &LinkLimits) -> Vec<LinkCheckError> {
    let link = target.position - source.position;
    [
        check_length(link.length(), limits.min_length, limits.max_length),
        check_source_angle(source.normal, link, limits.source_angle_limit),
        check_target_angle(target.normal, -link, limits.target_angle_limit),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_within_limits() {
        assert_eq!(check_length(5.0, 0.0, 10.0), None);
    }

    #[test]
    fn length_exceeded() {
        assert_eq!(
            check_length(15.0, 0.0, 10.0),
            Some(LinkCheckError::TooLong {
                distance: 15.0,
                max: 10.0
            })
        );
    }

    #[test]
    fn length_too_short() {
        assert_eq!(
            check_length(1.0, 2.0, 10.0),
            Some(LinkCheckError::TooShort {
                distance: 1.0,
                min: 2.0
            })
        );
    }

    #[test]
    fn length_unconstrained_when_both_limits_zero() {
        assert_eq!(check_length(100.0, 0.0, 0.0), None);
    }

    #[test]
    fn angle_disabled_with_zero_limit() {
        assert_eq!(check_source_angle(Vec3::Z, -Vec3::Z, 0.0), None);
    }

    #[test]
    fn angle_within_limit() {
        let link = Vec3::new(0.0, 0.5, 1.0);
        assert_eq!(check_source_angle(Vec3::Z, link, 30.0), None);
    }

    #[test]
    fn angle_over_limit() {
        let err = check_target_angle(Vec3::Z, Vec3::X, 45.0);
        match err {
            Some(LinkCheckError::TargetAngle { angle, limit }) => {
                assert!((angle - 90.0).abs() < 1e-3);
                assert!((limit - 45.0).abs() < f32::EPSILON);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn degenerate_vectors_have_zero_angle() {
        assert!(link_angle_deg(Vec3::ZERO, Vec3::X).abs() < f32::EPSILON);
        assert!(link_angle_deg(Vec3::Z, Vec3::ZERO).abs() < f32::EPSILON);
    }

    #[test]
    fn check_link_reports_every_failure_in_order() {
        let source = LinkEnd {
            position: Vec3::ZERO,
            normal: Vec3::Z,
        };
        // Far away and sideways: too long and steep at both ends.
        let target = LinkEnd {
            position: Vec3::new(20.0, 0.0, 0.0),
            normal: Vec3::Z,
        };
        let limits = LinkLimits {
            min_length: 0.0,
            max_length: 10.0,
            source_angle_limit: 30.0,
            target_angle_limit: 30.0,
        };
        let errors = check_link(source, target, &limits);
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], LinkCheckError::TooLong { .. }));
        assert!(matches!(errors[1], LinkCheckError::SourceAngle { .. }));
        assert!(matches!(errors[2], LinkCheckError::TargetAngle { .. }));
    }

    #[test]
    fn check_link_facing_nodes_pass() {
        let source = LinkEnd {
            position: Vec3::ZERO,
            normal: Vec3::Z,
        };
        let target = LinkEnd {
            position: Vec3::new(0.0, 0.0, 4.0),
            normal: -Vec3::Z,
        };
        let limits = LinkLimits {
            min_length: 1.0,
            max_length: 10.0,
            source_angle_limit: 10.0,
            target_angle_limit: 10.0,
        };
        assert!(check_link(source, target, &limits).is_empty());
    }
}
