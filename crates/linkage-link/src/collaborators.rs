//! Narrow interfaces to systems outside the link core.

use bevy::prelude::Vec3;

use linkage_core::error::LinkCheckError;
use linkage_core::types::{BodyId, LinkEvent};

use crate::registry::GroupTable;

// ---------------------------------------------------------------------------
// LinkRenderer
// ---------------------------------------------------------------------------

/// Visual geometry of a link (strut mesh, cable line).
///
/// Started after a logical link, stopped before a logical unlink.
pub trait LinkRenderer: Send + Sync {
    fn start_renderer(&mut self, source: Vec3, target: Vec3);

    fn stop_renderer(&mut self);

    fn is_started(&self) -> bool;

    /// Obstacles between the two points, as legality errors.
    fn check_collider_hits(&self, source: Vec3, target: Vec3) -> Vec<LinkCheckError>;
}

/// Renderer that draws nothing and hits nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer {
    started: bool,
}

impl LinkRenderer for NullRenderer {
    fn start_renderer(&mut self, _source: Vec3, _target: Vec3) {
        self.started = true;
    }

    fn stop_renderer(&mut self) {
        self.started = false;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn check_collider_hits(&self, _source: Vec3, _target: Vec3) -> Vec<LinkCheckError> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// LinkStateListener
// ---------------------------------------------------------------------------

/// Same-body observer notified synchronously on logical link and unlink.
pub trait LinkStateListener: Send + Sync {
    fn on_link_state_changed(&mut self, event: &LinkEvent, linked: bool);
}

// ---------------------------------------------------------------------------
// StructuralMerge
// ---------------------------------------------------------------------------

/// Rigid coupling of two bodies into one structural group.
pub trait StructuralMerge: Send + Sync {
    /// Merge or split the groups of `source` and `target`.
    ///
    /// Returns `false` when the change could not be applied.
    fn set_coupled(
        &mut self,
        groups: &mut GroupTable,
        source: BodyId,
        target: BodyId,
        coupled: bool,
    ) -> bool;
}

/// Default merge: coupling moves the target's whole group into the source's
/// group; uncoupling moves the target's original members back out.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupMerge;

impl StructuralMerge for GroupMerge {
    fn set_coupled(
        &mut self,
        groups: &mut GroupTable,
        source: BodyId,
        target: BodyId,
        coupled: bool,
    ) -> bool {
        let (Some(source_group), Some(target_group)) = (groups.group_of(source), groups.group_of(target))
        else {
            return false;
        };
        if coupled {
            if source_group != target_group {
                groups.reassign(target_group, source_group);
            }
            return true;
        }
        let (Some(target_home), Some(source_home)) = (groups.home_of(target), groups.home_of(source))
        else {
            return false;
        };
        if target_home != source_home && target_group == source_group {
            groups.split_home(target_home, source_group);
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_renderer_tracks_started() {
        let mut renderer = NullRenderer::default();
        assert!(!renderer.is_started());
        renderer.start_renderer(Vec3::ZERO, Vec3::X);
        assert!(renderer.is_started());
        assert!(renderer.check_collider_hits(Vec3::ZERO, Vec3::X).is_empty());
        renderer.stop_renderer();
        assert!(!renderer.is_started());
    }

    #[test]
    fn group_merge_couples_and_splits() {
        let mut groups = GroupTable::default();
        let a = BodyId::new(0);
        let b = BodyId::new(1);
        let c = BodyId::new(2);
        let ga = groups.insert_new(a);
        let gb = groups.insert_new(b);
        groups.insert(c, gb);

        let mut merge = GroupMerge;
        assert!(merge.set_coupled(&mut groups, a, b, true));
        assert_eq!(groups.group_of(b), Some(ga));
        assert_eq!(groups.group_of(c), Some(ga));

        assert!(merge.set_coupled(&mut groups, a, b, false));
        assert_eq!(groups.group_of(a), Some(ga));
        assert_eq!(groups.group_of(b), Some(gb));
        assert_eq!(groups.group_of(c), Some(gb));
    }

    #[test]
    fn group_merge_unknown_body_fails() {
        let mut groups = GroupTable::default();
        let a = BodyId::new(0);
        groups.insert_new(a);
        assert!(!GroupMerge.set_coupled(&mut groups, a, BodyId::new(9), true));
    }
}
