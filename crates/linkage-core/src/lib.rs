// linkage-core: Types, state machine, constraint checks, event bus and
// deferred scheduling for the Linkage link system.

pub mod config;
pub mod constraint;
pub mod error;
pub mod events;
pub mod schedule;
pub mod state;
pub mod time;
pub mod types;

use bevy::prelude::*;

// ---------------------------------------------------------------------------
// LinkageSet
// ---------------------------------------------------------------------------

/// System ordering inside `FixedUpdate`.
///
/// `PreStep` feeds inputs (locks, node occupancy), `Simulate` runs the link
/// session step, `PostStep` reads the results (events, status messages).
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkageSet {
    PreStep,
    Simulate,
    PostStep,
}

// ---------------------------------------------------------------------------
// LinkageCorePlugin
// ---------------------------------------------------------------------------

/// Registers [`LinkageSet`] ordering and inserts the core resources.
///
/// An existing [`LinkageConfig`](config::LinkageConfig) resource is kept.
pub struct LinkageCorePlugin;

impl Plugin for LinkageCorePlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            FixedUpdate,
            (
                LinkageSet::PreStep,
                LinkageSet::Simulate,
                LinkageSet::PostStep,
            )
                .chain(),
        );
        app.init_resource::<config::LinkageConfig>();
        app.init_resource::<time::SimClock>();
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        LinkageCorePlugin, LinkageSet,
        config::{CableConfig, JointConfig, JointKind, LinkageConfig, PeerConfig},
        constraint::{LinkEnd, LinkLimits, check_length, check_link},
        error::{ConfigError, LinkCheckError, LinkError, LinkageError, PhysicsError},
        events::{BusEvent, EventBus, Topic},
        schedule::{DeferredQueue, Due},
        state::LinkStateMachine,
        time::SimClock,
        types::{
            AttachPoint, BodyId, CoupleMode, GroupId, LinkActor, LinkEvent, LinkState,
            LinkingMode, PeerId, PeerRole, Pose, ProxyId,
        },
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_inserts_resources() {
        let mut app = App::new();
        app.add_plugins(LinkageCorePlugin);
        assert!(app.world().get_resource::<config::LinkageConfig>().is_some());
        assert!(app.world().get_resource::<time::SimClock>().is_some());
    }

    #[test]
    fn plugin_keeps_existing_config() {
        let mut app = App::new();
        app.insert_resource(config::LinkageConfig {
            coupling_settle_steps: 9,
            ..config::LinkageConfig::default()
        });
        app.add_plugins(LinkageCorePlugin);
        let config = app.world().resource::<config::LinkageConfig>();
        assert_eq!(config.coupling_settle_steps, 9);
    }

    #[test]
    fn prelude_exports() {
        use prelude::*;
        let _ = LinkStateMachine::new(PeerRole::Source);
        let _ = EventBus::new();
        let _: DeferredQueue<PeerId, u8> = DeferredQueue::new();
        assert!(check_length(1.0, 0.0, 0.0).is_none());
    }
}
