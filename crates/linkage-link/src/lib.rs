// linkage-link: the link peer protocol. Bodies, peers and physics children
// live in one `LinkSession` arena that owns the event bus, the deferred task
// queue and the rapier world.

pub mod collaborators;
pub mod peer;
pub mod plugin;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod status;
pub mod tasks;

pub use plugin::{LinkReport, LinkagePlugin};
pub use session::LinkSession;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        LinkReport, LinkSession, LinkagePlugin,
        collaborators::{
            GroupMerge, LinkRenderer, LinkStateListener, NullRenderer, StructuralMerge,
        },
        peer::{CableExtension, LinkPeer, PersistedLink},
        registry::{BodyRecord, BodyRegistry, BodySpec, GroupTable},
        status::{StatusLog, StatusMessage},
        tasks::{DeferredTask, TaskOwner},
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
