//! Bevy integration: runs the link session once per fixed step.

use bevy::prelude::*;

use linkage_core::config::LinkageConfig;
use linkage_core::events::BusEvent;
use linkage_core::time::SimClock;
use linkage_core::{LinkageCorePlugin, LinkageSet};

use crate::session::LinkSession;
use crate::status::StatusMessage;

/// Inserts a [`LinkSession`] built from the app's [`LinkageConfig`] and
/// steps it in [`LinkageSet::Simulate`]. Bus events and status messages are
/// moved into [`LinkReport`] in [`LinkageSet::PostStep`].
///
/// An existing session resource is kept, so tests and tools can insert a
/// session with custom collaborators before adding the plugin.
pub struct LinkagePlugin;

impl Plugin for LinkagePlugin {
    fn build(&self, app: &mut App) {
        if !app.is_plugin_added::<LinkageCorePlugin>() {
            app.add_plugins(LinkageCorePlugin);
        }
        if !app.world().contains_resource::<LinkSession>() {
            let config = app.world().resource::<LinkageConfig>().clone();
            if let Err(err) = config.validate() {
                error!("Invalid linkage config: {err}");
            }
            app.insert_resource(LinkSession::new(config));
        }
        app.init_resource::<LinkReport>();
        app.add_systems(FixedUpdate, link_step_system.in_set(LinkageSet::Simulate));
        app.add_systems(
            FixedUpdate,
            (sync_clock_system, collect_report_system).in_set(LinkageSet::PostStep),
        );
    }
}

/// Bus events and status messages produced by the latest fixed step.
///
/// Replaced every step. Systems reading it run after
/// [`collect_report_system`].
#[derive(Resource, Debug, Clone, Default)]
pub struct LinkReport {
    pub events: Vec<BusEvent>,
    pub status: Vec<StatusMessage>,
}

/// Advance the session by one step.
pub fn link_step_system(mut session: ResMut<LinkSession>) {
    session.step();
}

/// Mirror the session clock into the shared [`SimClock`] resource.
pub fn sync_clock_system(session: Res<LinkSession>, mut clock: ResMut<SimClock>) {
    *clock = session.clock();
}

/// Drain the session's journal and status log into [`LinkReport`].
pub fn collect_report_system(mut session: ResMut<LinkSession>, mut report: ResMut<LinkReport>) {
    report.events = session.drain_events();
    report.status = session.drain_status();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
