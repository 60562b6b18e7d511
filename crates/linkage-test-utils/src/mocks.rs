//! Collaborator doubles that record what the session asks of them.
//!
//! Each double shares its log through an `Arc<Mutex<_>>`, so a test keeps a
//! handle after boxing the double into the session.

use std::sync::{Arc, Mutex, PoisonError};

use bevy::prelude::Vec3;
use linkage_core::error::LinkCheckError;
use linkage_core::types::{BodyId, LinkEvent};
use linkage_link::collaborators::{LinkRenderer, LinkStateListener, StructuralMerge};
use linkage_link::registry::GroupTable;

// ---------------------------------------------------------------------------
// RecordingRenderer
// ---------------------------------------------------------------------------

/// Calls observed by a [`RecordingRenderer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RendererLog {
    pub started: bool,
    pub starts: usize,
    pub stops: usize,
    /// Endpoints of the most recent start.
    pub last_endpoints: Option<(Vec3, Vec3)>,
}

/// Renderer that records start and stop calls and reports fixed obstacles.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    log: Arc<Mutex<RendererLog>>,
    hits: Vec<LinkCheckError>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renderer whose collider check always reports `hits`.
    pub fn with_hits(hits: Vec<LinkCheckError>) -> Self {
        Self {
            log: Arc::default(),
            hits,
        }
    }

    /// Shared handle to the call log.
    pub fn log(&self) -> Arc<Mutex<RendererLog>> {
        Arc::clone(&self.log)
    }

    fn update(&self, f: impl FnOnce(&mut RendererLog)) {
        f(&mut self.log.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl LinkRenderer for RecordingRenderer {
    fn start_renderer(&mut self, source: Vec3, target: Vec3) {
        self.update(|log| {
            log.started = true;
            log.starts += 1;
            log.last_endpoints = Some((source, target));
        });
    }

    fn stop_renderer(&mut self) {
        self.update(|log| {
            log.started = false;
            log.stops += 1;
        });
    }

    fn is_started(&self) -> bool {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started
    }

    fn check_collider_hits(&self, _source: Vec3, _target: Vec3) -> Vec<LinkCheckError> {
        self.hits.clone()
    }
}

// ---------------------------------------------------------------------------
// RecordingListener
// ---------------------------------------------------------------------------

/// Notifications observed by a [`RecordingListener`].
pub type ListenerLog = Arc<Mutex<Vec<(LinkEvent, bool)>>>;

/// Link state listener that records every notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    log: ListenerLog,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> ListenerLog {
        Arc::clone(&self.log)
    }
}

impl LinkStateListener for RecordingListener {
    fn on_link_state_changed(&mut self, event: &LinkEvent, linked: bool) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*event, linked));
    }
}

// ---------------------------------------------------------------------------
// FailingMerge
// ---------------------------------------------------------------------------

/// Structural merge that refuses every change.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingMerge;

impl StructuralMerge for FailingMerge {
    fn set_coupled(
        &mut self,
        _groups: &mut GroupTable,
        _source: BodyId,
        _target: BodyId,
        _coupled: bool,
    ) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
