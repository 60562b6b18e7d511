//! Shared test fixtures and utilities for Linkage crates.
//!
//! Provides recording collaborators, a ready-made tug and barge scene and
//! Bevy test app builders.

pub mod app;
pub mod mocks;
pub mod scene;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use app::{run_fixed_steps, test_app, test_app_with};
pub use mocks::{FailingMerge, ListenerLog, RecordingListener, RecordingRenderer, RendererLog};
pub use scene::{
    TOW_DISTANCE, TowScene, source_config, target_config, tow_scene, tow_scene_with,
    weightless_session,
};
