//! Bevy test app builders.

use bevy::prelude::*;
use linkage_link::{LinkSession, LinkagePlugin};

/// Create a test app running the link plugin with a default session.
pub fn test_app() -> App {
    let mut app = App::new();
    app.add_plugins(LinkagePlugin);
    app.finish();
    app.cleanup();
    app
}

/// Create a test app around a prepared session.
pub fn test_app_with(session: LinkSession) -> App {
    let mut app = App::new();
    app.insert_resource(session);
    app.add_plugins(LinkagePlugin);
    app.finish();
    app.cleanup();
    app
}

/// Run `n` fixed steps.
pub fn run_fixed_steps(app: &mut App, n: usize) {
    for _ in 0..n {
        app.world_mut().run_schedule(FixedUpdate);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use linkage_core::time::SimClock;

    use super::*;

    #[test]
    fn test_app_builds() {
        let app = test_app();
        assert!(app.world().get_resource::<LinkSession>().is_some());
    }

    #[test]
    fn test_app_steps() {
        let mut app = test_app_with(LinkSession::default());
        run_fixed_steps(&mut app, 2);
        assert_eq!(app.world().resource::<SimClock>().steps(), 2);
    }
}
