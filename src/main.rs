use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use portal_physics::plugins::{physics::PhysicsPlugin, portal::PortalPlugin, sandbox::SandboxPlugin};

fn main() {
    let mut app = App::new();
    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        window: WindowDescriptor {
            title: "Portal sandbox".to_string(),
            width: 1280.,
            height: 720.,
            ..default()
        },
        ..default()
    }));

    #[cfg(feature = "editor")]
    {
        app.add_plugins(portal_physics::plugins::debug::DeveloperPlugins);
    }

    // Portal stages hook onto Rapier's, so Rapier goes first.
    app.add_plugin(RapierPhysicsPlugin::<NoUserData>::default())
        .add_plugin(PhysicsPlugin)
        .add_plugin(PortalPlugin::default())
        .add_plugin(SandboxPlugin)
        .run();
}
