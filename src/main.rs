mod api;
mod components;
mod config;
mod error;
mod file_watcher;
mod query;
mod scene;
mod scripting;

use bevy::log::{BoxedLayer, LogPlugin};
use bevy::prelude::*;

use api::{LogBuffer, LogCaptureLayer};
use config::BridgeConfig;

/// Installed into Bevy's subscriber; feeds the response log buffer.
fn capture_layer(app: &mut App) -> Option<BoxedLayer> {
    let capacity = app
        .world()
        .get_resource::<BridgeConfig>()
        .map_or(config::DEFAULT_LOG_CAPACITY, |c| c.log_capacity);
    let (buffer, sender) = LogBuffer::new(capacity);
    app.insert_resource(buffer);
    Some(Box::new(LogCaptureLayer::new(sender)))
}

fn log_plugin() -> LogPlugin {
    LogPlugin {
        custom_layer: capture_layer,
        ..default()
    }
}

fn spawn_camera(mut commands: Commands) {
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 14.0, -14.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));
}

fn main() {
    let headless = std::env::args().any(|a| a == "--headless");
    let config = BridgeConfig::load();

    let mut app = App::new();
    app.insert_resource(config.clone());

    if headless {
        // No window or renderer: ECS, time, transforms and the bridge.
        app.add_plugins((
            MinimalPlugins,
            log_plugin(),
            bevy::transform::TransformPlugin,
            bevy::hierarchy::HierarchyPlugin,
        ));
        info!("Starting in HEADLESS mode");
    } else {
        let title = config
            .window_title
            .clone()
            .unwrap_or_else(|| "Scenelink".to_string());
        app.add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title,
                        resolution: (960.0, 540.0).into(),
                        present_mode: bevy::window::PresentMode::AutoVsync,
                        ..default()
                    }),
                    ..default()
                })
                .set(log_plugin()),
        )
        .add_systems(Startup, spawn_camera)
        .add_systems(Update, scene::draw_node_gizmos);
        info!("Starting in WINDOWED mode");
    }

    components::register_scene_types(&mut app);
    app.add_plugins(scene::DemoScenePlugin)
        .add_plugins(file_watcher::FileWatcherPlugin)
        .add_plugins(api::ApiPlugin);

    app.run();
}
