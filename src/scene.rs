//! Small live scene so the bridge has something to look at.

use bevy::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng};

use crate::components::*;
use crate::config::BridgeConfig;

const DEMO_SEED: u64 = 0x5CE7_E11C;
const ENEMY_COUNT: usize = 4;
const CRATE_AREA: f32 = 8.0;

pub struct DemoScenePlugin;

impl Plugin for DemoScenePlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(SceneRng::new(DEMO_SEED))
            .add_systems(Startup, spawn_demo_scene)
            .add_systems(Update, (tick_spawners, apply_velocity, follow_targets));
    }
}

#[derive(Resource)]
pub struct SceneRng(SmallRng);

impl SceneRng {
    pub fn new(seed: u64) -> Self {
        Self(SmallRng::seed_from_u64(seed))
    }

    fn around(&mut self, extent: f32) -> Vec3 {
        Vec3::new(
            self.0.gen_range(-extent..extent),
            0.0,
            self.0.gen_range(-extent..extent),
        )
    }
}

fn node(name: impl Into<String>, tag: &str, at: Vec3) -> (Name, NodeTag, Transform) {
    (Name::new(name.into()), NodeTag(tag.to_string()), Transform::from_translation(at))
}

pub fn spawn_demo_scene(mut commands: Commands, config: Option<Res<BridgeConfig>>) {
    if !config.map_or(true, |c| c.demo_scene) {
        return;
    }

    let root = commands.spawn(node("World", UNTAGGED, Vec3::ZERO)).id();

    let player = commands
        .spawn((
            node("Player", "Player", Vec3::new(0.0, 0.0, -4.0)),
            Player,
            Health::full(100.0),
            Velocity(Vec3::new(0.5, 0.0, 0.0)),
            Inventory {
                items: vec![
                    ItemStack {
                        name: "Sword".into(),
                        count: 1,
                    },
                    ItemStack {
                        name: "Potion".into(),
                        count: 3,
                    },
                ],
                capacity: 12,
            },
            Tint(Color::srgb(0.2, 0.6, 1.0)),
        ))
        .set_parent(root)
        .id();

    let enemies = commands
        .spawn(node("Enemies", UNTAGGED, Vec3::ZERO))
        .set_parent(root)
        .id();
    for i in 0..ENEMY_COUNT {
        let angle = i as f32 / ENEMY_COUNT as f32 * std::f32::consts::TAU;
        commands
            .spawn((
                node(format!("Enemy_{i}"), "Enemy", Vec3::new(angle.cos() * 6.0, 0.0, angle.sin() * 6.0)),
                Health::full(40.0 + 10.0 * i as f32),
                NodeLayer(2),
                FollowTarget {
                    target: player,
                    distance: 3.0,
                },
                Tint(Color::srgb(0.9, 0.2, 0.2)),
            ))
            .set_parent(enemies);
    }

    commands
        .spawn((
            node("Crates", UNTAGGED, Vec3::new(0.0, 0.0, 4.0)),
            Spawner {
                prefab: "Crate".into(),
                interval_secs: 2.0,
                elapsed: 0.0,
                spawned: 0,
                max_alive: 12,
            },
            ResourceCounter {
                resource: "crates".into(),
                amount: 0,
            },
        ))
        .set_parent(root);

    commands
        .spawn((node("Camera", "MainCamera", Vec3::new(0.0, 10.0, -10.0)), NodeActive(false)))
        .set_parent(root);

    info!("Demo scene spawned");
}

pub fn tick_spawners(
    mut commands: Commands,
    time: Res<Time>,
    mut rng: ResMut<SceneRng>,
    mut spawners: Query<(Entity, &mut Spawner, Option<&mut ResourceCounter>, Option<&Children>)>,
) {
    for (entity, mut spawner, counter, children) in &mut spawners {
        spawner.elapsed += time.delta_secs();
        if spawner.elapsed < spawner.interval_secs {
            continue;
        }
        spawner.elapsed = 0.0;
        let alive = children.map_or(0, |c| c.len()) as u32;
        if alive >= spawner.max_alive {
            continue;
        }
        let name = format!("{}_{}", spawner.prefab, spawner.spawned);
        spawner.spawned += 1;
        let at = rng.around(CRATE_AREA);
        commands
            .spawn((node(name, &spawner.prefab, at), Health::full(10.0)))
            .set_parent(entity);
        if let Some(mut counter) = counter {
            counter.amount += 1;
        }
    }
}

pub fn apply_velocity(time: Res<Time>, mut movers: Query<(&Velocity, &mut Transform, Option<&NodeActive>)>) {
    for (velocity, mut transform, active) in &mut movers {
        if active.map_or(true, |a| a.0) {
            transform.translation += velocity.0 * time.delta_secs();
        }
    }
}

/// Keeps followers `distance` away from their target, on the XZ plane.
pub fn follow_targets(
    time: Res<Time>,
    targets: Query<&GlobalTransform>,
    mut followers: Query<(&FollowTarget, &mut Transform, &GlobalTransform)>,
) {
    for (follow, mut transform, global) in &mut followers {
        let Ok(target) = targets.get(follow.target) else {
            continue;
        };
        let offset = (target.translation() - global.translation()) * Vec3::new(1.0, 0.0, 1.0);
        let gap = offset.length() - follow.distance;
        if gap > 0.01 {
            transform.translation += offset.normalize() * gap.min(2.0 * time.delta_secs());
        }
    }
}

/// Windowed mode only: a small cross per node in its tint.
pub fn draw_node_gizmos(mut gizmos: Gizmos, nodes: Query<(&GlobalTransform, Option<&Tint>, Option<&NodeActive>), With<Name>>) {
    for (transform, tint, active) in &nodes {
        if !active.map_or(true, |a| a.0) {
            continue;
        }
        let at = transform.translation();
        let color = tint.map_or(Color::WHITE, |t| t.0);
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            gizmos.line(at - axis * 0.3, at + axis * 0.3, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins).add_plugins(DemoScenePlugin);
        app
    }

    fn named(app: &mut App, name: &str) -> Option<Entity> {
        let world = app.world_mut();
        let mut query = world.query::<(Entity, &Name)>();
        query
            .iter(world)
            .find(|(_, n)| n.as_str() == name)
            .map(|(e, _)| e)
    }

    #[test]
    fn demo_scene_has_expected_layout() {
        let mut app = app();
        app.update();
        let enemies = named(&mut app, "Enemies").unwrap();
        assert_eq!(app.world().get::<Children>(enemies).unwrap().len(), ENEMY_COUNT);
        assert!(named(&mut app, "Player").is_some());
        let crates = named(&mut app, "Crates").unwrap();
        assert!(app.world().get::<Spawner>(crates).is_some());
    }

    #[test]
    fn spawner_respects_max_alive_and_counts() {
        let mut world = World::new();
        world.insert_resource(SceneRng::new(1));
        let mut time = Time::<()>::default();
        time.advance_by(Duration::from_secs(5));
        world.insert_resource(time);
        let crates = world
            .spawn((
                Name::new("Crates"),
                Spawner {
                    prefab: "Crate".into(),
                    interval_secs: 1.0,
                    elapsed: 0.0,
                    spawned: 0,
                    max_alive: 2,
                },
                ResourceCounter {
                    resource: "crates".into(),
                    amount: 0,
                },
            ))
            .id();

        let mut schedule = Schedule::default();
        schedule.add_systems(tick_spawners);
        for _ in 0..4 {
            schedule.run(&mut world);
        }
        assert_eq!(world.get::<Children>(crates).unwrap().len(), 2);
        assert_eq!(world.get::<ResourceCounter>(crates).unwrap().amount, 2);
        assert_eq!(world.get::<Spawner>(crates).unwrap().spawned, 2);
    }

    #[test]
    fn demo_scene_can_be_disabled() {
        let mut app = app();
        app.insert_resource(BridgeConfig {
            demo_scene: false,
            ..Default::default()
        });
        app.update();
        assert!(named(&mut app, "World").is_none());
    }
}
