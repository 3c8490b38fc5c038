use bevy::prelude::*;

/// Free-form tag attached to a scene node. Nodes without one report
/// [`UNTAGGED`].
#[derive(Component, Reflect, Clone, Debug, PartialEq, Eq)]
#[reflect(Component)]
pub struct NodeTag(pub String);

pub const UNTAGGED: &str = "Untagged";

/// Render/physics layer index of a node (0 when absent).
#[derive(Component, Reflect, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[reflect(Component)]
pub struct NodeLayer(pub u32);

/// Whether the node participates in the simulation. Absent means active.
#[derive(Component, Reflect, Clone, Copy, Debug, PartialEq, Eq)]
#[reflect(Component)]
pub struct NodeActive(pub bool);

impl Default for NodeActive {
    fn default() -> Self {
        Self(true)
    }
}

/// Marks the player node
#[derive(Component, Reflect, Clone, Copy, Default, Debug)]
#[reflect(Component)]
pub struct Player;

#[derive(Component, Reflect, Clone, Copy, Debug)]
#[reflect(Component)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn full(max: f32) -> Self {
        Self { current: max, max }
    }
}

/// Velocity in world units per second
#[derive(Component, Reflect, Clone, Copy, Default, Debug)]
#[reflect(Component)]
pub struct Velocity(pub Vec3);

/// Item stacks carried by a node. Exposed to queries as an indexable list.
#[derive(Component, Reflect, Clone, Default, Debug)]
#[reflect(Component)]
pub struct Inventory {
    pub items: Vec<ItemStack>,
    pub capacity: u32,
}

#[derive(Reflect, Clone, Debug, PartialEq)]
pub struct ItemStack {
    pub name: String,
    pub count: u32,
}

/// Periodically spawns children under its own node.
#[derive(Component, Reflect, Clone, Debug)]
#[reflect(Component)]
pub struct Spawner {
    pub prefab: String,
    pub interval_secs: f32,
    pub elapsed: f32,
    pub spawned: u32,
    pub max_alive: u32,
}

/// Running counter for a named resource (wood, gold, ...).
#[derive(Component, Reflect, Clone, Debug)]
#[reflect(Component)]
pub struct ResourceCounter {
    pub resource: String,
    pub amount: i64,
}

/// Points at another node. Queries render it as an identity stub rather
/// than following it.
#[derive(Component, Reflect, Clone, Copy, Debug)]
#[reflect(Component)]
pub struct FollowTarget {
    pub target: Entity,
    pub distance: f32,
}

/// Display colour of a node.
#[derive(Component, Reflect, Clone, Copy, Debug)]
#[reflect(Component)]
pub struct Tint(pub Color);

/// Registers every scene component with the reflection registry so the
/// query engine can walk their fields.
pub fn register_scene_types(app: &mut App) {
    app.register_type::<Name>()
        .register_type::<Transform>()
        .register_type::<NodeTag>()
        .register_type::<NodeLayer>()
        .register_type::<NodeActive>()
        .register_type::<Player>()
        .register_type::<Health>()
        .register_type::<Velocity>()
        .register_type::<Inventory>()
        .register_type::<ItemStack>()
        .register_type::<Vec<ItemStack>>()
        .register_type::<Spawner>()
        .register_type::<ResourceCounter>()
        .register_type::<FollowTarget>()
        .register_type::<Tint>();
}
