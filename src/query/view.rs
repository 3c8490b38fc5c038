use bevy::ecs::component::ComponentId;
use bevy::prelude::*;
use bevy::ecs::reflect::ReflectComponent;

use crate::components::{NodeActive, NodeLayer, NodeTag, UNTAGGED};

const MAX_PATH_DEPTH: usize = 256;

/// Read-only window over the scene graph held by a `World`.
///
/// Nodes are named entities; roots are named entities without a `Parent`,
/// ordered by entity index so repeated queries list them the same way.
pub struct SceneView<'w> {
    world: &'w World,
    roots: Vec<Entity>,
}

impl<'w> SceneView<'w> {
    pub fn new(world: &'w mut World) -> Self {
        let mut roots_query = world.query_filtered::<Entity, (With<Name>, Without<Parent>)>();
        let mut roots: Vec<Entity> = roots_query.iter(world).collect();
        roots.sort_by_key(|e| e.index());
        let world: &'w World = world;
        Self { world, roots }
    }

    pub fn world(&self) -> &'w World {
        self.world
    }

    pub fn roots(&self) -> &[Entity] {
        &self.roots
    }

    /// False once the entity has been despawned; callers treat that as
    /// "node vanished".
    pub fn exists(&self, node: Entity) -> bool {
        self.world.entities().contains(node)
    }

    pub fn children(&self, node: Entity) -> Vec<Entity> {
        if !self.exists(node) {
            return Vec::new();
        }
        self.world
            .get::<Children>(node)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: Entity) -> Option<Entity> {
        if !self.exists(node) {
            return None;
        }
        self.world.get::<Parent>(node).map(|p| p.get())
    }

    pub fn id(&self, node: Entity) -> u32 {
        node.index()
    }

    pub fn name(&self, node: Entity) -> String {
        if self.exists(node) {
            if let Some(name) = self.world.get::<Name>(node) {
                return name.as_str().to_string();
            }
        }
        format!("Entity{}", node.index())
    }

    pub fn tag(&self, node: Entity) -> String {
        if !self.exists(node) {
            return UNTAGGED.to_string();
        }
        self.world
            .get::<NodeTag>(node)
            .map(|t| t.0.clone())
            .unwrap_or_else(|| UNTAGGED.to_string())
    }

    pub fn layer(&self, node: Entity) -> u32 {
        if !self.exists(node) {
            return 0;
        }
        self.world.get::<NodeLayer>(node).map_or(0, |l| l.0)
    }

    pub fn active(&self, node: Entity) -> bool {
        if !self.exists(node) {
            return false;
        }
        self.world.get::<NodeActive>(node).map_or(true, |a| a.0)
    }

    /// `/`-joined names from the root down to `node`.
    pub fn path(&self, node: Entity) -> String {
        let mut parts = vec![self.name(node)];
        let mut cursor = node;
        while let Some(parent) = self.parent(cursor) {
            if parts.len() >= MAX_PATH_DEPTH {
                break;
            }
            parts.push(self.name(parent));
            cursor = parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Fully-qualified type names of every component on the node.
    pub fn component_names(&self, node: Entity) -> Vec<String> {
        self.component_infos(node)
            .into_iter()
            .map(|(_, name)| name)
            .collect()
    }

    fn component_infos(&self, node: Entity) -> Vec<(ComponentId, String)> {
        if !self.exists(node) {
            return Vec::new();
        }
        let components = self.world.components();
        self.world
            .entity(node)
            .archetype()
            .components()
            .filter_map(|id| components.get_info(id).map(|info| (id, info.name().to_string())))
            .collect()
    }

    /// True when the node carries a component whose simple or qualified
    /// type name matches `type_name` (a `::`-boundary suffix also counts).
    pub fn has_component(&self, node: Entity, type_name: &str) -> bool {
        self.component_names(node)
            .iter()
            .any(|full| type_name_matches(full, type_name))
    }

    /// Reflected view of the first component on `node` whose type name
    /// matches. `None` when absent or not registered for reflection.
    pub fn reflect_component(&self, node: Entity, type_name: &str) -> Option<&'w dyn Reflect> {
        let (component_id, _) = self
            .component_infos(node)
            .into_iter()
            .find(|(_, full)| type_name_matches(full, type_name))?;
        let type_id = self.world.components().get_info(component_id)?.type_id()?;
        let registry = self.world.get_resource::<AppTypeRegistry>()?.read();
        let reflect_component = registry.get(type_id)?.data::<ReflectComponent>()?;
        reflect_component.reflect(self.world.entity(node))
    }
}

/// Last path segment of a type name, ignoring generic arguments:
/// `bevy_transform::components::transform::Transform` -> `Transform`.
pub fn simple_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

pub fn type_name_matches(full: &str, wanted: &str) -> bool {
    let wanted = wanted.trim();
    if wanted.is_empty() {
        return false;
    }
    if full.eq_ignore_ascii_case(wanted) || simple_type_name(full).eq_ignore_ascii_case(wanted) {
        return true;
    }
    let full_lower = full.to_ascii_lowercase();
    let wanted_lower = wanted.to_ascii_lowercase();
    full_lower.ends_with(&format!("::{wanted_lower}"))
}
