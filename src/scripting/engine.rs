//! Curated Rhai engine and the `scene`/`host` modules scripts run against.
//!
//! Scripts never hold the `World`. Before a call the host thread installs
//! a [`SceneSnapshot`] in a thread-local; reads are served from it and
//! mutations are queued as [`SceneCommand`]s that the caller applies once
//! the entry point has returned.

use std::cell::RefCell;
use std::collections::HashMap;

use bevy::prelude::*;
use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Module, Shared, FLOAT, INT};

use crate::components::{NodeActive, NodeTag};
use crate::config::BridgeConfig;
use crate::query::SceneView;

pub const SCRIPT_LOG_TARGET: &str = "script";

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
}

impl ScriptLimits {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_operations: config.rhai_max_operations.max(10_000),
            max_call_levels: config.rhai_max_call_levels.max(8),
        }
    }
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: u32,
    pub name: String,
    pub path: String,
    pub tag: String,
    pub layer: u32,
    pub active: bool,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub position: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub frame: u32,
    pub elapsed: f32,
}

impl SceneSnapshot {
    fn node(&self, id: INT) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id as INT == id)
    }

    /// Full paths match exactly; a bare name matches the first node with
    /// that name in depth-first order.
    fn find(&self, path: &str) -> Option<&NodeSnapshot> {
        let path = path.trim().trim_matches('/');
        if path.contains('/') {
            self.nodes.iter().find(|n| n.path == path)
        } else {
            self.nodes.iter().find(|n| n.name == path)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SceneCommand {
    SetActive { id: u32, active: bool },
    SetTag { id: u32, tag: String },
    Rename { id: u32, name: String },
    Translate { id: u32, delta: Vec3 },
    Spawn { name: String, parent: Option<u32> },
    Despawn { id: u32 },
}

#[derive(Default)]
struct ScriptCallContext {
    snapshot: SceneSnapshot,
    commands: Vec<SceneCommand>,
}

thread_local! {
    static SCRIPT_CALL_CONTEXT: RefCell<ScriptCallContext> = RefCell::new(ScriptCallContext::default());
}

pub(crate) fn script_context_begin_call(snapshot: SceneSnapshot) {
    SCRIPT_CALL_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.snapshot = snapshot;
        ctx.commands.clear();
    });
}

/// Ends the call and hands back whatever the script queued.
pub(crate) fn script_context_take_commands() -> Vec<SceneCommand> {
    SCRIPT_CALL_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.snapshot = SceneSnapshot::default();
        std::mem::take(&mut ctx.commands)
    })
}

fn with_snapshot<R>(f: impl FnOnce(&SceneSnapshot) -> R) -> R {
    SCRIPT_CALL_CONTEXT.with(|ctx| f(&ctx.borrow().snapshot))
}

fn queue_command(command: SceneCommand) {
    SCRIPT_CALL_CONTEXT.with(|ctx| ctx.borrow_mut().commands.push(command));
}

/// Captures every named node plus an id lookup for applying commands.
pub fn snapshot_world(world: &mut World) -> (SceneSnapshot, HashMap<u32, Entity>) {
    let frame = world
        .get_resource::<bevy::core::FrameCount>()
        .map_or(0, |f| f.0);
    let elapsed = world.get_resource::<Time>().map_or(0.0, |t| t.elapsed_secs());

    let view = SceneView::new(world);
    let mut nodes = Vec::new();
    let mut ids = HashMap::new();
    let mut stack: Vec<Entity> = view.roots().iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        if !view.exists(node) || ids.contains_key(&view.id(node)) {
            continue;
        }
        let children = view.children(node);
        let position = view
            .world()
            .get::<Transform>(node)
            .map_or(Vec3::ZERO, |t| t.translation);
        nodes.push(NodeSnapshot {
            id: view.id(node),
            name: view.name(node),
            path: view.path(node),
            tag: view.tag(node),
            layer: view.layer(node),
            active: view.active(node),
            parent: view.parent(node).map(|p| view.id(p)),
            children: children.iter().map(|c| view.id(*c)).collect(),
            position,
        });
        ids.insert(view.id(node), node);
        stack.extend(children.into_iter().rev());
    }
    (
        SceneSnapshot {
            nodes,
            frame,
            elapsed,
        },
        ids,
    )
}

/// Applies queued commands in order. Returns one warning per command whose
/// target disappeared before it could be applied.
pub fn apply_scene_commands(
    world: &mut World,
    ids: &HashMap<u32, Entity>,
    commands: Vec<SceneCommand>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let live = |world: &World, id: u32| -> Option<Entity> {
        ids.get(&id).copied().filter(|e| world.entities().contains(*e))
    };
    for command in commands {
        match command {
            SceneCommand::SetActive { id, active } => match live(&*world, id) {
                Some(e) => {
                    world.entity_mut(e).insert(NodeActive(active));
                }
                None => warnings.push(format!("set_active: node {id} vanished")),
            },
            SceneCommand::SetTag { id, tag } => match live(&*world, id) {
                Some(e) => {
                    world.entity_mut(e).insert(NodeTag(tag));
                }
                None => warnings.push(format!("set_tag: node {id} vanished")),
            },
            SceneCommand::Rename { id, name } => match live(&*world, id) {
                Some(e) => {
                    world.entity_mut(e).insert(Name::new(name));
                }
                None => warnings.push(format!("rename: node {id} vanished")),
            },
            SceneCommand::Translate { id, delta } => match live(&*world, id) {
                Some(e) => {
                    let mut entity = world.entity_mut(e);
                    if !entity.contains::<Transform>() {
                        entity.insert(Transform::from_translation(delta));
                    } else if let Some(mut transform) = entity.get_mut::<Transform>() {
                        transform.translation += delta;
                    }
                }
                None => warnings.push(format!("translate: node {id} vanished")),
            },
            SceneCommand::Spawn { name, parent } => {
                let child = world.spawn((Name::new(name.clone()), Transform::default())).id();
                if let Some(parent_id) = parent {
                    match live(&*world, parent_id) {
                        Some(p) => {
                            world.entity_mut(p).add_child(child);
                        }
                        None => warnings.push(format!(
                            "spawn: parent {parent_id} vanished, '{name}' spawned as a root"
                        )),
                    }
                }
            }
            SceneCommand::Despawn { id } => match live(&*world, id) {
                Some(e) => world.entity_mut(e).despawn_recursive(),
                None => warnings.push(format!("despawn: node {id} already gone")),
            },
        }
    }
    warnings
}

pub fn make_engine(limits: &ScriptLimits) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(64, 32);
    engine.disable_symbol("eval");
    engine.on_print(|text| info!(target: "script", "{text}"));
    engine.on_debug(|text, _source, pos| info!(target: "script", "[debug {pos}] {text}"));

    let scene: Shared<Module> = scene_module().into();
    let host: Shared<Module> = host_module().into();
    let mut resolver = StaticModuleResolver::new();
    resolver.insert("scene", scene_module());
    resolver.insert("host", host_module());
    engine.set_module_resolver(resolver);
    // the default names resolve without an import, including inside hoisted functions
    engine.register_static_module("Object", scene.clone());
    engine.register_static_module("Debug", host.clone());
    engine.register_static_module("scene", scene);
    engine.register_static_module("host", host);
    engine
}

fn node_map(node: &NodeSnapshot) -> Map {
    let mut map = Map::new();
    map.insert("id".into(), (node.id as INT).into());
    map.insert("name".into(), node.name.clone().into());
    map.insert("path".into(), node.path.clone().into());
    map.insert("tag".into(), node.tag.clone().into());
    map.insert("layer".into(), (node.layer as INT).into());
    map.insert("active".into(), node.active.into());
    map.insert(
        "parent".into(),
        node.parent.map_or(Dynamic::UNIT, |p| (p as INT).into()),
    );
    map.insert("child_count".into(), (node.children.len() as INT).into());
    let position: Array = vec![
        (node.position.x as FLOAT).into(),
        (node.position.y as FLOAT).into(),
        (node.position.z as FLOAT).into(),
    ];
    map.insert("position".into(), position.into());
    map
}

fn as_float(value: &Dynamic) -> RhaiResult<f32> {
    if let Ok(f) = value.as_float() {
        return Ok(f as f32);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f32);
    }
    Err(format!("expected a number, got {}", value.type_name()).into())
}

fn checked_id(id: INT) -> RhaiResult<u32> {
    with_snapshot(|snap| snap.node(id).map(|n| n.id))
        .ok_or_else(|| format!("no node with id {id}").into())
}

fn scene_find(path: &str) -> RhaiResult<Dynamic> {
    Ok(with_snapshot(|snap| {
        snap.find(path).map_or(Dynamic::UNIT, |n| node_map(n).into())
    }))
}

fn scene_find_all(tag: &str) -> RhaiResult<Array> {
    Ok(with_snapshot(|snap| {
        snap.nodes
            .iter()
            .filter(|n| n.tag.eq_ignore_ascii_case(tag))
            .map(|n| node_map(n).into())
            .collect()
    }))
}

fn scene_count() -> RhaiResult<INT> {
    Ok(with_snapshot(|snap| snap.nodes.len() as INT))
}

fn scene_children(path: &str) -> RhaiResult<Array> {
    with_snapshot(|snap| {
        let parent = snap
            .find(path)
            .ok_or_else(|| format!("no node at '{path}'"))?;
        Ok(parent
            .children
            .iter()
            .filter_map(|id| snap.node(*id as INT))
            .map(|n| node_map(n).into())
            .collect())
    })
}

fn scene_set_active(id: INT, active: bool) -> RhaiResult<()> {
    let id = checked_id(id)?;
    queue_command(SceneCommand::SetActive { id, active });
    Ok(())
}

fn scene_set_tag(id: INT, tag: &str) -> RhaiResult<()> {
    let id = checked_id(id)?;
    queue_command(SceneCommand::SetTag {
        id,
        tag: tag.to_string(),
    });
    Ok(())
}

fn scene_rename(id: INT, name: &str) -> RhaiResult<()> {
    if name.trim().is_empty() {
        return Err("rename: name must not be empty".into());
    }
    let id = checked_id(id)?;
    queue_command(SceneCommand::Rename {
        id,
        name: name.to_string(),
    });
    Ok(())
}

fn scene_translate(id: INT, x: Dynamic, y: Dynamic, z: Dynamic) -> RhaiResult<()> {
    let id = checked_id(id)?;
    let delta = Vec3::new(as_float(&x)?, as_float(&y)?, as_float(&z)?);
    queue_command(SceneCommand::Translate { id, delta });
    Ok(())
}

fn scene_spawn(name: &str, parent_path: &str) -> RhaiResult<()> {
    if name.trim().is_empty() {
        return Err("spawn: name must not be empty".into());
    }
    let parent = if parent_path.trim().is_empty() {
        None
    } else {
        let id = with_snapshot(|snap| snap.find(parent_path).map(|n| n.id))
            .ok_or_else(|| format!("spawn: no parent at '{parent_path}'"))?;
        Some(id)
    };
    queue_command(SceneCommand::Spawn {
        name: name.to_string(),
        parent,
    });
    Ok(())
}

fn scene_spawn_root(name: &str) -> RhaiResult<()> {
    scene_spawn(name, "")
}

fn scene_despawn(id: INT) -> RhaiResult<()> {
    let id = checked_id(id)?;
    queue_command(SceneCommand::Despawn { id });
    Ok(())
}

fn scene_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("find", scene_find);
    module.set_native_fn("find_all", scene_find_all);
    module.set_native_fn("count", scene_count);
    module.set_native_fn("children", scene_children);
    module.set_native_fn("set_active", scene_set_active);
    module.set_native_fn("set_tag", scene_set_tag);
    module.set_native_fn("rename", scene_rename);
    module.set_native_fn("translate", scene_translate);
    module.set_native_fn("spawn", scene_spawn);
    module.set_native_fn("spawn", scene_spawn_root);
    module.set_native_fn("despawn", scene_despawn);
    module
}

fn host_log(message: Dynamic) -> RhaiResult<()> {
    info!(target: "script", "{message}");
    Ok(())
}

fn host_warn(message: Dynamic) -> RhaiResult<()> {
    warn!(target: "script", "{message}");
    Ok(())
}

fn host_frame() -> RhaiResult<INT> {
    Ok(with_snapshot(|snap| snap.frame as INT))
}

fn host_elapsed() -> RhaiResult<FLOAT> {
    Ok(with_snapshot(|snap| snap.elapsed as FLOAT))
}

fn host_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("log", host_log);
    module.set_native_fn("warn", host_warn);
    module.set_native_fn("frame", host_frame);
    module.set_native_fn("elapsed", host_elapsed);
    module
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_world() -> World {
        let mut world = World::new();
        let root = world.spawn(Name::new("World")).id();
        let player = world
            .spawn((Name::new("Player"), NodeTag("Player".into()), Transform::from_xyz(1.0, 0.0, 0.0)))
            .id();
        world.entity_mut(root).add_child(player);
        world
    }

    #[test]
    fn snapshot_lists_nodes_depth_first() {
        let mut world = demo_world();
        let (snapshot, ids) = snapshot_world(&mut world);
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[1].path, "World/Player");
        assert_eq!(snapshot.nodes[1].position, Vec3::X);
        assert_eq!(ids.len(), 2);
        assert!(snapshot.find("Player").is_some());
        assert!(snapshot.find("/World/Player").is_some());
        assert!(snapshot.find("World/Nope").is_none());
    }

    #[test]
    fn commands_apply_in_order_and_report_vanished_targets() {
        let mut world = demo_world();
        let (snapshot, ids) = snapshot_world(&mut world);
        let player_id = snapshot.nodes[1].id;
        let root_id = snapshot.nodes[0].id;
        let warnings = apply_scene_commands(
            &mut world,
            &ids,
            vec![
                SceneCommand::Translate { id: player_id, delta: Vec3::Y },
                SceneCommand::SetTag { id: player_id, tag: "Hero".into() },
                SceneCommand::Spawn { name: "Pet".into(), parent: Some(root_id) },
                SceneCommand::Despawn { id: player_id },
                SceneCommand::Rename { id: player_id, name: "Ghost".into() },
            ],
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("vanished"));
        let (after, _) = snapshot_world(&mut world);
        let names: Vec<&str> = after.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["World", "Pet"]);
    }

    #[test]
    fn host_functions_queue_commands_against_the_snapshot() {
        let mut world = demo_world();
        let (snapshot, _) = snapshot_world(&mut world);
        let player_id = snapshot.nodes[1].id as INT;
        let engine = make_engine(&ScriptLimits::default());

        script_context_begin_call(snapshot);
        let found: INT = engine
            .eval(r#"let p = scene::find("World/Player"); scene::translate(p.id, 1, 2.5, 0); p.id"#)
            .expect("eval");
        let missing = engine.eval::<()>("scene::despawn(99999)");
        let commands = script_context_take_commands();

        assert_eq!(found, player_id);
        assert!(missing.is_err());
        assert_eq!(
            commands,
            vec![SceneCommand::Translate {
                id: player_id as u32,
                delta: Vec3::new(1.0, 2.5, 0.0)
            }]
        );
    }

    #[test]
    fn host_modules_resolve_through_imports() {
        let mut world = demo_world();
        let (snapshot, _) = snapshot_world(&mut world);
        let engine = make_engine(&ScriptLimits::default());

        script_context_begin_call(snapshot);
        let count: INT = engine
            .eval(r#"import "scene" as graph; import "host" as h; h::log("counting"); graph::count()"#)
            .expect("eval");
        let unknown = engine.eval::<INT>(r#"import "net" as n; 1"#);
        script_context_take_commands();

        assert_eq!(count, 2);
        assert!(unknown.is_err());
    }
}
