//! Dynamic code execution: classify, validate, synthesize, compile, invoke.

pub mod classify;
pub mod diagnostics;
pub mod engine;
pub mod synth;
pub mod validate;

use bevy::prelude::*;
use rhai::{Dynamic, Scope};

use crate::error::{BridgeError, BridgeResult};

pub use engine::{make_engine, ScriptLimits};

pub const VALIDATE_OK: &str = "Compilation OK";

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub safe_mode: bool,
    pub validate_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            safe_mode: true,
            validate_only: false,
        }
    }
}

/// Runs a snippet on the host thread. Validation always happens before
/// compilation, and nothing is invoked unless compilation succeeded.
///
/// Mutations queued by the script are applied after the entry point
/// returns; a script that fails at runtime leaves the world untouched.
pub fn execute(
    world: &mut World,
    code: &str,
    options: RunOptions,
    limits: &ScriptLimits,
) -> BridgeResult<String> {
    if code.trim().is_empty() {
        return Err(BridgeError::param("code", "must not be empty"));
    }
    if options.safe_mode {
        validate::check_denylist(code)?;
    }
    let classified = classify::classify(code);
    validate::check_structure(&classified)?;

    let unit = synth::synthesize(&classified);
    let engine = make_engine(limits);
    let ast = engine
        .compile(&unit.source)
        .map_err(|e| BridgeError::CompilationFailed(diagnostics::sanitize(&e.to_string(), &unit)))?;
    if options.validate_only {
        return Ok(VALIDATE_OK.to_string());
    }

    let (snapshot, ids) = engine::snapshot_world(world);
    engine::script_context_begin_call(snapshot);
    let mut scope = Scope::new();
    let outcome = engine.call_fn::<Dynamic>(&mut scope, &ast, synth::ENTRY_FN, ());
    let commands = engine::script_context_take_commands();
    let value =
        outcome.map_err(|e| BridgeError::ExecutionFailed(diagnostics::sanitize(&e.to_string(), &unit)))?;

    for warning in engine::apply_scene_commands(world, &ids, commands) {
        warn!(target: "script", "{warning}");
    }
    Ok(stringify(value))
}

/// Checks a standalone script file with the same engine; used by the
/// compile gate. Files are compiled as-is, not wrapped.
pub fn check_source(source: &str, limits: &ScriptLimits) -> Result<(), String> {
    make_engine(limits)
        .compile(source)
        .map(|_| ())
        .map_err(|e| diagnostics::scrub_paths(&e.to_string()))
}

fn stringify(value: Dynamic) -> String {
    if value.is_unit() {
        "null".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::NodeTag;

    fn run(world: &mut World, code: &str) -> BridgeResult<String> {
        execute(world, code, RunOptions::default(), &ScriptLimits::default())
    }

    fn scene() -> World {
        let mut world = World::new();
        let root = world.spawn(Name::new("World")).id();
        for i in 0..3 {
            let enemy = world
                .spawn((Name::new(format!("Enemy_{i}")), NodeTag("Enemy".into()), Transform::default()))
                .id();
            world.entity_mut(root).add_child(enemy);
        }
        world
    }

    #[test]
    fn arithmetic_return_is_stringified() {
        let mut world = World::new();
        assert_eq!(run(&mut world, "return 1+1;").unwrap(), "2");
        assert_eq!(run(&mut world, "let x = 5;").unwrap(), synth::IMPLICIT_RESULT);
        assert_eq!(run(&mut world, "return ();").unwrap(), "null");
        assert_eq!(run(&mut world, "// nothing here").unwrap(), synth::EMPTY_BODY_RESULT);
    }

    #[test]
    fn unterminated_last_statements_still_run() {
        let mut world = World::new();
        assert_eq!(run(&mut world, "let x = 40;\nreturn x + 2 // answer").unwrap(), "42");
        for code in [
            "let x = 40;\nx + 2 // answer",
            "let m = #{ a: 1 }",
            "let v = if true { 1 } else { 2 }",
            "let f = |x| { x + 1 }",
        ] {
            assert_eq!(run(&mut world, code).unwrap(), synth::IMPLICIT_RESULT, "{code}");
        }
    }

    #[test]
    fn validate_only_stops_after_compilation() {
        let mut world = scene();
        let options = RunOptions {
            safe_mode: true,
            validate_only: true,
        };
        let out = execute(&mut world, "scene::despawn(0);", options, &ScriptLimits::default());
        assert_eq!(out.unwrap(), VALIDATE_OK);
        assert_eq!(engine::snapshot_world(&mut world).0.nodes.len(), 4);
    }

    #[test]
    fn denylisted_code_never_compiles() {
        let mut world = World::new();
        let err = run(&mut world, "File.Delete(\"x\"); let = broken").unwrap_err();
        assert!(matches!(err, BridgeError::ValidationRejected(_)), "{err:?}");

        let unsafe_off = RunOptions {
            safe_mode: false,
            validate_only: true,
        };
        let err = execute(&mut world, "class Foo { }", unsafe_off, &ScriptLimits::default()).unwrap_err();
        assert!(matches!(err, BridgeError::ValidationRejected(_)));
    }

    #[test]
    fn compile_errors_are_sanitized_and_mapped() {
        let mut world = World::new();
        let err = run(&mut world, "let a = 1;\nlet b = ;").unwrap_err();
        match err {
            BridgeError::CompilationFailed(msg) => assert!(msg.contains("snippet line 2"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn runtime_errors_leave_world_untouched() {
        let mut world = scene();
        let err = run(
            &mut world,
            "let e = scene::find(\"Enemy_0\");\nscene::despawn(e.id);\nthrow \"boom\";",
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::ExecutionFailed(ref m) if m.contains("boom")));
        assert_eq!(engine::snapshot_world(&mut world).0.nodes.len(), 4);
    }

    #[test]
    fn scripts_mutate_through_host_modules() {
        let mut world = scene();
        let out = run(
            &mut world,
            r#"
int Total() { return scene::count(); }
for e in scene::find_all("enemy") { Object::set_tag(e.id, "Boss"); }
scene::spawn("Loot", "World");
Debug::log("tagged " + Total());
return Total();
"#,
        )
        .unwrap();
        assert_eq!(out, "4");
        let (snapshot, _) = engine::snapshot_world(&mut world);
        assert_eq!(snapshot.nodes.len(), 5);
        assert_eq!(snapshot.nodes.iter().filter(|n| n.tag == "Boss").count(), 3);
        assert!(snapshot.nodes.iter().any(|n| n.path == "World/Loot"));
    }

    #[test]
    fn operation_limit_stops_runaway_loops() {
        let mut world = World::new();
        let limits = ScriptLimits {
            max_operations: 10_000,
            max_call_levels: 8,
        };
        let err = execute(&mut world, "loop { }", RunOptions::default(), &limits).unwrap_err();
        assert!(matches!(err, BridgeError::ExecutionFailed(_)));
    }
}
