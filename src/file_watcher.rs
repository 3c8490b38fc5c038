use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

use crate::api::BuildStatus;
use crate::config::BridgeConfig;
use crate::scripting::{self, ScriptLimits};

/// Watches the scripts directory and keeps `BuildStatus` in step with
/// which `*.rhai` files compile.
pub struct FileWatcherPlugin;

#[derive(Debug, Clone, PartialEq)]
pub enum FileWatchEvent {
    ScriptChanged { file: String, source: String },
    ScriptRemoved { file: String },
}

#[derive(Resource)]
pub struct FileWatcherReceiver(pub Receiver<FileWatchEvent>);

impl Plugin for FileWatcherPlugin {
    fn build(&self, app: &mut App) {
        let scripts_dir = app
            .world()
            .get_resource::<BridgeConfig>()
            .map(|c| c.scripts_dir.clone())
            .unwrap_or_else(|| BridgeConfig::default().scripts_dir);
        let (tx, rx) = crossbeam_channel::unbounded::<FileWatchEvent>();
        app.insert_resource(FileWatcherReceiver(rx))
            .init_resource::<BuildStatus>()
            .add_systems(Update, process_file_watch_events);

        let scripts_path = PathBuf::from(scripts_dir);
        for event in scan_scripts(&scripts_path) {
            let _ = tx.send(event);
        }
        std::thread::spawn(move || {
            run_watcher(tx, scripts_path);
        });
    }
}

/// One `ScriptChanged` per readable script already on disk.
pub fn scan_scripts(dir: &Path) -> Vec<FileWatchEvent> {
    let mut events = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_script(&path) {
                if let Ok(source) = std::fs::read_to_string(&path) {
                    events.push(FileWatchEvent::ScriptChanged {
                        file: script_key(&path, dir),
                        source,
                    });
                }
            }
        }
    }
    events.sort_by(|a, b| event_file(a).cmp(event_file(b)));
    events
}

fn event_file(event: &FileWatchEvent) -> &str {
    match event {
        FileWatchEvent::ScriptChanged { file, .. } | FileWatchEvent::ScriptRemoved { file } => file,
    }
}

fn run_watcher(tx: Sender<FileWatchEvent>, scripts_path: PathBuf) {
    if !scripts_path.exists() {
        info!(
            "Scripts dir {} not found, compile gate has nothing to watch",
            scripts_path.display()
        );
        return;
    }

    let dir = scripts_path.clone();
    let mut watcher: RecommendedWatcher =
        match notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                handle_fs_event(event, &tx, &dir);
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                error!("Failed to create file watcher: {e}");
                return;
            }
        };

    if let Err(e) = watcher.watch(&scripts_path, RecursiveMode::Recursive) {
        error!("Failed to watch {}: {e}", scripts_path.display());
        return;
    }
    info!("Watching scripts: {}", scripts_path.display());

    // The watcher stops when dropped, so this thread holds it.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}

fn handle_fs_event(event: NotifyEvent, tx: &Sender<FileWatchEvent>, scripts_dir: &Path) {
    let removed = matches!(event.kind, EventKind::Remove(_));
    if !removed && !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in event.paths.iter().filter(|p| is_script(p)) {
        let file = script_key(path, scripts_dir);
        // Renames arrive as Modify events on a path that no longer exists.
        let event = match std::fs::read_to_string(path) {
            Ok(source) if !removed => FileWatchEvent::ScriptChanged { file, source },
            _ if path.exists() && !removed => continue,
            _ => FileWatchEvent::ScriptRemoved { file },
        };
        let _ = tx.send(event);
    }
}

fn is_script(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("rhai")
}

/// Path relative to the scripts dir, with `/` separators.
fn script_key(path: &Path, scripts_dir: &Path) -> String {
    let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    let dir = canonical(scripts_dir);
    let full = match path.parent() {
        Some(parent) => canonical(parent).join(path.file_name().unwrap_or_default()),
        None => path.to_path_buf(),
    };
    let relative = full.strip_prefix(&dir).unwrap_or(&full);
    let rel = relative.to_string_lossy().replace('\\', "/");
    format!("{}/{}", scripts_dir.display(), rel)
}

/// Compiles a changed script and records or clears its entry.
pub fn apply_script_event(event: FileWatchEvent, build: &BuildStatus, limits: &ScriptLimits) {
    match event {
        FileWatchEvent::ScriptChanged { file, source } => {
            match scripting::check_source(&source, limits) {
                Ok(()) => {
                    if build.errors().iter().any(|(f, _)| *f == file) {
                        info!("{file} compiles again");
                    }
                    build.clear(&file);
                }
                Err(e) => {
                    warn!("{file} failed to compile: {e}");
                    build.record_failure(file, e);
                }
            }
        }
        FileWatchEvent::ScriptRemoved { file } => build.clear(&file),
    }
}

fn process_file_watch_events(
    watcher: Option<Res<FileWatcherReceiver>>,
    build: Res<BuildStatus>,
    config: Option<Res<BridgeConfig>>,
) {
    let Some(watcher) = watcher else { return };
    let limits = config
        .map(|c| ScriptLimits::from_config(&c))
        .unwrap_or_default();
    for event in watcher.0.try_iter().take(16) {
        apply_script_event(event, &build, &limits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_script_blocks_until_fixed_or_removed() {
        let build = BuildStatus::default();
        let limits = ScriptLimits::default();
        let file = "scripts/ai.rhai".to_string();

        apply_script_event(
            FileWatchEvent::ScriptChanged {
                file: file.clone(),
                source: "fn think( { 1 }".into(),
            },
            &build,
            &limits,
        );
        assert!(build.is_blocked());
        assert_eq!(build.errors()[0].0, file);

        apply_script_event(
            FileWatchEvent::ScriptChanged {
                file: file.clone(),
                source: "fn think() { 1 }".into(),
            },
            &build,
            &limits,
        );
        assert!(!build.is_blocked());

        build.record_failure(file.clone(), "stale");
        apply_script_event(FileWatchEvent::ScriptRemoved { file }, &build, &limits);
        assert!(!build.is_blocked());
    }

    #[test]
    fn scan_finds_nested_rhai_files_only() {
        let dir = std::env::temp_dir().join(format!("scenelink_scan_{}", std::process::id()));
        let nested = dir.join("ai");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.join("main.rhai"), "let a = 1;").unwrap();
        std::fs::write(nested.join("patrol.rhai"), "let b = 2;").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignore me").unwrap();

        let events = scan_scripts(&dir);
        let files: Vec<&str> = events.iter().map(event_file).collect();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("/ai/patrol.rhai"), "{files:?}");
        assert!(files[1].ends_with("/main.rhai"));
    }
}
