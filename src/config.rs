use bevy::prelude::Resource;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8090;
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
pub const DEFAULT_DRAIN_PER_TICK: usize = 10;
pub const DEFAULT_QUERY_BUDGET_MS: u64 = 5_000;
pub const DEFAULT_LOG_CAPACITY: usize = 50;
pub const DEFAULT_RHAI_MAX_OPERATIONS: u64 = 2_000_000;
pub const DEFAULT_RHAI_MAX_CALL_LEVELS: usize = 64;

/// Bridge settings. Values come from `bridge.json` (or the file named by
/// `SCENELINK_CONFIG`) and are then overridden by environment variables.
#[derive(Resource, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BridgeConfig {
    pub bind: String,
    pub port: u16,
    pub dispatch_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub drain_per_tick: usize,
    pub query_budget_ms: u64,
    pub log_capacity: usize,
    pub scripts_dir: String,
    pub rhai_max_operations: u64,
    pub rhai_max_call_levels: usize,
    pub demo_scene: bool,
    pub window_title: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            drain_per_tick: DEFAULT_DRAIN_PER_TICK,
            query_budget_ms: DEFAULT_QUERY_BUDGET_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            scripts_dir: "scripts".to_string(),
            rhai_max_operations: DEFAULT_RHAI_MAX_OPERATIONS,
            rhai_max_call_levels: DEFAULT_RHAI_MAX_CALL_LEVELS,
            demo_scene: true,
            window_title: None,
        }
    }
}

impl BridgeConfig {
    pub fn load() -> Self {
        let path = std::env::var("SCENELINK_CONFIG")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "bridge.json".to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BridgeConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("[Scenelink] Failed to parse {}: {}", path, e);
                    BridgeConfig::default()
                }
            },
            Err(_) => BridgeConfig::default(),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Some(bind) = env_string("SCENELINK_BIND") {
            self.bind = bind;
        }
        self.port = env_parse("SCENELINK_PORT", self.port);
        self.dispatch_timeout_ms =
            env_parse("SCENELINK_DISPATCH_TIMEOUT_MS", self.dispatch_timeout_ms).max(1);
        self.drain_per_tick = env_parse("SCENELINK_DRAIN_PER_TICK", self.drain_per_tick).max(1);
        self.query_budget_ms = env_parse("SCENELINK_QUERY_BUDGET_MS", self.query_budget_ms);
        if let Some(dir) = env_string("SCENELINK_SCRIPTS_DIR") {
            self.scripts_dir = dir;
        }
        self.rhai_max_operations =
            env_parse("SCENELINK_RHAI_MAX_OPERATIONS", self.rhai_max_operations).max(10_000);
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.bind, self.port)
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid bind address {}:{}: {e}", self.bind, self.port))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn query_budget(&self) -> Duration {
        Duration::from_millis(self.query_budget_ms)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let cfg: BridgeConfig =
            serde_json::from_str(r#"{ "port": 9000, "demo_scene": false }"#).expect("parse");
        assert_eq!(cfg.port, 9000);
        assert!(!cfg.demo_scene);
        assert_eq!(cfg.dispatch_timeout_ms, DEFAULT_DISPATCH_TIMEOUT_MS);
        assert_eq!(cfg.drain_per_tick, DEFAULT_DRAIN_PER_TICK);
        assert_eq!(cfg.log_capacity, DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn socket_addr_rejects_garbage_bind() {
        let cfg = BridgeConfig {
            bind: "not an ip".into(),
            ..Default::default()
        };
        assert!(cfg.socket_addr().is_err());
        assert!(BridgeConfig::default().socket_addr().is_ok());
    }
}
