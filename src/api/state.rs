use super::*;

/// Shared by every request handler on the listener side.
#[derive(Clone)]
pub(super) struct AppState {
    pub(super) scheduler: HostScheduler,
    pub(super) logs: LogBuffer,
    pub(super) build: BuildStatus,
    pub(super) config: Arc<BridgeConfig>,
}
