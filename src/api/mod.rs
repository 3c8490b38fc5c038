mod aggregator;
mod capture;
mod handlers;
mod router;
mod scheduler;
mod state;
pub mod types;
mod wire;

use axum::{
    body::Bytes,
    extract::State,
    http::Uri,
    routing::post,
    Json, Router,
};
use bevy::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::BridgeConfig;
use router::build_router;
use state::AppState;
use types::{Envelope, OperationResult};

pub use aggregator::{BuildStatus, LogBuffer, LogCaptureLayer};
use scheduler::HostScheduler;

pub struct ApiPlugin;

impl Plugin for ApiPlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world()
            .get_resource::<BridgeConfig>()
            .cloned()
            .unwrap_or_default();
        let scheduler = HostScheduler::from_config(&config);

        if !app.world().contains_resource::<LogBuffer>() {
            app.insert_resource(LogBuffer::detached());
        }
        app.init_resource::<BuildStatus>()
            .insert_resource(scheduler.clone())
            .add_systems(Update, (scheduler::drain_host_tasks, pump_log_buffer));

        let state = AppState {
            scheduler,
            logs: app.world().resource::<LogBuffer>().clone(),
            build: app.world().resource::<BuildStatus>().clone(),
            config: Arc::new(config.clone()),
        };
        match config.socket_addr() {
            Ok(addr) => {
                std::thread::spawn(move || serve(state, addr));
            }
            Err(e) => error!("API disabled: {e}"),
        }
    }
}

fn serve(state: AppState, addr: SocketAddr) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start API runtime: {e}");
            return;
        }
    };
    rt.block_on(async {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {addr}: {e}");
                return;
            }
        };
        info!("Listening on http://{addr}");
        if let Err(e) = axum::serve(listener, build_router(state)).await {
            error!("API server stopped: {e}");
        }
    });
}

fn pump_log_buffer(logs: Res<LogBuffer>) {
    logs.pump();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::NodeTag;
    use aggregator::LogLine;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;
    use types::Message;

    /// A host thread that owns a small world and drains until dropped.
    struct Host {
        stop: Arc<AtomicBool>,
    }

    impl Drop for Host {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
        }
    }

    fn start_host(scheduler: HostScheduler) -> Host {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        std::thread::spawn(move || {
            let mut world = World::new();
            let root = world.spawn(Name::new("World")).id();
            let enemy = world
                .spawn((Name::new("Enemy_0"), NodeTag("Enemy".into()), Transform::default()))
                .id();
            world.entity_mut(root).add_child(enemy);
            while !flag.load(Ordering::Acquire) {
                scheduler.drain(&mut world);
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        Host { stop }
    }

    fn state() -> (AppState, crossbeam_channel::Sender<LogLine>) {
        let config = BridgeConfig::default();
        let (logs, tx) = LogBuffer::new(config.log_capacity);
        let state = AppState {
            scheduler: HostScheduler::from_config(&config),
            logs,
            build: BuildStatus::default(),
            config: Arc::new(config),
        };
        (state, tx)
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: &str) -> Envelope {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn first_text(envelope: &Envelope) -> &str {
        match envelope.messages.first() {
            Some(Message::Text { content }) => content,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_code_round_trips_through_host() {
        let (state, _tx) = state();
        let _host = start_host(state.scheduler.clone());
        let envelope = send(
            &state,
            "POST",
            "/",
            r#"{"endpoint": "run_code", "params": {"code": "return 1+1;"}}"#,
        )
        .await;
        assert_eq!(first_text(&envelope), "2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_bodies_still_get_envelopes() {
        let (state, _tx) = state();
        for body in ["", "{not json", "[]"] {
            let envelope = send(&state, "POST", "/", body).await;
            assert_eq!(first_text(&envelope), "Error: Unknown endpoint: (none given)");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn url_path_selects_endpoint_and_logs_follow_result() {
        let (state, tx) = state();
        let _host = start_host(state.scheduler.clone());
        tx.send(LogLine {
            level: tracing::Level::WARN,
            target: "host".into(),
            message: "low health".into(),
            fields: Vec::new(),
        })
        .unwrap();
        let envelope = send(&state, "GET", "/list-hierarchy", "").await;
        assert!(first_text(&envelope).contains("Enemy_0 [id="));
        assert!(matches!(
            envelope.messages.last(),
            Some(Message::Text { content }) if content.contains("[WARN] host: low health")
        ));

        let again = send(&state, "GET", "/status", "").await;
        assert_eq!(again.messages.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn build_errors_short_circuit_every_endpoint() {
        let (state, _tx) = state();
        state.build.record_failure("scripts/broken.rhai", "Expecting ';'");
        let envelope = send(&state, "POST", "/", r#"{"endpoint": "status"}"#).await;
        assert!(first_text(&envelope).starts_with("Error: Host has compile errors"));
        assert_eq!(state.scheduler.pending(), 0);
    }
}
