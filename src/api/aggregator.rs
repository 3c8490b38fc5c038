//! Result envelopes and the host log lines folded into them.
//!
//! `LogCaptureLayer` sits in the tracing subscriber and forwards matching
//! events over a channel; `LogBuffer` keeps the newest of them in a fixed
//! ring that each response drains in one step.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use bevy::prelude::Resource;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::Value;
use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::types::{Envelope, Message, OperationResult, CAPTION_KEY, IMAGE_KEY};
use crate::config::DEFAULT_LOG_CAPACITY;
use crate::error::{BridgeError, BridgeResult};
use crate::scripting::engine::SCRIPT_LOG_TARGET;

/// Targets under this prefix are the bridge talking about itself.
const BRIDGE_TARGET_PREFIX: &str = "scenelink::api";

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.target, self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

pub fn should_capture(metadata: &Metadata<'_>) -> bool {
    let target = metadata.target();
    if target.starts_with(BRIDGE_TARGET_PREFIX) {
        return false;
    }
    target == SCRIPT_LOG_TARGET || *metadata.level() <= Level::WARN
}

#[derive(Clone)]
pub struct LogCaptureLayer {
    sender: Sender<LogLine>,
}

impl LogCaptureLayer {
    pub fn new(sender: Sender<LogLine>) -> Self {
        Self { sender }
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !should_capture(metadata) {
            return;
        }
        let mut visitor = LogVisitor::default();
        event.record(&mut visitor);
        let line = LogLine {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
        };
        let _ = self.sender.send(line);
    }
}

#[derive(Default)]
struct LogVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl LogVisitor {
    fn record_text(&mut self, field: &tracing::field::Field, text: String) {
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.fields.push((field.name().to_string(), text));
        }
    }
}

impl tracing::field::Visit for LogVisitor {
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.record_text(field, value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.record_text(field, value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.record_text(field, value.to_string());
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.record_text(field, value.to_string());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.record_text(field, value.to_string());
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        self.record_text(field, value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.record_text(field, format!("{value:?}"));
    }
}

/// Bounded ring of captured lines, oldest evicted first.
#[derive(Resource, Clone)]
pub struct LogBuffer {
    rx: Receiver<LogLine>,
    ring: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> (Self, Sender<LogLine>) {
        let (tx, rx) = unbounded();
        let capacity = capacity.max(1);
        let buffer = Self {
            rx,
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        };
        (buffer, tx)
    }

    /// A buffer with no layer feeding it; used when the host installed no
    /// capture layer.
    pub fn detached() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY).0
    }

    fn pump_locked(&self, ring: &mut VecDeque<LogLine>) {
        while let Ok(line) = self.rx.try_recv() {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(line);
        }
    }

    /// Moves pending lines into the ring so the channel stays short between
    /// responses.
    pub fn pump(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            self.pump_locked(&mut ring);
        }
    }

    /// Takes every buffered line and clears the ring under one lock.
    pub fn drain(&self) -> Vec<LogLine> {
        match self.ring.lock() {
            Ok(mut ring) => {
                self.pump_locked(&mut ring);
                ring.drain(..).collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

/// Script files that currently fail to compile, keyed by file.
#[derive(Resource, Clone, Default)]
pub struct BuildStatus(Arc<RwLock<BTreeMap<String, String>>>);

impl BuildStatus {
    pub fn record_failure(&self, file: impl Into<String>, error: impl Into<String>) {
        if let Ok(mut map) = self.0.write() {
            map.insert(file.into(), error.into());
        }
    }

    pub fn clear(&self, file: &str) {
        if let Ok(mut map) = self.0.write() {
            map.remove(file);
        }
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.0
            .read()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn is_blocked(&self) -> bool {
        self.0.read().map(|map| !map.is_empty()).unwrap_or(false)
    }

    /// Fails with `HostBuildBlocked` while any file is recorded.
    pub fn check(&self) -> BridgeResult<()> {
        let errors = self.errors();
        if errors.is_empty() {
            return Ok(());
        }
        let detail = errors
            .iter()
            .map(|(file, error)| format!("{file}: {error}"))
            .collect::<Vec<_>>()
            .join("\n");
        Err(BridgeError::HostBuildBlocked(detail))
    }
}

/// Primary text first, then an image if the result carries one, then one
/// message holding every captured log line.
pub fn build_envelope(result: OperationResult, logs: Vec<LogLine>) -> Envelope {
    let mut messages = Vec::with_capacity(3);
    match result {
        OperationResult::Ok { message, data } => match data {
            Value::String(text) => messages.push(Message::Text { content: text }),
            Value::Null => messages.push(Message::Text { content: message }),
            Value::Object(ref map) if map.contains_key(IMAGE_KEY) => {
                messages.push(Message::Text {
                    content: message.clone(),
                });
                let content = map
                    .get(IMAGE_KEY)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let text = map
                    .get(CAPTION_KEY)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(message);
                messages.push(Message::Image { content, text });
            }
            other => {
                let pretty = serde_json::to_string_pretty(&other).unwrap_or_default();
                messages.push(Message::Text {
                    content: format!("{message}\n{pretty}"),
                });
            }
        },
        OperationResult::Fail { error } => messages.push(Message::Text {
            content: format!("Error: {error}"),
        }),
    }
    if !logs.is_empty() {
        let mut content = format!("Captured log ({} lines):", logs.len());
        for line in &logs {
            content.push('\n');
            content.push_str(&line.to_string());
        }
        messages.push(Message::Text { content });
    }
    Envelope { messages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;

    fn line(n: usize) -> LogLine {
        LogLine {
            level: Level::WARN,
            target: "host".into(),
            message: format!("line {n}"),
            fields: Vec::new(),
        }
    }

    #[test]
    fn ring_evicts_oldest_and_drains_once() {
        let (buffer, tx) = LogBuffer::new(3);
        for n in 0..5 {
            tx.send(line(n)).unwrap();
        }
        let drained = buffer.drain();
        let messages: Vec<_> = drained.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["line 2", "line 3", "line 4"]);
        assert!(buffer.drain().is_empty());

        tx.send(line(9)).unwrap();
        buffer.pump();
        assert_eq!(buffer.drain().len(), 1);
    }

    #[test]
    fn layer_captures_warnings_and_script_output_only() {
        let (buffer, tx) = LogBuffer::new(10);
        let subscriber = tracing_subscriber::registry().with(LogCaptureLayer::new(tx));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "host", "ignored");
            tracing::warn!(target: "host", hp = 3, "low health");
            tracing::info!(target: "script", "hello from script");
            tracing::error!(target: "scenelink::api::router", "bridge noise");
        });
        let lines: Vec<String> = buffer.drain().iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            ["[WARN] host: low health hp=3", "[INFO] script: hello from script"]
        );
    }

    #[test]
    fn envelope_orders_result_image_then_logs() {
        let image = OperationResult::image("top view 8x8", "AAAA".into());
        let envelope = build_envelope(image, vec![line(1)]);
        assert_eq!(envelope.messages.len(), 3);
        assert_eq!(
            envelope.messages[1],
            Message::Image {
                content: "AAAA".into(),
                text: "top view 8x8".into()
            }
        );
        assert!(matches!(&envelope.messages[2], Message::Text { content } if content.contains("line 1")));

        let data = build_envelope(OperationResult::ok("stats", json!({"n": 1})), Vec::new());
        assert!(matches!(&data.messages[0], Message::Text { content } if content.starts_with("stats\n{")));

        let fail = build_envelope(OperationResult::fail("nope"), Vec::new());
        assert_eq!(fail.messages, vec![Message::Text { content: "Error: nope".into() }]);
    }

    #[test]
    fn build_status_blocks_until_cleared() {
        let status = BuildStatus::default();
        assert!(status.check().is_ok());
        status.record_failure("scripts/a.rhai", "Unexpected '}'");
        let err = status.check().unwrap_err().to_string();
        assert!(err.starts_with(crate::error::BUILD_BLOCKED_PREFIX));
        assert!(err.contains("scripts/a.rhai: Unexpected '}'"));
        status.clear("scripts/a.rhai");
        assert!(!status.is_blocked());
    }
}
