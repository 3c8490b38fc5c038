use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, BridgeResult};

/// Keys under which an image travels inside `OperationResult::Ok::data`.
pub const IMAGE_KEY: &str = "image_png_base64";
pub const CAPTION_KEY: &str = "caption";

/// Outcome of one unit of host-thread work. The two variants are the only
/// way to build one, so a result is never half filled.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Ok { message: String, data: Value },
    Fail { error: String },
}

impl OperationResult {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        OperationResult::Ok {
            message: message.into(),
            data,
        }
    }

    /// Success whose payload is plain text.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        OperationResult::Ok {
            message: "ok".to_string(),
            data: Value::String(text),
        }
    }

    pub fn image(caption: impl Into<String>, png_base64: String) -> Self {
        let caption = caption.into();
        let mut data = Map::new();
        data.insert(IMAGE_KEY.to_string(), Value::String(png_base64));
        data.insert(CAPTION_KEY.to_string(), Value::String(caption.clone()));
        OperationResult::Ok {
            message: caption,
            data: Value::Object(data),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        OperationResult::Fail {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Ok { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            OperationResult::Fail { error } => Some(error),
            OperationResult::Ok { .. } => None,
        }
    }
}

impl From<BridgeError> for OperationResult {
    fn from(err: BridgeError) -> Self {
        OperationResult::fail(err.to_string())
    }
}

impl From<BridgeResult<String>> for OperationResult {
    fn from(result: BridgeResult<String>) -> Self {
        match result {
            Ok(text) => OperationResult::text(text),
            Err(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Text {
        content: String,
    },
    Image {
        content: String,
        text: String,
    },
}

/// What goes back over the wire. Order is part of the contract: the
/// primary result first, then an optional image, then captured logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub messages: Vec<Message>,
}

/// Untyped request parameters with typed, defaulting getters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn opt_str(&self, key: &str) -> Option<String> {
        match self.raw(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.opt_str(key).unwrap_or_else(|| default.to_string())
    }

    /// Required non-empty string.
    pub fn require_str(&self, key: &str) -> BridgeResult<String> {
        match self.raw(key) {
            None => Err(BridgeError::param(key, "is required")),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(BridgeError::param(key, "must not be empty"))
            }
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(BridgeError::param(
                key,
                format!("expected a string, got {}", type_label(other)),
            )),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map_or(default, |v| v != 0.0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        match self.raw(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        let value = self.f64_or(key, f64::NAN);
        if value.is_finite() && value >= 0.0 {
            value as usize
        } else {
            default
        }
    }

    /// `[x, y, z]` or `{"x":..,"y":..,"z":..}`.
    pub fn vec3_or(&self, key: &str, default: [f32; 3]) -> [f32; 3] {
        match self.raw(key) {
            Some(Value::Array(items)) if items.len() == 3 => {
                let mut out = default;
                for (slot, item) in out.iter_mut().zip(items) {
                    match item.as_f64() {
                        Some(v) => *slot = v as f32,
                        None => return default,
                    }
                }
                out
            }
            Some(Value::Object(map)) => {
                let axis = |k: &str| map.get(k).and_then(Value::as_f64).map(|v| v as f32);
                match (axis("x"), axis("y"), axis("z")) {
                    (Some(x), Some(y), Some(z)) => [x, y, z],
                    _ => default,
                }
            }
            _ => default,
        }
    }

    /// A list of strings; a single string counts as a one-item list.
    pub fn str_list(&self, key: &str) -> Vec<String> {
        match self.raw(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.trim().is_empty())
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => {
                s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Endpoint plus parameters, immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub endpoint: String,
    pub params: Params,
}
