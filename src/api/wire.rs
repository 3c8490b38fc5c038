//! Body codec at the HTTP boundary. Decoding never fails: anything that is
//! not a JSON object becomes an empty parameter map.

use serde_json::{Map, Value};

use super::types::{Params, Request};

/// Lower-cased, `/`-trimmed, `-` replaced by `_`.
pub fn normalize_endpoint(raw: &str) -> String {
    raw.trim()
        .trim_matches('/')
        .replace('-', "_")
        .to_ascii_lowercase()
}

/// Builds a request from a raw body. `url_path` is used when the body does
/// not name an endpoint.
pub fn decode_request(body: &[u8], url_path: &str) -> Request {
    let root = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let endpoint = root
        .get("endpoint")
        .and_then(Value::as_str)
        .filter(|s| !normalize_endpoint(s).is_empty())
        .unwrap_or(url_path);
    let params = match root.get("params") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    Request {
        endpoint: normalize_endpoint(endpoint),
        params: Params::new(params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_names_normalize() {
        assert_eq!(normalize_endpoint("/Run-Code/"), "run_code");
        assert_eq!(normalize_endpoint(" query_graph "), "query_graph");
        assert_eq!(normalize_endpoint("/"), "");
    }

    #[test]
    fn malformed_bodies_decode_to_empty_params() {
        for body in [&b""[..], b"{", b"[1,2]", b"\"text\"", b"null"] {
            let request = decode_request(body, "/status");
            assert_eq!(request.endpoint, "status");
            assert!(request.params.as_map().is_empty());
        }
        let request = decode_request(br#"{"endpoint": "run-code", "params": 7, "extra": 1}"#, "/");
        assert_eq!(request.endpoint, "run_code");
        assert!(request.params.as_map().is_empty());
    }

    #[test]
    fn params_survive_encoding() {
        let params = json!({
            "s": "text \"quoted\" \u{e9}",
            "b": false,
            "n": -12.5,
            "z": null,
            "l": [1, "two", [3]],
            "o": {"inner": {"deep": true}}
        });
        let body = serde_json::to_vec(&json!({"endpoint": "status", "params": params.clone()})).unwrap();
        let request = decode_request(&body, "/");
        assert_eq!(Value::Object(request.params.as_map().clone()), params);
    }
}
