//! JSON-RPC 2.0 message types for the engine host protocol.
//!
//! Two methods are served:
//!
//! - `engine.invoke`: params are a serialized [`Callable`](crate::callable::Callable);
//!   the result is `{"value": <value or null>}`.
//! - `system.ping`: liveness check; the result is `{"pong": true}`.
//!
//! An engine-side failure is reported with code [`ENGINE_FAILURE`] and the
//! [`EngineError`](crate::error::EngineError) in `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_INVOKE: &str = "engine.invoke";
pub const METHOD_PING: &str = "system.ping";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
/// The engine executed the request and it failed.
pub const ENGINE_FAILURE: i32 = -32000;

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC 2.0 response. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// `None` only when the request id could not be read.
    pub id: Option<u64>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    pub fn failure(id: Option<u64>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Result payload of `engine.invoke`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResult {
    #[serde(default)]
    pub value: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(METHOD_PING, json!({}), 7);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"jsonrpc": "2.0", "method": "system.ping", "params": {}, "id": 7})
        );
    }

    #[test]
    fn test_success_omits_error() {
        let resp = JsonRpcResponse::success(3, json!({"value": 1}));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"jsonrpc": "2.0", "result": {"value": 1}, "id": 3})
        );
    }

    #[test]
    fn test_failure_without_id_serializes_null_id() {
        let resp = JsonRpcResponse::failure(None, JsonRpcError::new(PARSE_ERROR, "bad json"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], json!(PARSE_ERROR));
    }

    #[test]
    fn test_invoke_result_null_value() {
        let parsed: InvokeResult = serde_json::from_value(json!({"value": null})).unwrap();
        assert_eq!(parsed.value, None);
    }
}
