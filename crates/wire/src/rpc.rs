// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 request/response types (spec §4.6, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reserved JSON-RPC 2.0 error codes (spec §4.6, §6).
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// The `id` member of a request/response.
///
/// A request with no `id` member at all is a notification and must
/// produce no response (spec §4.6). `Null`/`Number`/`String` are the
/// three legal JSON-RPC id shapes; integers are kept as integers rather
/// than round-tripped through a string (spec §4.6 "Tie-breaks and
/// numeric semantics").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Null,
    Number(i64),
    String(String),
}

impl RpcId {
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Null => Some(RpcId::Null),
            Value::Number(n) => n.as_i64().map(RpcId::Number),
            Value::String(s) => Some(RpcId::String(s.clone())),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RpcId::Null => Value::Null,
            RpcId::Number(n) => Value::Number((*n).into()),
            RpcId::String(s) => Value::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(error_codes::METHOD_NOT_FOUND, "Method not found").with_data(Value::String(
            method.to_string(),
        ))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }

    fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("code".into(), Value::Number(self.code.into()));
        obj.insert("message".into(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            obj.insert("data".into(), data.clone());
        }
        Value::Object(obj)
    }
}

/// A parsed, validated JSON-RPC request.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// `None` means this request is a notification (no `id` member present).
    pub id: Option<RpcId>,
    pub method: String,
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Parse and validate raw bytes into a request.
    ///
    /// On a JSON syntax error, returns `(None, RpcError::parse_error)`.
    /// On a structurally invalid request (wrong `jsonrpc`, missing/wrong-typed
    /// `method`, or an `id` of an illegal JSON type), returns
    /// `(id_if_parseable, RpcError::invalid_request)` — the id is surfaced
    /// when parseable so the caller can still correlate the error response
    /// (spec §7: "id = null unless the id could not be parsed").
    pub fn parse(raw: &[u8]) -> Result<RpcRequest, (Option<RpcId>, RpcError)> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| (None, RpcError::parse_error(format!("invalid JSON: {e}"))))?;

        let Value::Object(obj) = &value else {
            return Err((None, RpcError::invalid_request("request must be a JSON object")));
        };

        let id = match obj.get("id") {
            None => None,
            Some(v) => match RpcId::from_value(v) {
                Some(id) => Some(id),
                None => {
                    return Err((
                        None,
                        RpcError::invalid_request("id must be null, a number, or a string"),
                    ))
                }
            },
        };

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == "2.0" => {}
            _ => return Err((id, RpcError::invalid_request("jsonrpc must be \"2.0\""))),
        }

        let method = match obj.get("method") {
            Some(Value::String(m)) => m.clone(),
            _ => return Err((id, RpcError::invalid_request("method must be a string"))),
        };

        let params = match obj.get("params") {
            None => None,
            Some(Value::Object(_)) | Some(Value::Array(_)) => obj.get("params").cloned(),
            Some(_) => {
                return Err((id, RpcError::invalid_request("params must be an object or array")))
            }
        };

        Ok(RpcRequest { id, method, params })
    }
}

/// A JSON-RPC response: either a result or an error, always carrying the
/// originating request's `id` (or `Null` if the id could not be parsed).
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Success { id: RpcId, result: Value },
    Error { id: RpcId, error: RpcError },
}

impl RpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        RpcResponse::Success { id, result }
    }

    pub fn error(id: RpcId, error: RpcError) -> Self {
        RpcResponse::Error { id, error }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("jsonrpc".into(), Value::String("2.0".into()));
        match self {
            RpcResponse::Success { id, result } => {
                obj.insert("result".into(), result.clone());
                obj.insert("id".into(), id.to_value());
            }
            RpcResponse::Error { id, error } => {
                obj.insert("error".into(), error.to_value());
                obj.insert("id".into(), id.to_value());
            }
        }
        Value::Object(obj)
    }

    /// Serialize to bytes, matching the JSON-transport convention of a
    /// single trailing `\n` per message (spec §4.3, §6).
    pub fn to_json_line(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(&self.to_value()).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }
}
