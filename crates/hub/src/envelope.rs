// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelope exchanged over the hub's sockets.
//!
//! Inbound frames are `{"router": ..., "params": {...}}`; replies are
//! `{"router": ..., "code": 0|-1, "msg": ..., "data": ...}`. The codec is
//! stateless and knows nothing about connection status.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::HubError;

/// Reply code for success.
pub const CODE_OK: i32 = 0;
/// Reply code for failure.
pub const CODE_FAILED: i32 = -1;
/// Message attached to every successful reply.
pub const MSG_OK: &str = "OK";

/// Inbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub router: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Request {
    pub fn new(router: impl Into<String>, params: Map<String, Value>) -> Self {
        Self { router: router.into(), params }
    }

    /// Look up a raw parameter.
    pub fn get(&self, key: &str) -> Result<&Value, HubError> {
        self.params.get(key).ok_or_else(|| {
            tracing::error!(key, params = ?self.params, "get value failed, key does not exist");
            HubError::MissingParam(key.to_owned())
        })
    }

    /// Look up a parameter that must be a JSON string.
    pub fn get_str(&self, key: &str) -> Result<&str, HubError> {
        self.get(key)?.as_str().ok_or_else(|| {
            tracing::error!(key, "get string failed, value type is incorrect");
            HubError::MissingParam(key.to_owned())
        })
    }

    /// The request re-encoded as a JSON object, as handlers echo it back.
    pub fn to_value(&self) -> Value {
        json!({ "router": self.router, "params": self.params })
    }
}

/// Outbound reply envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub router: String,
    pub code: i32,
    pub msg: String,
    pub data: Value,
}

impl Response {
    pub fn ok(router: impl Into<String>, data: Value) -> Self {
        Self { router: router.into(), code: CODE_OK, msg: MSG_OK.to_owned(), data }
    }

    pub fn failed(router: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { router: router.into(), code: CODE_FAILED, msg: msg.into(), data: json!({}) }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Decode an inbound frame. The payload must be a JSON object with a string
/// `router` field; `params` defaults to an empty object when absent.
pub fn decode(bytes: &[u8]) -> Result<Request, HubError> {
    serde_json::from_slice(bytes).map_err(|e| HubError::Decode(e.to_string()))
}

/// Encode a reply envelope. The payload is passed through untouched.
pub fn encode(router: &str, code: i32, msg: &str, data: Value) -> String {
    json!({ "router": router, "code": code, "msg": msg, "data": data }).to_string()
}

/// Bare `{"msg": ...}` notice used by the hub's built-in open-auth fallback.
pub fn notice(msg: &str) -> String {
    json!({ "msg": msg }).to_string()
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
