//! JSON-RPC 2.0 message types and the braille service method set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::InputEvent;
use crate::translate::InitStatus;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request, or a notification when `id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// A request that expects no response.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
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

    pub fn failure(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id: Some(id),
        }
    }
}

/// Anything a service may send to the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    /// Callback from the service (`method` present).
    Notification(JsonRpcRequest),
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
}

/// Method names on the wire.
pub mod methods {
    pub const DISPLAY_REGISTER_CALLBACK: &str = "display.registerCallback";
    pub const DISPLAY_UNREGISTER_CALLBACK: &str = "display.unregisterCallback";
    pub const DISPLAY_DOTS: &str = "display.displayDots";

    pub const ON_DISPLAY_CONNECTED: &str = "display.onDisplayConnected";
    pub const ON_DISPLAY_DISCONNECTED: &str = "display.onDisplayDisconnected";
    pub const ON_INPUT: &str = "display.onInput";

    pub const TRANSLATOR_SET_CALLBACK: &str = "translator.setCallback";
    pub const TRANSLATOR_CHECK_TABLE: &str = "translator.checkTable";
    pub const TRANSLATOR_TRANSLATE: &str = "translator.translate";
    pub const TRANSLATOR_BACK_TRANSLATE: &str = "translator.backTranslate";

    pub const ON_INIT: &str = "translator.onInit";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayDotsParams {
    pub patterns: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableParams {
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateParams {
    pub text: String,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackTranslateParams {
    pub cells: Vec<u8>,
    pub table_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParams {
    pub event: InputEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitParams {
    pub status: InitStatus,
}
