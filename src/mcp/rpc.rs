//! JSON-RPC protocol representations and formatting utilities
//!
//! Provides standardized mapping of dispatch errors to valid JSON-RPC payloads, plus the
//! builders for server-originated requests and notifications.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcNotification, JsonrpcRequest, JsonrpcResultResponse, RequestId,
    Result as McpResult, RpcError,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::errors::{DispatchError, ErrorCode, McpError};

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn dispatch_error_to_json_rpc(id: Option<Value>, err: DispatchError) -> Value {
    match err {
        DispatchError::Protocol(err) => mcp_error_to_json_rpc(id, err),
        DispatchError::UnexpectedState(err) => json_rpc_error_with_data(
            id,
            ErrorCode::InternalError.code(),
            &err.message,
            err.extras,
        ),
    }
}

pub fn mcp_error_to_json_rpc(id: Option<Value>, err: McpError) -> Value {
    json_rpc_error_with_data(id, err.code.code(), &err.message, err.data)
}

pub fn json_rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i64,
    message: &str,
    data: Option<Value>,
) -> Value {
    let response = JsonrpcErrorResponse::new(
        RpcError {
            code,
            data,
            message: message.to_string(),
        },
        id.as_ref().and_then(value_to_request_id),
    );
    serde_json::to_value(response).expect("jsonrpc error response serialization")
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let extra = result.as_object().cloned();
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        return serde_json::to_value(response).expect("jsonrpc result response serialization");
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn json_rpc_request(id: i64, method: &str, params: Option<Map<String, Value>>) -> Value {
    let request = JsonrpcRequest::new(RequestId::Integer(id), method.to_string(), params);
    serde_json::to_value(request).expect("jsonrpc request serialization")
}

pub fn json_rpc_notification(method: &str, params: Option<Map<String, Value>>) -> Value {
    let notification = JsonrpcNotification::new(method.to_string(), params);
    serde_json::to_value(notification).expect("jsonrpc notification serialization")
}

/// Flattens typed params into the object map the JSON-RPC envelopes carry.
pub fn params_object<T: Serialize>(params: &T) -> Option<Map<String, Value>> {
    match serde_json::to_value(params).expect("jsonrpc params serialization") {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Reads a peer's error response back into a coded error.
pub fn json_rpc_error_to_mcp_error(error: &Value) -> McpError {
    match serde_json::from_value::<RpcError>(error.clone()) {
        Ok(error) => McpError {
            code: ErrorCode::from_code(error.code).unwrap_or(ErrorCode::InternalError),
            message: error.message,
            data: error.data,
        },
        Err(_) => McpError::internal("peer returned an error"),
    }
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}
