//! The central Model Context Protocol engine
//!
//! Provides the primary MCP JSON-RPC decoding, method execution routing, capabilities
//! negotiation (`initialize`), and the audit trail for every routed request.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use rust_mcp_sdk::schema::{
    Implementation, InitializeRequestParams, InitializeResult, JsonrpcMessage, ServerCapabilities,
    ServerCapabilitiesPrompts, ServerCapabilitiesResources, ServerCapabilitiesTools,
    SetLevelRequestParams,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::{
    domain::{
        completion::handle_completion_complete,
        prompts::{build_prompts_list, handle_prompts_get},
        resources::{build_resource_templates_list, build_resources_list, handle_resources_read},
        tools::{build_tools_list, handle_tools_call},
    },
    errors::{DispatchError, ErrorCode, McpError},
    mcp::{
        protocol::{methods, resolve_protocol_version},
        rpc::{
            dispatch_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_result,
            request_id_to_value,
        },
    },
    registry::Registry,
    session::Session,
};

/// Decodes one inbound value (a message or a batch) and returns what should be sent back.
pub async fn handle_json_rpc_value(session: &Arc<Session>, payload: Value) -> Option<Value> {
    let Value::Array(items) = payload else {
        return handle_json_rpc_message(session, payload).await;
    };

    if items.is_empty() {
        return Some(invalid_request(None));
    }

    let mut responses = Vec::with_capacity(items.len());
    for item in items {
        if let Some(response) = handle_json_rpc_message(session, item).await {
            responses.push(response);
        }
    }
    (!responses.is_empty()).then_some(Value::Array(responses))
}

async fn handle_json_rpc_message(session: &Arc<Session>, payload: Value) -> Option<Value> {
    if !payload.is_object() {
        return Some(invalid_request(None));
    }

    if is_response(&payload) {
        match session.peer() {
            Some(peer) if peer.resolve(&payload) => {}
            _ => debug!(session_id = %session.id(), "dropping unsolicited response"),
        }
        return None;
    }

    let request_id = payload.get("id").cloned();
    let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => return Some(invalid_request(request_id)),
    };

    match parsed {
        JsonrpcMessage::Request(request) => {
            let request_id = request_id_to_value(request.id);
            if request.method.trim().is_empty() {
                return Some(invalid_request(Some(request_id)));
            }

            Some(
                handle_json_rpc_request(
                    session,
                    Some(request_id),
                    request.method,
                    request.params.map(Value::Object),
                )
                .await,
            )
        }
        JsonrpcMessage::Notification(notification) => {
            handle_notification(session, &notification.method);
            None
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
            Some(invalid_request(request_id))
        }
    }
}

fn is_response(payload: &Value) -> bool {
    payload.get("method").is_none()
        && (payload.get("result").is_some() || payload.get("error").is_some())
}

fn invalid_request(id: Option<Value>) -> Value {
    json_rpc_error(id, ErrorCode::InvalidRequest.code(), "Invalid Request")
}

fn handle_notification(session: &Arc<Session>, method: &str) {
    match method {
        methods::NOTIFICATION_ROOTS_LIST_CHANGED => session.spawn_roots_refresh(),
        methods::NOTIFICATION_INITIALIZED | methods::NOTIFICATION_CANCELLED => {
            debug!(session_id = %session.id(), method, "notification acknowledged");
        }
        _ => debug!(session_id = %session.id(), method, "ignoring unknown notification"),
    }
}

pub async fn handle_json_rpc_request(
    session: &Arc<Session>,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
) -> Value {
    let audit_params = redact_audit_params(params.as_ref());

    let outcome = match AssertUnwindSafe(dispatch(session, &method, params))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(session_id = %session.id(), method = %method, "request handler panicked");
            Err(McpError::internal("Internal error")
                .with_data(json!({ "method": method }))
                .into())
        }
    };

    let response = match outcome {
        Ok(result) => json_rpc_result(id, result),
        Err(err) => dispatch_error_to_json_rpc(id, err),
    };

    info!(
        session_id = %session.id(),
        method = %method,
        params = %audit_params,
        outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
        "mcp action audited"
    );

    response
}

async fn dispatch(
    session: &Arc<Session>,
    method: &str,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    let registry = session.registry();

    match method {
        methods::INITIALIZE => handle_initialize(session, params).map_err(Into::into),
        methods::PING => Ok(json!({})),
        methods::TOOLS_LIST => Ok(build_tools_list(registry)),
        methods::TOOLS_CALL => {
            handle_tools_call(registry, &session.request_context(), params).await
        }
        methods::RESOURCES_LIST => Ok(build_resources_list(registry)),
        methods::RESOURCE_TEMPLATES_LIST => Ok(build_resource_templates_list(registry)),
        methods::RESOURCES_READ => handle_resources_read(registry, params).await,
        methods::PROMPTS_LIST => Ok(build_prompts_list(registry)),
        methods::PROMPTS_GET => handle_prompts_get(registry, params).await,
        methods::COMPLETION_COMPLETE => handle_completion_complete(registry, params).await,
        methods::LOGGING_SET_LEVEL => handle_set_level(session, params).map_err(Into::into),
        _ => Err(McpError::method_not_found("Method not found")
            .with_data(json!({ "method": method }))
            .into()),
    }
}

/// Decodes request params into the method's wire shape. Absent params count as `{}`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    let params = params.unwrap_or_else(|| Value::Object(Map::new()));
    serde_json::from_value(params)
        .map_err(|err| McpError::invalid_params(format!("Invalid params: {err}")))
}

fn handle_initialize(session: &Session, params: Option<Value>) -> Result<Value, McpError> {
    let init: InitializeRequestParams = parse_params(params)?;
    let protocol_version = negotiate_protocol_version(&init.protocol_version)?;
    session.record_client(init.capabilities, init.client_info, &protocol_version);

    let server_info = session.server_info();
    let result = InitializeResult {
        capabilities: server_capabilities(session.registry()),
        instructions: server_info.instructions.clone(),
        meta: None,
        protocol_version,
        server_info: Implementation {
            description: None,
            icons: Vec::new(),
            name: server_info.name.clone(),
            title: None,
            version: server_info.version.clone(),
            website_url: None,
        },
    };

    Ok(serde_json::to_value(result).expect("initialize result serialization"))
}

/// Tools, logging and completions are always on; prompts and resources only when registered.
pub fn server_capabilities(registry: &Registry) -> ServerCapabilities {
    ServerCapabilities {
        completions: Some(Map::new()),
        logging: Some(Map::new()),
        prompts: registry.has_prompts().then(|| ServerCapabilitiesPrompts {
            list_changed: Some(false),
        }),
        resources: registry.has_resources().then(|| ServerCapabilitiesResources {
            list_changed: Some(false),
            subscribe: Some(false),
        }),
        tools: Some(ServerCapabilitiesTools {
            list_changed: Some(false),
        }),
        ..ServerCapabilities::default()
    }
}

/// Echoes a supported version back; anything else is answered with the latest one we speak.
pub fn negotiate_protocol_version(offered: &str) -> Result<String, McpError> {
    let offered = offered.trim();
    if offered.is_empty() {
        return Err(McpError::invalid_params(
            "initialize params.protocolVersion is required",
        ));
    }

    let (version, supported) = resolve_protocol_version(offered);
    let answered = version.to_string();
    if !supported {
        info!(
            offered,
            answered = %answered,
            "client offered unsupported protocol version"
        );
    }
    Ok(answered)
}

fn handle_set_level(session: &Session, params: Option<Value>) -> Result<Value, McpError> {
    let request: SetLevelRequestParams = parse_params(params)?;
    session.set_logging_level(request.level);
    Ok(json!({}))
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "credentials" | "credential" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
