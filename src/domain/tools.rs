//! Tools: registration shape, per-call context, and the `tools/*` handlers
//!
//! A tool's `execute` is opaque to the engine. Only its declared schema and the shape of what
//! it returns matter here.

use std::{collections::HashMap, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use rust_mcp_sdk::schema::{
    CallToolRequestParams, CallToolResult, ContentBlock, ListToolsResult, LoggingLevel,
    LoggingMessageNotificationParams, ProgressNotificationParams, ProgressToken,
    Tool as ToolDescriptor, ToolAnnotations, ToolInputSchema,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    domain::{
        content::{normalize, ToolOutput},
        RequestContext,
    },
    errors::{DispatchError, HandlerError, McpError},
    mcp::{protocol::methods, server::parse_params},
    registry::Registry,
    session::Peer,
};

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, HandlerError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, HandlerError>> + Send + 'static,
{
    async fn execute(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, HandlerError> {
        (self)(args, ctx).await
    }
}

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
    pub annotations: Option<ToolAnnotations>,
    pub(crate) validator: Option<Arc<jsonschema::Validator>>,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
            annotations: None,
            validator: None,
            handler: Arc::new(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares a JSON Schema for the tool's arguments. It is compiled on registration.
    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }

    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    pub(crate) fn compile_schema(&mut self) -> Result<(), String> {
        self.validator = match self.parameters.as_ref() {
            Some(schema) => Some(Arc::new(
                jsonschema::validator_for(schema).map_err(|err| err.to_string())?,
            )),
            None => None,
        };
        Ok(())
    }

    /// Wire descriptor for `tools/list`. Only `properties`, `required` and `$schema` of the
    /// declared schema are advertised; validation still uses the full schema.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            annotations: self.annotations.clone(),
            description: self.description.clone(),
            execution: None,
            icons: Vec::new(),
            input_schema: input_schema(self.parameters.as_ref()),
            meta: None,
            name: self.name.clone(),
            output_schema: None,
            title: None,
        }
    }

    /// Returns every schema violation in `args`, or `Ok` when there is no schema.
    pub fn validate_arguments(&self, args: &Value) -> Result<(), Vec<String>> {
        let Some(validator) = self.validator.as_ref() else {
            return Ok(());
        };

        let errors = validator
            .iter_errors(args)
            .map(|error| error.to_string())
            .collect::<Vec<_>>();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn input_schema(parameters: Option<&Value>) -> ToolInputSchema {
    let Some(schema) = parameters else {
        return ToolInputSchema::new(Vec::new(), None, None);
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .filter_map(|(name, property)| {
                    property
                        .as_object()
                        .map(|property| (name.clone(), property.clone()))
                })
                .collect::<HashMap<_, _>>()
        });
    let dialect = schema
        .get("$schema")
        .and_then(Value::as_str)
        .map(str::to_string);

    ToolInputSchema::new(required, properties, dialect)
}

/// Builds an `isError` result carrying one text block.
pub fn error_result(message: impl Into<String>) -> CallToolResult {
    let mut result = CallToolResult::from_content(vec![ContentBlock::text_content(message.into())]);
    result.is_error = Some(true);
    result
}

/// Per-call capabilities handed to a tool's `execute`.
#[derive(Clone)]
pub struct ToolContext {
    auth: Option<Value>,
    progress_token: Option<ProgressToken>,
    peer: Option<Peer>,
}

impl ToolContext {
    pub fn new(
        auth: Option<Value>,
        progress_token: Option<ProgressToken>,
        peer: Option<Peer>,
    ) -> Self {
        Self {
            auth,
            progress_token,
            peer,
        }
    }

    /// The value produced by the connection's authenticator, if any.
    pub fn session(&self) -> Option<&Value> {
        self.auth.as_ref()
    }

    /// Emits `notifications/progress` for this call. Without a progress token it does nothing.
    pub async fn report_progress(&self, progress: f64, total: Option<f64>) {
        let (Some(token), Some(peer)) = (self.progress_token.as_ref(), self.peer.as_ref()) else {
            return;
        };

        let params = ProgressNotificationParams {
            message: None,
            meta: None,
            progress,
            progress_token: token.clone(),
            total,
        };
        if let Err(err) = peer.notify(methods::NOTIFICATION_PROGRESS, &params).await {
            warn!(error = %err, "failed to send progress notification");
        }
    }

    pub fn log(&self) -> ToolLogger {
        ToolLogger {
            peer: self.peer.clone(),
        }
    }
}

/// Sends `notifications/message` to the client at one of four levels.
#[derive(Clone)]
pub struct ToolLogger {
    peer: Option<Peer>,
}

impl ToolLogger {
    pub async fn debug(&self, message: &str, context: Option<Value>) {
        self.emit(LoggingLevel::Debug, message, context).await;
    }

    pub async fn info(&self, message: &str, context: Option<Value>) {
        self.emit(LoggingLevel::Info, message, context).await;
    }

    pub async fn warn(&self, message: &str, context: Option<Value>) {
        self.emit(LoggingLevel::Warning, message, context).await;
    }

    pub async fn error(&self, message: &str, context: Option<Value>) {
        self.emit(LoggingLevel::Error, message, context).await;
    }

    async fn emit(&self, level: LoggingLevel, message: &str, context: Option<Value>) {
        let Some(peer) = self.peer.as_ref() else {
            return;
        };

        let params = LoggingMessageNotificationParams {
            data: json!({
                "message": message,
                "context": context,
            }),
            level,
            logger: None,
            meta: None,
        };
        if let Err(err) = peer.notify(methods::NOTIFICATION_MESSAGE, &params).await {
            warn!(error = %err, level = %level, "failed to send logging notification");
        }
    }
}

pub fn build_tools_list(registry: &Registry) -> Value {
    let tools = registry
        .tools()
        .iter()
        .map(Tool::descriptor)
        .collect::<Vec<_>>();
    serde_json::to_value(ListToolsResult {
        meta: None,
        next_cursor: None,
        tools,
    })
    .expect("tools list serialization")
}

pub async fn handle_tools_call(
    registry: &Registry,
    ctx: &RequestContext,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    let call: CallToolRequestParams = parse_params(params)?;

    let tool = registry.tool(&call.name).ok_or_else(|| {
        McpError::method_not_found(format!("Unknown tool: {}", call.name))
            .with_data(json!({ "name": call.name }))
    })?;

    let args = Value::Object(call.arguments.unwrap_or_else(Map::new));
    if let Err(errors) = tool.validate_arguments(&args) {
        return Err(McpError::invalid_params(format!(
            "Invalid {} parameters: {}",
            tool.name,
            errors.join("; ")
        ))
        .with_data(json!({ "tool": tool.name, "errors": errors }))
        .into());
    }

    let tool_ctx = ToolContext::new(
        ctx.auth.clone(),
        call.meta.and_then(|meta| meta.progress_token),
        ctx.peer.clone(),
    );

    let outcome = AssertUnwindSafe(tool.handler.execute(args, tool_ctx))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(output)) => match normalize(output) {
            Ok(result) => result,
            Err(err) => {
                warn!(tool = %tool.name, error = %err, "tool returned an unusable result");
                error_result(format!("Error: tool `{}` returned an empty result", tool.name))
            }
        },
        Ok(Err(HandlerError::User(message))) => {
            info!(tool = %tool.name, error = %message, "tool reported a user-facing error");
            error_result(message)
        }
        Ok(Err(HandlerError::Failed(value))) => {
            warn!(tool = %tool.name, error = %value, "tool execution failed");
            error_result(format!("Error: {value}"))
        }
        Err(_) => {
            warn!(tool = %tool.name, "tool execution panicked");
            error_result(format!("Error: tool `{}` panicked", tool.name))
        }
    };

    Ok(serde_json::to_value(result).expect("tool result serialization"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::errors::ErrorCode;

    fn registry_with(tools: Vec<Tool>) -> Registry {
        let mut registry = Registry::default();
        for tool in tools {
            registry.add_tool(tool).expect("register tool");
        }
        registry
    }

    fn protocol_code(err: DispatchError) -> ErrorCode {
        match err {
            DispatchError::Protocol(err) => err.code,
            DispatchError::UnexpectedState(err) => panic!("unexpected state: {err}"),
        }
    }

    #[tokio::test]
    async fn echo_tool_returns_text_envelope() {
        let registry = registry_with(vec![Tool::new("echo", |_args: Value, _ctx: ToolContext| async {
            Ok::<_, HandlerError>(ToolOutput::from("hi"))
        })]);

        let result = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "echo", "arguments": {}})),
        )
        .await
        .expect("call succeeds");

        assert_eq!(result, json!({"content": [{"type": "text", "text": "hi"}]}));
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found_and_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = registry_with(vec![Tool::new(
            "echo",
            move |_args: Value, _ctx: ToolContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, HandlerError>(ToolOutput::from("hi")) }
            },
        )]);

        let err = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "nope"})),
        )
        .await
        .expect_err("unknown tool");

        assert_eq!(protocol_code(err), ErrorCode::MethodNotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_params_and_runs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = registry_with(vec![Tool::new(
            "fetch",
            move |_args: Value, _ctx: ToolContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, HandlerError>(ToolOutput::from("ok")) }
            },
        )
        .parameters(json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        }))]);

        let err = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "fetch", "arguments": {"url": 5}})),
        )
        .await
        .expect_err("invalid arguments");

        match err {
            DispatchError::Protocol(err) => {
                assert_eq!(err.code, ErrorCode::InvalidParams);
                assert!(err.message.contains("fetch"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn user_error_is_shown_verbatim() {
        let registry = registry_with(vec![Tool::new(
            "fetch",
            |_args: Value, _ctx: ToolContext| async {
                Err::<ToolOutput, _>(HandlerError::user("bad url"))
            },
        )]);

        let result = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "fetch"})),
        )
        .await
        .expect("protocol success");

        assert_eq!(
            result,
            json!({"content": [{"type": "text", "text": "bad url"}], "isError": true})
        );
    }

    #[tokio::test]
    async fn other_failures_get_generic_prefix() {
        let registry = registry_with(vec![Tool::new(
            "explode",
            |_args: Value, _ctx: ToolContext| async {
                Err::<ToolOutput, _>(HandlerError::failed(42))
            },
        )]);

        let result = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "explode"})),
        )
        .await
        .expect("protocol success");

        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Error: 42");
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_result() {
        let registry = registry_with(vec![Tool::new(
            "panics",
            |_args: Value, _ctx: ToolContext| async {
                if true {
                    panic!("boom");
                }
                Ok::<_, HandlerError>(ToolOutput::from("unreachable"))
            },
        )]);

        let result = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "panics"})),
        )
        .await
        .expect("protocol success");

        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn structured_envelope_passes_through() {
        let registry = registry_with(vec![Tool::new(
            "multi",
            |_args: Value, _ctx: ToolContext| async {
                Ok::<_, HandlerError>(ToolOutput::from(CallToolResult::from_content(vec![
                    ContentBlock::text_content("a".to_string()),
                    ContentBlock::image_content("aGk=".to_string(), "image/png".to_string()),
                ])))
            },
        )]);

        let result = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "multi"})),
        )
        .await
        .expect("call succeeds");

        assert_eq!(result["content"].as_array().map(Vec::len), Some(2));
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn empty_envelope_becomes_error_result() {
        let registry = registry_with(vec![Tool::new(
            "silent",
            |_args: Value, _ctx: ToolContext| async {
                Ok::<_, HandlerError>(ToolOutput::from(CallToolResult::from_content(Vec::new())))
            },
        )]);

        let result = handle_tools_call(
            &registry,
            &RequestContext::detached(),
            Some(json!({"name": "silent"})),
        )
        .await
        .expect("protocol success");

        assert_eq!(
            result,
            json!({
                "content": [{"type": "text", "text": "Error: tool `silent` returned an empty result"}],
                "isError": true
            })
        );
    }

    #[test]
    fn tools_list_preserves_registration_order_and_default_schema() {
        let registry = registry_with(vec![
            Tool::new("b_tool", |_args: Value, _ctx: ToolContext| async {
                Ok::<_, HandlerError>(ToolOutput::from(""))
            }),
            Tool::new("a_tool", |_args: Value, _ctx: ToolContext| async {
                Ok::<_, HandlerError>(ToolOutput::from(""))
            })
            .description("second")
            .parameters(json!({
                "type": "object",
                "properties": {"x": {"type": "integer"}},
                "required": ["x"]
            })),
        ]);

        let list = build_tools_list(&registry);
        assert_eq!(list["tools"][0]["name"], "b_tool");
        assert_eq!(list["tools"][0]["inputSchema"], json!({"type": "object"}));
        assert_eq!(list["tools"][1]["name"], "a_tool");
        assert_eq!(list["tools"][1]["description"], "second");
        assert_eq!(
            list["tools"][1]["inputSchema"]["properties"]["x"]["type"],
            "integer"
        );
        assert_eq!(list["tools"][1]["inputSchema"]["required"], json!(["x"]));
        assert_eq!(list["tools"][1]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn progress_and_log_notifications_reach_the_peer() {
        use crate::transport::{MemoryTransport, Transport};
        use std::time::Duration;

        let (client, server) = MemoryTransport::pair();
        let peer = Peer::new(Arc::new(server), Duration::from_secs(5));
        let registry = registry_with(vec![Tool::new(
            "work",
            |_args: Value, ctx: ToolContext| async move {
                ctx.report_progress(1.0, Some(2.0)).await;
                ctx.log().warn("halfway", Some(json!({"step": 1}))).await;
                Ok::<_, HandlerError>(ToolOutput::from("done"))
            },
        )]);
        let ctx = RequestContext {
            auth: None,
            peer: Some(peer),
        };

        handle_tools_call(
            &registry,
            &ctx,
            Some(json!({"name": "work", "_meta": {"progressToken": "tok-1"}})),
        )
        .await
        .expect("call succeeds");

        let progress = client.recv().await.expect("recv").expect("progress");
        assert_eq!(progress["method"], "notifications/progress");
        assert_eq!(
            progress["params"],
            json!({"progressToken": "tok-1", "progress": 1.0, "total": 2.0})
        );

        let log = client.recv().await.expect("recv").expect("log");
        assert_eq!(log["method"], "notifications/message");
        assert_eq!(log["params"]["level"], "warning");
        assert_eq!(log["params"]["data"]["message"], "halfway");
        assert_eq!(log["params"]["data"]["context"]["step"], 1);
    }

    #[tokio::test]
    async fn progress_without_token_sends_nothing() {
        use crate::transport::{MemoryTransport, Transport};
        use std::time::Duration;

        let (client, server) = MemoryTransport::pair();
        let ctx = ToolContext::new(
            None,
            None,
            Some(Peer::new(Arc::new(server), Duration::from_secs(5))),
        );
        ctx.report_progress(0.5, None).await;
        client.close().await.expect("close");

        assert!(client.recv().await.expect("recv").is_none());
    }
}
