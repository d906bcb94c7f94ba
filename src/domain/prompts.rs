//! Prompt templates and the `prompts/*` handlers

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CompleteResultCompletion, ContentBlock, GetPromptRequestParams, GetPromptResult,
    ListPromptsResult, Prompt as PromptDescriptor, PromptArgument, PromptMessage, Role,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    domain::completion::{complete_argument, Argument},
    errors::{DispatchError, HandlerError, McpError},
    mcp::server::parse_params,
    registry::Registry,
};

#[async_trait]
pub trait PromptLoader: Send + Sync {
    async fn load(&self, args: HashMap<String, String>) -> Result<String, HandlerError>;
}

#[async_trait]
impl<F, Fut> PromptLoader for F
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
{
    async fn load(&self, args: HashMap<String, String>) -> Result<String, HandlerError> {
        (self)(args).await
    }
}

#[derive(Clone)]
pub struct Prompt {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<Argument>,
    loader: Arc<dyn PromptLoader>,
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl Prompt {
    pub fn new(name: impl Into<String>, loader: impl PromptLoader + 'static) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            loader: Arc::new(loader),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn descriptor(&self) -> PromptDescriptor {
        PromptDescriptor {
            arguments: self
                .arguments
                .iter()
                .map(|argument| PromptArgument {
                    description: argument.description.clone(),
                    name: argument.name.clone(),
                    required: Some(argument.required),
                    title: None,
                })
                .collect(),
            description: self.description.clone(),
            icons: Vec::new(),
            meta: None,
            name: self.name.clone(),
            title: None,
        }
    }

    pub async fn complete(
        &self,
        name: &str,
        value: &str,
    ) -> Result<CompleteResultCompletion, HandlerError> {
        complete_argument(&self.arguments, name, value).await
    }
}

pub fn build_prompts_list(registry: &Registry) -> Value {
    let prompts = registry
        .prompts()
        .iter()
        .map(Prompt::descriptor)
        .collect::<Vec<_>>();
    serde_json::to_value(ListPromptsResult {
        meta: None,
        next_cursor: None,
        prompts,
    })
    .expect("prompts list serialization")
}

pub async fn handle_prompts_get(
    registry: &Registry,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    let get: GetPromptRequestParams = parse_params(params)?;

    let prompt = registry.prompt(&get.name).ok_or_else(|| {
        McpError::method_not_found(format!("Unknown prompt: {}", get.name))
            .with_data(json!({ "name": get.name }))
    })?;

    let args = get.arguments.unwrap_or_default();
    if let Some(missing) = prompt
        .arguments
        .iter()
        .find(|argument| argument.required && !args.contains_key(&argument.name))
    {
        return Err(McpError::invalid_request(format!(
            "Missing required argument: {}",
            missing.name
        ))
        .with_data(json!({ "prompt": prompt.name, "argument": missing.name }))
        .into());
    }

    let text = prompt.loader.load(args).await.map_err(|err| {
        warn!(prompt = %prompt.name, error = %err, "prompt load failed");
        McpError::internal(format!("Error loading prompt {}: {err}", prompt.name))
            .with_data(json!({ "name": prompt.name }))
    })?;

    let result = GetPromptResult {
        description: prompt.description.clone(),
        messages: vec![PromptMessage {
            content: ContentBlock::text_content(text),
            role: Role::User,
        }],
        meta: None,
    };

    Ok(serde_json::to_value(result).expect("get prompt result serialization"))
}
