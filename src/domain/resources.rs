//! Static resources and resource templates, and the `resources/*` handlers
//!
//! Reads resolve by exact URI first and only then fall through to templates, scanned in
//! registration order.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    BlobResourceContents, CompleteResultCompletion, ListResourceTemplatesResult,
    ListResourcesResult, ReadResourceContent, ReadResourceRequestParams, ReadResourceResult,
    Resource as ResourceDescriptor, ResourceTemplate as ResourceTemplateDescriptor,
    TextResourceContents,
};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::{
    domain::{
        completion::{complete_argument, Argument},
        uri_template::{match_first, UriTemplate, UriTemplateError},
    },
    errors::{DispatchError, HandlerError, McpError},
    mcp::server::parse_params,
    registry::Registry,
};

/// One loaded entry: inline text or base64-encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceContent {
    Text(String),
    Blob(String),
}

impl ResourceContent {
    fn into_wire(
        self,
        uri: &str,
        mime_type: Option<String>,
        meta: Map<String, Value>,
    ) -> ReadResourceContent {
        match self {
            Self::Text(text) => TextResourceContents {
                meta: Some(meta),
                mime_type,
                text,
                uri: uri.to_string(),
            }
            .into(),
            Self::Blob(blob) => BlobResourceContents {
                blob,
                meta: Some(meta),
                mime_type,
                uri: uri.to_string(),
            }
            .into(),
        }
    }
}

/// Everything a single `load` produced, e.g. one entry per file of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceOutput(pub Vec<ResourceContent>);

impl From<ResourceContent> for ResourceOutput {
    fn from(content: ResourceContent) -> Self {
        Self(vec![content])
    }
}

impl From<Vec<ResourceContent>> for ResourceOutput {
    fn from(contents: Vec<ResourceContent>) -> Self {
        Self(contents)
    }
}

impl From<String> for ResourceOutput {
    fn from(text: String) -> Self {
        ResourceContent::Text(text).into()
    }
}

impl From<&str> for ResourceOutput {
    fn from(text: &str) -> Self {
        ResourceContent::Text(text.to_string()).into()
    }
}

#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self) -> Result<ResourceOutput, HandlerError>;
}

#[async_trait]
impl<F, Fut> ResourceLoader for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceOutput, HandlerError>> + Send + 'static,
{
    async fn load(&self) -> Result<ResourceOutput, HandlerError> {
        (self)().await
    }
}

#[async_trait]
pub trait TemplateLoader: Send + Sync {
    async fn load(&self, args: HashMap<String, String>) -> Result<ResourceOutput, HandlerError>;
}

#[async_trait]
impl<F, Fut> TemplateLoader for F
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceOutput, HandlerError>> + Send + 'static,
{
    async fn load(&self, args: HashMap<String, String>) -> Result<ResourceOutput, HandlerError> {
        (self)(args).await
    }
}

#[derive(Clone)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub arguments: Vec<Argument>,
    loader: Arc<dyn ResourceLoader>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

impl Resource {
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        loader: impl ResourceLoader + 'static,
    ) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            arguments: Vec::new(),
            loader: Arc::new(loader),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Attaches completable arguments, making the resource a `ref/resource` completion target.
    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            annotations: None,
            description: self.description.clone(),
            icons: Vec::new(),
            meta: None,
            mime_type: self.mime_type.clone(),
            name: self.name.clone(),
            size: None,
            title: None,
            uri: self.uri.clone(),
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

#[derive(Clone)]
pub struct ResourceTemplate {
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub arguments: Vec<Argument>,
    template: UriTemplate,
    loader: Arc<dyn TemplateLoader>,
}

impl fmt::Debug for ResourceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTemplate")
            .field("uri_template", &self.template.as_str())
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl ResourceTemplate {
    pub fn new(
        uri_template: &str,
        name: impl Into<String>,
        loader: impl TemplateLoader + 'static,
    ) -> Result<Self, UriTemplateError> {
        Ok(Self {
            name: name.into(),
            description: None,
            mime_type: None,
            arguments: Vec::new(),
            template: UriTemplate::parse(uri_template)?,
            loader: Arc::new(loader),
        })
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn uri_template(&self) -> &str {
        self.template.as_str()
    }

    pub fn template(&self) -> &UriTemplate {
        &self.template
    }

    pub fn descriptor(&self) -> ResourceTemplateDescriptor {
        ResourceTemplateDescriptor {
            annotations: None,
            description: self.description.clone(),
            icons: Vec::new(),
            meta: None,
            mime_type: self.mime_type.clone(),
            name: self.name.clone(),
            title: None,
            uri_template: self.template.as_str().to_string(),
        }
    }

    /// The single completion entry point synthesized from the per-argument completers.
    pub async fn complete(
        &self,
        name: &str,
        value: &str,
    ) -> Result<CompleteResultCompletion, HandlerError> {
        complete_argument(&self.arguments, name, value).await
    }
}

pub fn build_resources_list(registry: &Registry) -> Value {
    let resources = registry
        .resources()
        .iter()
        .map(Resource::descriptor)
        .collect::<Vec<_>>();
    serde_json::to_value(ListResourcesResult {
        meta: None,
        next_cursor: None,
        resources,
    })
    .expect("resources list serialization")
}

pub fn build_resource_templates_list(registry: &Registry) -> Value {
    let templates = registry
        .resource_templates()
        .iter()
        .map(ResourceTemplate::descriptor)
        .collect::<Vec<_>>();
    serde_json::to_value(ListResourceTemplatesResult {
        meta: None,
        next_cursor: None,
        resource_templates: templates,
    })
    .expect("resource templates list serialization")
}

pub async fn handle_resources_read(
    registry: &Registry,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    let read: ReadResourceRequestParams = parse_params(params)?;
    let uri = read.uri;

    let contents = if let Some(resource) = registry.resource(&uri) {
        let output = resource
            .loader
            .load()
            .await
            .map_err(|err| read_failure(&uri, err))?;
        stamp(output, &resource.uri, &resource.name, resource.mime_type.as_deref())
    } else if let Some((template, args)) = match_first(
        registry.resource_templates(),
        ResourceTemplate::template,
        &uri,
    ) {
        let output = template
            .loader
            .load(args)
            .await
            .map_err(|err| read_failure(&uri, err))?;
        stamp(output, &uri, &template.name, template.mime_type.as_deref())
    } else {
        return Err(McpError::method_not_found(format!("Unknown resource: {uri}"))
            .with_data(json!({ "uri": uri }))
            .into());
    };

    Ok(serde_json::to_value(ReadResourceResult {
        contents,
        meta: None,
    })
    .expect("read resource result serialization"))
}

/// Tags every loaded entry with the requested uri, the registered mime type, and the
/// registered name under `_meta.name`.
fn stamp(
    output: ResourceOutput,
    uri: &str,
    name: &str,
    mime_type: Option<&str>,
) -> Vec<ReadResourceContent> {
    let mut meta = Map::new();
    meta.insert("name".to_string(), Value::String(name.to_string()));

    output
        .0
        .into_iter()
        .map(|content| content.into_wire(uri, mime_type.map(str::to_string), meta.clone()))
        .collect()
}

fn read_failure(uri: &str, err: HandlerError) -> McpError {
    warn!(uri = %uri, error = %err, "resource load failed");
    McpError::internal(format!("Error reading resource {uri}: {err}")).with_data(json!({ "uri": uri }))
}
