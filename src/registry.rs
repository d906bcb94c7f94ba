//! Registered tools, resources, resource templates and prompts
//!
//! Collections keep registration order. That order drives list responses and template
//! matching, so they are plain vectors rather than maps.

use thiserror::Error;
use tracing::debug;

use crate::domain::{
    prompts::Prompt,
    resources::{Resource, ResourceTemplate},
    tools::Tool,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} `{key}` is already registered")]
    Duplicate { kind: &'static str, key: String },
    #[error("tool `{tool}` declares an invalid parameter schema: {message}")]
    InvalidSchema { tool: String, message: String },
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: Vec<Prompt>,
}

impl Registry {
    pub fn add_tool(&mut self, mut tool: Tool) -> Result<(), RegistryError> {
        if self.tool(&tool.name).is_some() {
            return Err(duplicate("tool", &tool.name));
        }
        tool.compile_schema()
            .map_err(|message| RegistryError::InvalidSchema {
                tool: tool.name.clone(),
                message,
            })?;

        debug!(tool = %tool.name, "registered tool");
        self.tools.push(tool);
        Ok(())
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<(), RegistryError> {
        if self.resource(&resource.uri).is_some() {
            return Err(duplicate("resource", &resource.uri));
        }

        debug!(uri = %resource.uri, "registered resource");
        self.resources.push(resource);
        Ok(())
    }

    pub fn add_resource_template(&mut self, template: ResourceTemplate) -> Result<(), RegistryError> {
        if self.resource_template(template.uri_template()).is_some() {
            return Err(duplicate("resource template", template.uri_template()));
        }

        debug!(uri_template = %template.uri_template(), "registered resource template");
        self.resource_templates.push(template);
        Ok(())
    }

    pub fn add_prompt(&mut self, prompt: Prompt) -> Result<(), RegistryError> {
        if self.prompt(&prompt.name).is_some() {
            return Err(duplicate("prompt", &prompt.name));
        }

        debug!(prompt = %prompt.name, "registered prompt");
        self.prompts.push(prompt);
        Ok(())
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, uri: &str) -> Option<&Resource> {
        self.resources.iter().find(|resource| resource.uri == uri)
    }

    pub fn resource_templates(&self) -> &[ResourceTemplate] {
        &self.resource_templates
    }

    pub fn resource_template(&self, uri_template: &str) -> Option<&ResourceTemplate> {
        self.resource_templates
            .iter()
            .find(|template| template.uri_template() == uri_template)
    }

    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn prompt(&self, name: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|prompt| prompt.name == name)
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty() || !self.resource_templates.is_empty()
    }

    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }
}

fn duplicate(kind: &'static str, key: &str) -> RegistryError {
    RegistryError::Duplicate {
        kind,
        key: key.to_string(),
    }
}
