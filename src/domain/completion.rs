//! Argument completion for prompts and resource templates
//!
//! An argument either carries its own [`Completer`], or declares a closed set of enum values
//! that get typo-tolerant matching for free. Anything else completes to nothing.

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CompleteRequestParams, CompleteRequestRef, CompleteResult, CompleteResultCompletion,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    errors::{DispatchError, HandlerError, McpError, UnexpectedStateError},
    mcp::server::parse_params,
    registry::Registry,
};

pub const MAX_COMPLETION_VALUES: usize = 100;

/// Minimum closeness for a fuzzy match to be suggested.
const FUZZY_THRESHOLD: f64 = 0.6;

#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, value: String) -> Result<CompleteResultCompletion, HandlerError>;
}

#[async_trait]
impl<F, Fut> Completer for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CompleteResultCompletion, HandlerError>> + Send + 'static,
{
    async fn complete(&self, value: String) -> Result<CompleteResultCompletion, HandlerError> {
        (self)(value).await
    }
}

/// A named argument of a prompt or resource template.
#[derive(Clone)]
pub struct Argument {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
    pub enum_values: Option<Vec<String>>,
    pub completer: Option<Arc<dyn Completer>>,
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Argument")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("required", &self.required)
            .field("enum_values", &self.enum_values)
            .field("completer", &self.completer.is_some())
            .finish()
    }
}

impl Argument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
            enum_values: None,
            completer: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn completer(mut self, completer: impl Completer + 'static) -> Self {
        self.completer = Some(Arc::new(completer));
        self
    }

    pub fn has_completion(&self) -> bool {
        self.completer.is_some() || self.enum_values.is_some()
    }
}

pub fn arguments_support_completion(arguments: &[Argument]) -> bool {
    arguments.iter().any(Argument::has_completion)
}

/// Resolves a completion for `name` by explicit completer, then enum values, then nothing.
pub async fn complete_argument(
    arguments: &[Argument],
    name: &str,
    value: &str,
) -> Result<CompleteResultCompletion, HandlerError> {
    let Some(argument) = arguments.iter().find(|argument| argument.name == name) else {
        return Ok(empty_completion());
    };

    let completion = if let Some(completer) = argument.completer.as_ref() {
        completer.complete(value.to_string()).await?
    } else if let Some(values) = argument.enum_values.as_deref() {
        fuzzy_complete(values, value)
    } else {
        empty_completion()
    };

    Ok(cap_completion(completion))
}

pub fn empty_completion() -> CompleteResultCompletion {
    CompleteResultCompletion {
        has_more: None,
        total: None,
        values: Vec::new(),
    }
}

/// Enforces the 100-value ceiling, flagging truncated results with `hasMore`.
pub fn cap_completion(mut completion: CompleteResultCompletion) -> CompleteResultCompletion {
    if completion.values.len() > MAX_COMPLETION_VALUES {
        let available = completion.values.len() as i64;
        completion.values.truncate(MAX_COMPLETION_VALUES);
        completion.total = Some(completion.total.unwrap_or(available).max(available));
        completion.has_more = Some(true);
    }
    completion
}

pub fn fuzzy_complete(candidates: &[String], partial: &str) -> CompleteResultCompletion {
    if partial.trim().is_empty() {
        return CompleteResultCompletion {
            has_more: None,
            total: Some(candidates.len() as i64),
            values: candidates.to_vec(),
        };
    }

    let mut scored = candidates
        .iter()
        .filter_map(|candidate| closeness(candidate, partial).map(|score| (score, candidate)))
        .collect::<Vec<_>>();
    scored.sort_by(|left, right| right.0.total_cmp(&left.0));

    let values = scored
        .into_iter()
        .map(|(_, candidate)| candidate.clone())
        .collect::<Vec<_>>();

    CompleteResultCompletion {
        has_more: None,
        total: Some(values.len() as i64),
        values,
    }
}

fn closeness(candidate: &str, partial: &str) -> Option<f64> {
    let candidate = candidate.to_lowercase();
    let partial = partial.trim().to_lowercase();

    if candidate == partial {
        return Some(1.0);
    }
    if candidate.starts_with(&partial) {
        return Some(0.9);
    }
    if candidate.contains(&partial) {
        return Some(0.8);
    }

    // Typo tolerance: compare against the candidate's prefix of the same length as well as
    // the whole candidate, keeping whichever is closer.
    let partial_len = partial.chars().count();
    let prefix = candidate.chars().take(partial_len).collect::<String>();
    let prefix_similarity = similarity(&prefix, &partial);
    let whole_similarity = similarity(&candidate, &partial);
    let best = prefix_similarity.max(whole_similarity);

    (best >= FUZZY_THRESHOLD).then_some(best * 0.75)
}

fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein_distance(a, b) as f64;
    (1.0 - distance / max_len as f64).max(0.0)
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars = a.chars().collect::<Vec<_>>();
    let b_chars = b.chars().collect::<Vec<_>>();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous = (0..=b_chars.len()).collect::<Vec<_>>();
    let mut current = vec![0usize; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

/// Serves `completion/complete` for a prompt or a resource (template) reference.
pub async fn handle_completion_complete(
    registry: &Registry,
    params: Option<Value>,
) -> Result<Value, DispatchError> {
    let request: CompleteRequestParams = parse_params(params)?;
    let argument = &request.argument;

    let completion = match &request.ref_ {
        CompleteRequestRef::PromptReference(reference) => {
            let name = &reference.name;
            let prompt = registry.prompt(name).ok_or_else(|| {
                UnexpectedStateError::new("Unknown prompt").with_extras(json!({ "name": name }))
            })?;
            if !arguments_support_completion(&prompt.arguments) {
                return Err(UnexpectedStateError::new("Prompt does not support completion")
                    .with_extras(json!({ "name": name }))
                    .into());
            }
            prompt.complete(&argument.name, &argument.value).await
        }
        CompleteRequestRef::ResourceTemplateReference(reference) => {
            let uri = &reference.uri;
            if let Some(template) = registry.resource_template(uri) {
                if !arguments_support_completion(&template.arguments) {
                    return Err(UnexpectedStateError::new(
                        "Resource template does not support completion",
                    )
                    .with_extras(json!({ "uri": uri }))
                    .into());
                }
                template.complete(&argument.name, &argument.value).await
            } else if let Some(resource) = registry.resource(uri) {
                if !arguments_support_completion(&resource.arguments) {
                    return Err(UnexpectedStateError::new("Resource does not support completion")
                        .with_extras(json!({ "uri": uri }))
                        .into());
                }
                resource.complete(&argument.name, &argument.value).await
            } else {
                return Err(UnexpectedStateError::new("Unknown resource")
                    .with_extras(json!({ "uri": uri }))
                    .into());
            }
        }
    };

    let completion = completion.map_err(|err| {
        warn!(argument = %argument.name, error = %err, "completion failed");
        McpError::internal(format!("Error completing argument {}: {err}", argument.name))
    })?;

    Ok(serde_json::to_value(CompleteResult {
        completion: cap_completion(completion),
        meta: None,
    })
    .expect("completion result serialization"))
}
