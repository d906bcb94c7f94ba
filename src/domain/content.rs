//! Tool result normalization
//!
//! Tool handlers may return a plain string, a single content block, or a full result
//! envelope. Everything leaves the engine as a [`CallToolResult`].

use rust_mcp_sdk::schema::{CallToolResult, ContentBlock};
use thiserror::Error;

/// The shapes a tool handler is allowed to return.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Content(ContentBlock),
    Result(CallToolResult),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("result envelope carries neither content nor structured content")]
    EmptyEnvelope,
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<ContentBlock> for ToolOutput {
    fn from(content: ContentBlock) -> Self {
        Self::Content(content)
    }
}

impl From<CallToolResult> for ToolOutput {
    fn from(result: CallToolResult) -> Self {
        Self::Result(result)
    }
}

/// Wraps bare text and single blocks; a prebuilt envelope is checked and returned as is.
///
/// An envelope must say something: at least one content block, or structured content.
pub fn normalize(output: ToolOutput) -> Result<CallToolResult, NormalizeError> {
    match output {
        ToolOutput::Text(text) => Ok(CallToolResult::from_content(vec![
            ContentBlock::text_content(text),
        ])),
        ToolOutput::Content(content) => Ok(CallToolResult::from_content(vec![content])),
        ToolOutput::Result(result) => {
            if result.content.is_empty() && result.structured_content.is_none() {
                return Err(NormalizeError::EmptyEnvelope);
            }
            Ok(result)
        }
    }
}
