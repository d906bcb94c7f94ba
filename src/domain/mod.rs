//! Registrable entities and the request handlers that serve them
//!
//! Tools, resources, resource templates and prompts, plus the URI template matcher, the
//! completion resolver and the tool result normalizer they rely on.

pub mod completion;
pub mod content;
pub mod prompts;
pub mod resources;
pub mod tools;
pub mod uri_template;

use serde_json::Value;

use crate::session::Peer;

/// What a handler may know about the session a request arrived on.
#[derive(Clone, Default)]
pub struct RequestContext {
    pub auth: Option<Value>,
    pub peer: Option<Peer>,
}

impl RequestContext {
    /// A context with no authentication and nobody to notify.
    pub fn detached() -> Self {
        Self::default()
    }
}
