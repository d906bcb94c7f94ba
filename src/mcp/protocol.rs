//! Method names and protocol versions the engine speaks
//!
//! Payload shapes come from `rust_mcp_sdk::schema`; this module only names the methods that
//! the router matches on and decides which protocol revision a session runs.

use rust_mcp_sdk::schema::{ClientCapabilities, ProtocolVersion};

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCE_TEMPLATES_LIST: &str = "resources/templates/list";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const COMPLETION_COMPLETE: &str = "completion/complete";
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
    pub const ROOTS_LIST: &str = "roots/list";

    pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
    pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
    pub const NOTIFICATION_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
    pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";
    pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
}

/// Stable revisions a client may pick, oldest first. Draft revisions are never offered.
pub fn supported_protocol_versions() -> Vec<ProtocolVersion> {
    ProtocolVersion::supported_versions(false)
}

/// Maps an offered revision onto one we speak, answering unknown ones with the latest.
pub fn resolve_protocol_version(offered: &str) -> (ProtocolVersion, bool) {
    match ProtocolVersion::try_from(offered) {
        Ok(ProtocolVersion::Draft) | Err(_) => (ProtocolVersion::latest(), false),
        Ok(version) => (version, true),
    }
}

pub fn supports_roots_list_changed(capabilities: &ClientCapabilities) -> bool {
    capabilities
        .roots
        .as_ref()
        .and_then(|roots| roots.list_changed)
        .unwrap_or(false)
}
