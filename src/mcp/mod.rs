//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides the wire payload types, JSON-RPC envelope formatting, and the request router that
//! decodes, negotiates and dispatches every inbound message.

pub mod protocol;
pub mod rpc;
pub mod server;
