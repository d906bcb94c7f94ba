//! HTTP Transport layer for the Model Context Protocol
//!
//! Provides the external API routing: the SSE session stream, the message endpoint that feeds
//! it, and the health and discovery endpoints.

pub mod handlers;
