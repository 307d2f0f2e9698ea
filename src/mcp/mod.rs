//! MCP server integration module.
//!
//! Glues the tool handlers and resources to the protocol using the rmcp
//! framework.

pub mod service;

pub use service::{McpService, SERVER_NAME};
