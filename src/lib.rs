//! Multi-database MCP server library.
//!
//! Exposes PostgreSQL, Redis, MongoDB and InfluxDB to MCP clients through
//! one set of tools and resources. Each backend can be switched off at
//! startup; a disabled backend is never constructed and contributes no tools.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod resources;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use context::AppContext;
pub use error::{DbError, DbResult};
pub use mcp::McpService;
