//! Data models for the multi-database MCP server.
//!
//! This module re-exports all model types used throughout the application.

pub mod backend;
pub mod descriptor;
pub mod query;

pub use backend::{BackendKind, BackendStatus, CapabilityToggles, HealthReport};
pub use descriptor::{
    ConnectionSummary, InfluxDescriptor, MongoDescriptor, APPLICATION_NAME,
    PostgresDescriptor, RedisDescriptor,
};
pub use query::{ColumnInfo, ExecuteResult, JsonRow, QueryParam, SAMPLE_ROW_LIMIT};
