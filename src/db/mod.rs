//! Database backends.
//!
//! - `relational`: PostgreSQL, one pool per database in a registry
//! - `keyvalue`: Redis
//! - `document`: MongoDB
//! - `timeseries`: InfluxDB v2 over HTTP
//!
//! Every backend implements [`BackendAdapter`] for connect, disconnect and
//! health probing.

pub mod adapter;
pub mod bson_json;
pub mod document;
pub mod flux;
pub mod keyvalue;
pub mod registry;
pub mod relational;
pub mod timeseries;
pub mod types;

pub use adapter::{BackendAdapter, ClientHandle};
pub use document::MongoBackend;
pub use keyvalue::RedisBackend;
pub use registry::{SiblingReport, SqlConnection, SqlConnector, SqlRegistry};
pub use relational::{PgConnector, PostgresBackend};
pub use timeseries::InfluxBackend;
