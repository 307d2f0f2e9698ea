//! MCP tool handlers.
//!
//! - `dispatch`: the shared call/envelope convention
//! - `postgres`, `redis`, `mongodb`, `influxdb`: typed inputs and one handler
//!   per backend, each method running a single backend operation

pub mod dispatch;
pub mod influxdb;
pub mod mongodb;
pub mod postgres;
pub mod redis;

pub use dispatch::{Call, dispatch, dispatch_with};
pub use self::influxdb::InfluxTools;
pub use self::mongodb::MongoTools;
pub use self::postgres::PostgresTools;
pub use self::redis::RedisTools;
