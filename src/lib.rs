//! AWS IoT TwinMaker connectors backed by Snowflake.
//!
//! Each Lambda binary under `src/bin` wires one connector:
//!
//! * `data_reader_by_entity`: UDQ time-series reader for one entity component
//! * `data_reader_by_component_type`: UDQ alarm reader across entities
//! * `attribute_property_value_reader_by_entity`: static attribute values
//! * `schema_initializer_entity`: property definitions of an entity
//! * `data_writer`: UDW bulk writer

pub mod config;
pub mod error;
pub mod reader;
pub mod request;
pub mod response;
pub mod schema;
pub mod snowflake;
pub mod timestamp;
pub mod token;
pub mod value;
pub mod writer;

pub use config::ConnectorConfig;
pub use error::{ConnectorError, Result};
pub use request::QueryRequest;
pub use snowflake::{SnowflakeClient, SqlExecutor};

use tracing_subscriber::EnvFilter;

/// Plain log lines for CloudWatch, which stamps the time itself.
/// `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();
}
