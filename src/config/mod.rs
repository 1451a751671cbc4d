//! Connector configuration generators.
//!
//! Build the source (capture) and sink (delivery) connector configurations
//! for a pipeline. Configurations are strongly-typed per-family structs that
//! serialize to the runtime's flat string map at the boundary, so a
//! misspelled key or a duplicated schema filter cannot survive compilation.

mod sink;
mod source;

pub use sink::{generate_sink_config, DeliveryShape, GeneratedSink};
pub use source::{
    generate_source_config, snapshot_mode, topic_name, GeneratedSource, SnapshotMode,
};

use crate::error::EngineError;
use connect_client::ConnectorConfig;
use serde::Serialize;

/// Serialize a typed connector config into the runtime's wire format.
fn to_wire<T: Serialize>(config: &T) -> Result<ConnectorConfig, EngineError> {
    let value = serde_json::to_value(config)
        .map_err(|e| EngineError::Configuration(format!("failed to serialize config: {e}")))?;

    match value {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                serde_json::Value::Null => None,
                other => Some((key, other.to_string())),
            })
            .collect()),
        _ => Err(EngineError::Configuration(
            "connector config did not serialize to a map".to_string(),
        )),
    }
}
