//! Sink (delivery) connector configuration.
//!
//! One generator per target family. The delivery shape differs:
//!
//! - SQL Server receives flattened rows. The change envelope is unwrapped
//!   with `ExtractNewRecordState`; deletes are kept by rewriting them into a
//!   row with a `__deleted` marker (tombstones are not dropped), because a
//!   naive unwrap loses delete information entirely.
//! - S3 and Snowflake receive the full change envelope unmodified and
//!   interpret it downstream.
//!
//! The `topics` field and (for Snowflake) the topic-to-table map are built
//! from the pipeline's stored topic list, verbatim. Re-deriving those names
//! from schema/table configuration strings is how case mismatches happen:
//! the sink subscribes to a lower-cased name the source never produces and
//! sits idle with zero errors.

use super::to_wire;
use crate::error::EngineError;
use crate::pipeline::{Connection, Pipeline, TargetFamily};
use connect_client::ConnectorConfig;
use serde::Serialize;

/// How change events are handed to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryShape {
    /// Full change envelope: operation type plus before/after images
    Envelope,
    /// Only the flattened "after" image, with rewritten deletes
    Flattened,
}

impl DeliveryShape {
    pub fn for_target(family: TargetFamily) -> Self {
        match family {
            TargetFamily::Sqlserver => DeliveryShape::Flattened,
            TargetFamily::S3 | TargetFamily::Snowflake => DeliveryShape::Envelope,
        }
    }
}

/// Record-count flush threshold shared by the sink families.
const FLUSH_RECORD_COUNT: u32 = 5000;
/// Time-based flush threshold in seconds.
const FLUSH_INTERVAL_SECS: u32 = 120;

/// Output of the sink generator.
#[derive(Debug, Clone)]
pub struct GeneratedSink {
    pub connector_name: String,
    pub shape: DeliveryShape,
    pub config: ConnectorConfig,
}

/// Build the delivery connector configuration for a pipeline.
///
/// `pipeline.topics` must already hold the topic names the source generator
/// produced.
pub fn generate_sink_config(
    pipeline: &Pipeline,
    target: &Connection,
    auto_create: bool,
) -> Result<GeneratedSink, EngineError> {
    if pipeline.topics.is_empty() {
        return Err(EngineError::Configuration(format!(
            "pipeline '{}' has no generated topics; run the source generator first",
            pipeline.name
        )));
    }

    let family = target.target_family()?;
    let shape = DeliveryShape::for_target(family);
    let topics = pipeline.topics.join(",");

    let config = match family {
        TargetFamily::Sqlserver => {
            // Route topic -> table by stripping the pipeline prefix; the
            // table segment passes through with its original case
            let route_replacement = match &pipeline.target_schema {
                Some(schema) => format!("{schema}.$1"),
                None => "$1".to_string(),
            };
            to_wire(&JdbcSinkConfig {
                connector_class: "io.confluent.connect.jdbc.JdbcSinkConnector",
                topics,
                connection_url: format!(
                    "jdbc:sqlserver://{}:{};databaseName={}",
                    target.host, target.port, target.database
                ),
                connection_user: target.username.clone(),
                connection_password: target.secret.clone(),
                insert_mode: "upsert",
                pk_mode: "record_key",
                delete_enabled: "true",
                auto_create: bool_str(auto_create),
                auto_evolve: "false",
                batch_size: FLUSH_RECORD_COUNT.to_string(),
                transforms: "unwrap,route",
                unwrap_type: "io.debezium.transforms.ExtractNewRecordState",
                unwrap_drop_tombstones: "false",
                unwrap_delete_handling_mode: "rewrite",
                route_type: "org.apache.kafka.connect.transforms.RegexRouter",
                route_regex: format!("^{}\\.[^.]+\\.([^.]+)$", pipeline.name),
                route_replacement,
                key_converter: "org.apache.kafka.connect.json.JsonConverter",
                key_converter_schemas: "true",
                value_converter: "org.apache.kafka.connect.json.JsonConverter",
                value_converter_schemas: "true",
                tasks_max: "1",
            })?
        }
        TargetFamily::S3 => to_wire(&S3SinkConfig {
            connector_class: "io.confluent.connect.s3.S3SinkConnector",
            topics,
            bucket: target.database.clone(),
            region: target.require_option("region")?.to_string(),
            storage_class: "io.confluent.connect.s3.storage.S3Storage",
            format_class: "io.confluent.connect.s3.format.json.JsonFormat",
            flush_size: FLUSH_RECORD_COUNT.to_string(),
            rotate_interval_ms: (FLUSH_INTERVAL_SECS * 1000).to_string(),
            access_key_id: target.username.clone(),
            secret_access_key: target.secret.clone(),
            key_converter: "org.apache.kafka.connect.storage.StringConverter",
            value_converter: "org.apache.kafka.connect.json.JsonConverter",
            value_converter_schemas: "false",
            tasks_max: "1",
        })?,
        TargetFamily::Snowflake => {
            let schema = pipeline
                .target_schema
                .clone()
                .or_else(|| target.default_schema.clone())
                .ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "pipeline '{}' has no target schema and connection '{}' has no default schema",
                        pipeline.name, target.name
                    ))
                })?;

            // Table names derive from the stored topic strings so the map
            // matches what the source connector actually emits, including
            // upper-case schema/table segments
            let topic2table = pipeline
                .topics
                .iter()
                .map(|topic| format!("{}:{}", topic, table_from_topic(topic)))
                .collect::<Vec<_>>()
                .join(",");

            to_wire(&SnowflakeSinkConfig {
                connector_class: "com.snowflake.kafka.connector.SnowflakeSinkConnector",
                topics,
                url_name: format!("{}:{}", target.host, target.port),
                user_name: target.username.clone(),
                private_key: target.require_option("private_key")?.to_string(),
                private_key_passphrase: target
                    .option("private_key_passphrase")
                    .map(str::to_string),
                database_name: target.database.clone(),
                schema_name: schema,
                role_name: target.option("role").map(str::to_string),
                topic2table_map: topic2table,
                buffer_count_records: FLUSH_RECORD_COUNT.to_string(),
                buffer_flush_time: FLUSH_INTERVAL_SECS.to_string(),
                key_converter: "org.apache.kafka.connect.storage.StringConverter",
                value_converter: "com.snowflake.kafka.connector.records.SnowflakeJsonConverter",
                tasks_max: "1",
            })?
        }
    };

    Ok(GeneratedSink {
        connector_name: pipeline.derived_sink_connector_name(),
        shape,
        config,
    })
}

/// Table identifier for a topic, taken from the topic string itself.
///
/// Only characters invalid in a table identifier are replaced; case is
/// preserved.
fn table_from_topic(topic: &str) -> String {
    let segment = topic.rsplit('.').next().unwrap_or(topic);
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

#[derive(Debug, Serialize)]
struct JdbcSinkConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    topics: String,
    #[serde(rename = "connection.url")]
    connection_url: String,
    #[serde(rename = "connection.user")]
    connection_user: String,
    #[serde(rename = "connection.password")]
    connection_password: String,
    #[serde(rename = "insert.mode")]
    insert_mode: &'static str,
    #[serde(rename = "pk.mode")]
    pk_mode: &'static str,
    #[serde(rename = "delete.enabled")]
    delete_enabled: &'static str,
    #[serde(rename = "auto.create")]
    auto_create: &'static str,
    #[serde(rename = "auto.evolve")]
    auto_evolve: &'static str,
    #[serde(rename = "batch.size")]
    batch_size: String,
    transforms: &'static str,
    #[serde(rename = "transforms.unwrap.type")]
    unwrap_type: &'static str,
    #[serde(rename = "transforms.unwrap.drop.tombstones")]
    unwrap_drop_tombstones: &'static str,
    #[serde(rename = "transforms.unwrap.delete.handling.mode")]
    unwrap_delete_handling_mode: &'static str,
    #[serde(rename = "transforms.route.type")]
    route_type: &'static str,
    #[serde(rename = "transforms.route.regex")]
    route_regex: String,
    #[serde(rename = "transforms.route.replacement")]
    route_replacement: String,
    #[serde(rename = "key.converter")]
    key_converter: &'static str,
    #[serde(rename = "key.converter.schemas.enable")]
    key_converter_schemas: &'static str,
    #[serde(rename = "value.converter")]
    value_converter: &'static str,
    #[serde(rename = "value.converter.schemas.enable")]
    value_converter_schemas: &'static str,
    #[serde(rename = "tasks.max")]
    tasks_max: &'static str,
}

#[derive(Debug, Serialize)]
struct S3SinkConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    topics: String,
    #[serde(rename = "s3.bucket.name")]
    bucket: String,
    #[serde(rename = "s3.region")]
    region: String,
    #[serde(rename = "storage.class")]
    storage_class: &'static str,
    #[serde(rename = "format.class")]
    format_class: &'static str,
    #[serde(rename = "flush.size")]
    flush_size: String,
    #[serde(rename = "rotate.interval.ms")]
    rotate_interval_ms: String,
    #[serde(rename = "aws.access.key.id")]
    access_key_id: String,
    #[serde(rename = "aws.secret.access.key")]
    secret_access_key: String,
    #[serde(rename = "key.converter")]
    key_converter: &'static str,
    #[serde(rename = "value.converter")]
    value_converter: &'static str,
    #[serde(rename = "value.converter.schemas.enable")]
    value_converter_schemas: &'static str,
    #[serde(rename = "tasks.max")]
    tasks_max: &'static str,
}

#[derive(Debug, Serialize)]
struct SnowflakeSinkConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    topics: String,
    #[serde(rename = "snowflake.url.name")]
    url_name: String,
    #[serde(rename = "snowflake.user.name")]
    user_name: String,
    #[serde(rename = "snowflake.private.key")]
    private_key: String,
    #[serde(
        rename = "snowflake.private.key.passphrase",
        skip_serializing_if = "Option::is_none"
    )]
    private_key_passphrase: Option<String>,
    #[serde(rename = "snowflake.database.name")]
    database_name: String,
    #[serde(rename = "snowflake.schema.name")]
    schema_name: String,
    #[serde(rename = "snowflake.role.name", skip_serializing_if = "Option::is_none")]
    role_name: Option<String>,
    #[serde(rename = "snowflake.topic2table.map")]
    topic2table_map: String,
    #[serde(rename = "buffer.count.records")]
    buffer_count_records: String,
    #[serde(rename = "buffer.flush.time")]
    buffer_flush_time: String,
    #[serde(rename = "key.converter")]
    key_converter: &'static str,
    #[serde(rename = "value.converter")]
    value_converter: &'static str,
    #[serde(rename = "tasks.max")]
    tasks_max: &'static str,
}
