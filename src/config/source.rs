//! Source (capture) connector configuration.
//!
//! One generator per source family. All of them share three rules:
//!
//! - The table filter carries the schema (`schema.table`); no separate
//!   schema or database filter is ever emitted alongside it. Setting both
//!   makes the runtime duplicate the schema segment in topic names
//!   (`prefix.schema.schema.table`), which silently breaks the sink's
//!   topic-to-table mapping.
//! - Topic names are `{pipeline}.{schema}.{table}`, computed here exactly
//!   once; the sink generator and diagnostics reuse the stored values.
//! - Family-specific fields come from the connection's options map, and a
//!   missing required option is a configuration error raised before any
//!   runtime call.

use super::to_wire;
use crate::error::EngineError;
use crate::pipeline::{Connection, FullLoadStatus, Pipeline, SourceFamily};
use connect_client::ConnectorConfig;
use offset_types::CapturedOffset;
use serde::Serialize;

/// Snapshot behavior requested from the capture connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    /// Copy current table contents, then stream
    Initial,
    /// Stream from the stored position only; never re-copy
    Never,
}

impl SnapshotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotMode::Initial => "initial",
            SnapshotMode::Never => "never",
        }
    }
}

impl std::fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide the snapshot mode from the full-load outcome.
///
/// `never` if and only if the full load completed and its offset was
/// captured; in every other situation the connector must snapshot first,
/// because no complete copy exists to stream on top of.
pub fn snapshot_mode(
    full_load_status: FullLoadStatus,
    captured_offset: Option<&CapturedOffset>,
) -> SnapshotMode {
    match (full_load_status, captured_offset) {
        (FullLoadStatus::Completed, Some(_)) => SnapshotMode::Never,
        _ => SnapshotMode::Initial,
    }
}

/// Topic carrying one table's change events: `{pipeline}.{schema}.{table}`.
pub fn topic_name(pipeline_name: &str, schema: &str, table: &str) -> String {
    format!("{pipeline_name}.{schema}.{table}")
}

/// Output of the source generator.
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    pub connector_name: String,
    pub snapshot_mode: SnapshotMode,
    /// Topic names exactly as the connector will emit them
    pub topics: Vec<String>,
    pub config: ConnectorConfig,
}

/// Build the capture connector configuration for a pipeline.
pub fn generate_source_config(
    pipeline: &Pipeline,
    source: &Connection,
) -> Result<GeneratedSource, EngineError> {
    if pipeline.tables.is_empty() {
        return Err(EngineError::Configuration(format!(
            "pipeline '{}' has no tables configured",
            pipeline.name
        )));
    }

    let family = source.source_family()?;
    let mode = snapshot_mode(pipeline.full_load_status, pipeline.captured_offset.as_ref());

    // schema.table entries; the schema lives here and nowhere else
    let table_include_list = pipeline
        .tables
        .iter()
        .map(|t| format!("{}.{}", pipeline.source_schema, t))
        .collect::<Vec<_>>()
        .join(",");

    let topics = pipeline
        .tables
        .iter()
        .map(|t| topic_name(&pipeline.name, &pipeline.source_schema, t))
        .collect::<Vec<_>>();

    let common = CommonSourceFields {
        hostname: source.host.clone(),
        port: source.port.to_string(),
        user: source.username.clone(),
        password: source.secret.clone(),
        topic_prefix: pipeline.name.clone(),
        table_include_list,
        snapshot_mode: mode.as_str().to_string(),
        tasks_max: "1".to_string(),
    };

    let config = match family {
        SourceFamily::Postgresql => to_wire(&PostgresSourceConfig {
            connector_class: "io.debezium.connector.postgresql.PostgresConnector",
            plugin_name: "pgoutput",
            dbname: source.database.clone(),
            slot_name: source.require_option("slot_name")?.to_string(),
            publication_name: source.require_option("publication_name")?.to_string(),
            common,
        })?,
        SourceFamily::Mysql => to_wire(&MySqlSourceConfig {
            connector_class: "io.debezium.connector.mysql.MySqlConnector",
            server_id: source.require_option("server_id")?.to_string(),
            include_schema_changes: "false",
            common,
        })?,
        SourceFamily::Sqlserver => to_wire(&SqlServerSourceConfig {
            connector_class: "io.debezium.connector.sqlserver.SqlServerConnector",
            database_names: source.database.clone(),
            encrypt: source.option("encrypt").map(str::to_string),
            common,
        })?,
        SourceFamily::Oracle => to_wire(&OracleSourceConfig {
            connector_class: "io.debezium.connector.oracle.OracleConnector",
            dbname: source.database.clone(),
            pdb_name: source.option("pdb_name").map(str::to_string),
            log_mining_strategy: source.option("log_mining_strategy").map(str::to_string),
            common,
        })?,
        SourceFamily::As400 => to_wire(&As400SourceConfig {
            connector_class: "io.debezium.connector.db2as400.As400RpcConnector",
            dbname: source.database.clone(),
            journal_library: source.require_option("journal_library")?.to_string(),
            journal_name: source.require_option("journal_name")?.to_string(),
            common,
        })?,
    };

    Ok(GeneratedSource {
        connector_name: pipeline.derived_source_connector_name(),
        snapshot_mode: mode,
        topics,
        config,
    })
}

/// Fields every Debezium source shares.
#[derive(Debug, Serialize)]
struct CommonSourceFields {
    #[serde(rename = "database.hostname")]
    hostname: String,
    #[serde(rename = "database.port")]
    port: String,
    #[serde(rename = "database.user")]
    user: String,
    #[serde(rename = "database.password")]
    password: String,
    #[serde(rename = "topic.prefix")]
    topic_prefix: String,
    #[serde(rename = "table.include.list")]
    table_include_list: String,
    #[serde(rename = "snapshot.mode")]
    snapshot_mode: String,
    #[serde(rename = "tasks.max")]
    tasks_max: String,
}

#[derive(Debug, Serialize)]
struct PostgresSourceConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    #[serde(rename = "plugin.name")]
    plugin_name: &'static str,
    #[serde(rename = "database.dbname")]
    dbname: String,
    #[serde(rename = "slot.name")]
    slot_name: String,
    #[serde(rename = "publication.name")]
    publication_name: String,
    #[serde(flatten)]
    common: CommonSourceFields,
}

#[derive(Debug, Serialize)]
struct MySqlSourceConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    #[serde(rename = "database.server.id")]
    server_id: String,
    #[serde(rename = "include.schema.changes")]
    include_schema_changes: &'static str,
    #[serde(flatten)]
    common: CommonSourceFields,
}

#[derive(Debug, Serialize)]
struct SqlServerSourceConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    #[serde(rename = "database.names")]
    database_names: String,
    #[serde(rename = "database.encrypt", skip_serializing_if = "Option::is_none")]
    encrypt: Option<String>,
    #[serde(flatten)]
    common: CommonSourceFields,
}

#[derive(Debug, Serialize)]
struct OracleSourceConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    #[serde(rename = "database.dbname")]
    dbname: String,
    #[serde(rename = "database.pdb.name", skip_serializing_if = "Option::is_none")]
    pdb_name: Option<String>,
    #[serde(
        rename = "log.mining.strategy",
        skip_serializing_if = "Option::is_none"
    )]
    log_mining_strategy: Option<String>,
    #[serde(flatten)]
    common: CommonSourceFields,
}

#[derive(Debug, Serialize)]
struct As400SourceConfig {
    #[serde(rename = "connector.class")]
    connector_class: &'static str,
    #[serde(rename = "database.dbname")]
    dbname: String,
    #[serde(rename = "journal.library")]
    journal_library: String,
    #[serde(rename = "journal.name")]
    journal_name: String,
    #[serde(flatten)]
    common: CommonSourceFields,
}
