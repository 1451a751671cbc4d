//! Pipeline and connection model.
//!
//! A `Connection` describes one end of a pipeline (a source or target
//! database plus credentials and family-specific options). A `Pipeline` ties
//! a source connection to a target connection with a table list, a mode, and
//! the state the orchestrator maintains across starts: statuses, the
//! captured replication offset, generated connector names, topic names, and
//! the persisted connector configuration blobs.
//!
//! Pipelines are mutated exclusively by the orchestrator. The transfer
//! engine and the configuration generators return values; they never write
//! to the record. That single-writer rule is the correctness boundary for
//! the whole model.

use crate::error::EngineError;
use connect_client::ConnectorConfig;
use offset_types::CapturedOffset;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Whether a connection is used as a replication source or a delivery target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    Source,
    Target,
}

/// Every database family a connection can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseFamily {
    Postgresql,
    Mysql,
    Sqlserver,
    Oracle,
    As400,
    S3,
    Snowflake,
}

impl DatabaseFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseFamily::Postgresql => "postgresql",
            DatabaseFamily::Mysql => "mysql",
            DatabaseFamily::Sqlserver => "sqlserver",
            DatabaseFamily::Oracle => "oracle",
            DatabaseFamily::As400 => "as400",
            DatabaseFamily::S3 => "s3",
            DatabaseFamily::Snowflake => "snowflake",
        }
    }
}

impl std::fmt::Display for DatabaseFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Families that can act as a CDC-capable replication source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    Postgresql,
    Mysql,
    Sqlserver,
    Oracle,
    As400,
}

impl std::fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceFamily::Postgresql => "postgresql",
            SourceFamily::Mysql => "mysql",
            SourceFamily::Sqlserver => "sqlserver",
            SourceFamily::Oracle => "oracle",
            SourceFamily::As400 => "as400",
        };
        f.write_str(s)
    }
}

/// Families that can act as a delivery target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFamily {
    Sqlserver,
    S3,
    Snowflake,
}

impl std::fmt::Display for TargetFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetFamily::Sqlserver => "sqlserver",
            TargetFamily::S3 => "s3",
            TargetFamily::Snowflake => "snowflake",
        };
        f.write_str(s)
    }
}

/// A named source or target database endpoint.
///
/// Soft-deleted connections are kept so pipeline history stays resolvable;
/// a `start` against a deleted connection is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub role: ConnectionRole,
    pub family: DatabaseFamily,
    pub host: String,
    pub port: u16,
    /// Database name; for S3 targets this carries the bucket name
    pub database: String,
    pub username: String,
    pub secret: String,
    #[serde(default)]
    pub default_schema: Option<String>,
    /// Family-specific options: replication slot and publication for
    /// PostgreSQL, server id for MySQL, journal/library for AS/400, region
    /// for S3, private key material for Snowflake, TLS flags, and so on
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
}

impl Connection {
    /// Look up an optional family-specific option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    /// Look up a required family-specific option.
    ///
    /// Absence is a configuration error, raised before any runtime call.
    pub fn require_option(&self, key: &str) -> Result<&str, EngineError> {
        self.option(key).ok_or_else(|| {
            EngineError::Configuration(format!(
                "connection '{}' ({}) is missing required option '{}'",
                self.name, self.family, key
            ))
        })
    }

    /// This connection's family as a replication source.
    pub fn source_family(&self) -> Result<SourceFamily, EngineError> {
        match self.family {
            DatabaseFamily::Postgresql => Ok(SourceFamily::Postgresql),
            DatabaseFamily::Mysql => Ok(SourceFamily::Mysql),
            DatabaseFamily::Sqlserver => Ok(SourceFamily::Sqlserver),
            DatabaseFamily::Oracle => Ok(SourceFamily::Oracle),
            DatabaseFamily::As400 => Ok(SourceFamily::As400),
            other => Err(EngineError::Configuration(format!(
                "connection '{}' (family {other}) cannot act as a replication source",
                self.name
            ))),
        }
    }

    /// This connection's family as a delivery target.
    pub fn target_family(&self) -> Result<TargetFamily, EngineError> {
        match self.family {
            DatabaseFamily::Sqlserver => Ok(TargetFamily::Sqlserver),
            DatabaseFamily::S3 => Ok(TargetFamily::S3),
            DatabaseFamily::Snowflake => Ok(TargetFamily::Snowflake),
            other => Err(EngineError::Configuration(format!(
                "connection '{}' (family {other}) cannot act as a delivery target",
                self.name
            ))),
        }
    }
}

/// What a pipeline replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    FullLoadOnly,
    FullLoadAndCdc,
    CdcOnly,
}

impl PipelineMode {
    pub fn includes_full_load(&self) -> bool {
        matches!(self, PipelineMode::FullLoadOnly | PipelineMode::FullLoadAndCdc)
    }

    pub fn includes_cdc(&self) -> bool {
        matches!(self, PipelineMode::FullLoadAndCdc | PipelineMode::CdcOnly)
    }
}

/// Overall pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Inactive,
    Starting,
    Running,
    Error,
    Paused,
}

/// Full-load sub-status, independent of the overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FullLoadStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// CDC sub-status, independent of the overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CdcStatus {
    Stopped,
    Running,
    Error,
    Paused,
}

/// One replication pipeline and the state the orchestrator keeps for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    /// Unique name; connector names and topic names derive from it
    pub name: String,
    pub source_connection: String,
    pub target_connection: String,
    pub source_schema: String,
    pub tables: Vec<String>,
    #[serde(default)]
    pub target_schema: Option<String>,
    pub mode: PipelineMode,
    pub status: PipelineStatus,
    pub full_load_status: FullLoadStatus,
    pub cdc_status: CdcStatus,
    /// Replication position captured when the full load finished. Set at
    /// most once per full-load run and never moved backward.
    #[serde(default)]
    pub captured_offset: Option<CapturedOffset>,
    #[serde(default)]
    pub source_connector_name: Option<String>,
    #[serde(default)]
    pub sink_connector_name: Option<String>,
    /// Topic names in use, exactly as the source generator produced them.
    /// The sink generator and diagnostics must use these values verbatim.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Generated configuration blobs, persisted for idempotent re-creation
    #[serde(default)]
    pub source_config: Option<ConnectorConfig>,
    #[serde(default)]
    pub sink_config: Option<ConnectorConfig>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        source_connection: impl Into<String>,
        target_connection: impl Into<String>,
        source_schema: impl Into<String>,
        tables: Vec<String>,
        mode: PipelineMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source_connection: source_connection.into(),
            target_connection: target_connection.into(),
            source_schema: source_schema.into(),
            tables,
            target_schema: None,
            mode,
            status: PipelineStatus::Inactive,
            full_load_status: FullLoadStatus::NotStarted,
            cdc_status: CdcStatus::Stopped,
            captured_offset: None,
            source_connector_name: None,
            sink_connector_name: None,
            topics: Vec::new(),
            source_config: None,
            sink_config: None,
            last_error: None,
            deleted: false,
        }
    }

    /// Deterministic source-connector name.
    ///
    /// A pure function of the pipeline name, so repeated starts converge on
    /// the same connector instead of creating duplicates.
    pub fn derived_source_connector_name(&self) -> String {
        format!("{}-source", self.name)
    }

    /// Deterministic sink-connector name.
    pub fn derived_sink_connector_name(&self) -> String {
        format!("{}-sink", self.name)
    }

    /// Record the offset captured by a finished full load.
    ///
    /// Enforces the invariant that a pipeline's offset never moves backward
    /// and never changes family.
    pub fn record_offset(&mut self, captured: CapturedOffset) -> Result<(), EngineError> {
        if let Some(existing) = &self.captured_offset {
            match existing.offset.partial_cmp_same_family(&captured.offset) {
                None => {
                    return Err(EngineError::OffsetCaptureFailed(format!(
                        "offset family changed for pipeline '{}': stored {}, captured {}",
                        self.name,
                        existing.offset.to_cli_string(),
                        captured.offset.to_cli_string()
                    )))
                }
                Some(Ordering::Greater) => {
                    return Err(EngineError::OffsetCaptureFailed(format!(
                        "captured offset {} is behind stored offset {} for pipeline '{}'",
                        captured.offset.to_cli_string(),
                        existing.offset.to_cli_string(),
                        self.name
                    )))
                }
                Some(_) => {}
            }
        }
        self.captured_offset = Some(captured);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use offset_types::Offset;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            "orders",
            "src",
            "dst",
            "public",
            vec!["orders".to_string()],
            PipelineMode::FullLoadAndCdc,
        )
    }

    #[test]
    fn connector_names_are_deterministic() {
        let p = pipeline();
        assert_eq!(p.derived_source_connector_name(), "orders-source");
        assert_eq!(p.derived_sink_connector_name(), "orders-sink");
        assert_eq!(
            p.derived_source_connector_name(),
            pipeline().derived_source_connector_name()
        );
    }

    #[test]
    fn record_offset_rejects_rewind() {
        let mut p = pipeline();
        p.record_offset(CapturedOffset::new(Offset::Scn { scn: 200 }, Utc::now()))
            .unwrap();

        let err = p
            .record_offset(CapturedOffset::new(Offset::Scn { scn: 100 }, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, EngineError::OffsetCaptureFailed(_)));

        // forward movement is allowed
        p.record_offset(CapturedOffset::new(Offset::Scn { scn: 300 }, Utc::now()))
            .unwrap();
        assert_eq!(
            p.captured_offset.unwrap().offset,
            Offset::Scn { scn: 300 }
        );
    }

    #[test]
    fn record_offset_rejects_family_change() {
        let mut p = pipeline();
        p.record_offset(CapturedOffset::new(Offset::Scn { scn: 200 }, Utc::now()))
            .unwrap();
        let err = p
            .record_offset(CapturedOffset::new(
                Offset::Lsn {
                    lsn: "0/1".to_string(),
                },
                Utc::now(),
            ))
            .unwrap_err();
        assert!(matches!(err, EngineError::OffsetCaptureFailed(_)));
    }

    #[test]
    fn mode_predicates() {
        assert!(PipelineMode::FullLoadOnly.includes_full_load());
        assert!(!PipelineMode::FullLoadOnly.includes_cdc());
        assert!(PipelineMode::FullLoadAndCdc.includes_full_load());
        assert!(PipelineMode::FullLoadAndCdc.includes_cdc());
        assert!(!PipelineMode::CdcOnly.includes_full_load());
        assert!(PipelineMode::CdcOnly.includes_cdc());
    }

    #[test]
    fn require_option_names_the_missing_key() {
        let conn = Connection {
            id: Uuid::new_v4(),
            name: "wh".to_string(),
            role: ConnectionRole::Target,
            family: DatabaseFamily::Snowflake,
            host: "acct.snowflakecomputing.com".to_string(),
            port: 443,
            database: "ANALYTICS".to_string(),
            username: "LOADER".to_string(),
            secret: String::new(),
            default_schema: None,
            options: BTreeMap::new(),
            deleted: false,
        };
        let err = conn.require_option("private_key").unwrap_err();
        assert!(err.to_string().contains("private_key"));
        assert!(err.to_string().contains("wh"));
    }
}
