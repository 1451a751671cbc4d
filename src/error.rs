//! Error taxonomy for the pipeline engine.
//!
//! Transfer and connector failures are surfaced as typed variants so callers
//! can tell a connectivity problem from a configuration problem, and decide
//! whether a plain re-`start` is enough. Phase attribution (full load vs.
//! source connector vs. sink connector) rides on [`StartError`].

use serde::Serialize;

/// Errors raised by the orchestrator, transfer engine and generators.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Source or target database could not be reached
    #[error("database unreachable: {0}")]
    ConnectionUnavailable(String),

    /// Column metadata could not be read from the source
    #[error("schema introspection failed for table '{table}': {reason}")]
    SchemaIntrospectionFailed { table: String, reason: String },

    /// A batch failed mid-transfer; the table transfer is aborted
    #[error("batch transfer failed for table '{table}' at row offset {row_offset}: {reason}")]
    BatchTransferFailed {
        table: String,
        row_offset: u64,
        reason: String,
    },

    /// The replication position could not be read after the load finished.
    /// CDC enablement must abort rather than guess a start position.
    #[error("failed to capture replication offset after full load: {0}")]
    OffsetCaptureFailed(String),

    /// The runtime rejected a submitted connector configuration
    #[error("connector runtime rejected configuration for '{connector}': {reason}")]
    ConnectorSubmissionRejected { connector: String, reason: String },

    /// The runtime reports a failed task for a submitted connector
    #[error("connector '{connector}' task {task} failed: {trace}")]
    ConnectorTaskFailed {
        connector: String,
        task: u32,
        trace: String,
    },

    /// A connector never reached RUNNING within the polling budget
    #[error("connector '{connector}' did not reach RUNNING after {attempts} polls (last state {last_state})")]
    ConnectorNotRunning {
        connector: String,
        last_state: String,
        attempts: u32,
    },

    /// Invalid or incomplete pipeline/connection configuration.
    /// Raised before any runtime call is made.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No driver for this database family is compiled into the engine
    #[error("no {concern} support for database family '{family}'")]
    UnsupportedFamily {
        family: String,
        concern: &'static str,
    },

    /// Another start/stop is already running for this pipeline
    #[error("a start or stop is already in progress for pipeline '{0}'")]
    StartInProgress(String),

    /// Pipeline does not exist or was soft-deleted
    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    /// Offset parse/store failure
    #[error(transparent)]
    Offset(#[from] offset_types::OffsetError),

    /// Connector runtime transport/API failure
    #[error(transparent)]
    Runtime(#[from] connect_client::ConnectError),
}

/// Which part of `start` a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    FullLoad,
    SourceConnector,
    SinkConnector,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::FullLoad => "full_load",
            PipelinePhase::SourceConnector => "source_connector",
            PipelinePhase::SinkConnector => "sink_connector",
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure result for `start`/`stop`.
///
/// `phase` is `None` only for failures before any phase began (unknown
/// pipeline, concurrent start, soft-deleted connection).
#[derive(Debug)]
pub struct StartError {
    pub pipeline: String,
    pub phase: Option<PipelinePhase>,
    pub source: EngineError,
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.phase {
            Some(phase) => write!(
                f,
                "pipeline '{}' failed during {}: {}",
                self.pipeline, phase, self.source
            ),
            None => write!(f, "pipeline '{}' failed: {}", self.pipeline, self.source),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
