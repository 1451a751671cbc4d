//! pipesync library
//!
//! pipesync manages replication pipelines that move data from a relational
//! source (PostgreSQL, MySQL, SQL Server, Oracle, AS/400) to a delivery
//! target (SQL Server, S3, Snowflake): a one-time bulk copy ("full load")
//! followed by continuous change-data-capture streamed through an external
//! Kafka-Connect-style runtime running Debezium source connectors and
//! JDBC/S3/Snowflake sink connectors.
//!
//! # Features
//!
//! - Full load: batched bulk copy with target table creation and type
//!   mapping per (source, target) family pair
//! - Gapless hand-off: the source's replication position is captured the
//!   instant the load finishes and decides the connector snapshot mode
//! - Idempotent starts: connector names derive from the pipeline name, so a
//!   re-`start` updates the existing connectors instead of duplicating them
//! - Durable offsets: captured positions persist across restarts so a
//!   completed full load is never re-run
//!
//! # CLI Usage
//!
//! ```bash
//! # Start a pipeline (full load + CDC per its configured mode)
//! pipesync start orders --pipelines-file pipelines.toml
//!
//! # Stop it (connectors removed; full-load state and offset preserved)
//! pipesync stop orders --pipelines-file pipelines.toml
//!
//! # Aggregated pipeline + connector status
//! pipesync status orders --pipelines-file pipelines.toml
//! ```

pub mod config;
pub mod error;
pub mod fullload;
pub mod orchestrator;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod typemap;

pub use error::{EngineError, PipelinePhase, StartError};
pub use orchestrator::{Orchestrator, OrchestratorOptions, PipelineReport, StartReport};
pub use pipeline::{
    CdcStatus, Connection, ConnectionRole, DatabaseFamily, FullLoadStatus, Pipeline, PipelineMode,
    PipelineStatus, SourceFamily, TargetFamily,
};
pub use store::PipelineStore;
