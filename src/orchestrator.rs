//! Pipeline state machine.
//!
//! Owns pipeline lifecycle: `start` runs the full load (when the mode asks
//! for one and it hasn't completed), captures the hand-off offset, generates
//! and submits both connector configurations, and polls the runtime until
//! both connectors run or a task fails. `stop` removes the connectors but
//! keeps full-load status and the captured offset so a later `start` does
//! not re-copy data.
//!
//! `start` is idempotent: connector names derive from the pipeline name, so
//! re-running a healthy pipeline updates the existing connectors instead of
//! creating duplicates. Calling `start` repeatedly is the supported way to
//! converge a pipeline back to healthy; nothing retries automatically.
//!
//! Only this component mutates pipeline records. A per-pipeline guard makes
//! a second concurrent `start`/`stop` fail with `StartInProgress` instead of
//! racing on full-load status and the captured offset.

use crate::config::{generate_sink_config, generate_source_config, SnapshotMode};
use crate::error::{EngineError, PipelinePhase, StartError};
use crate::fullload::{transfer_table, TableRef, TransferBackend, TransferOptions};
use crate::pipeline::{CdcStatus, FullLoadStatus, Pipeline, PipelineStatus};
use crate::store::PipelineStore;
use connect_client::{truncate_body, ConnectError, ConnectorRuntime, ConnectorStatus};
use offset_types::CapturedOffset;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on a task failure trace carried in results and logs.
const MAX_TRACE_CHARS: usize = 4000;

/// Orchestrator knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub batch_size: u32,
    pub create_missing_tables: bool,
    /// Build and log configurations without touching databases or the runtime
    pub dry_run: bool,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            create_missing_tables: true,
            dry_run: false,
            poll_attempts: 30,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Successful `start` outcome.
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub pipeline: String,
    pub status: PipelineStatus,
    pub full_load_status: FullLoadStatus,
    pub cdc_status: CdcStatus,
    pub rows_copied: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_mode: Option<SnapshotMode>,
    pub topics: Vec<String>,
}

/// Aggregated pipeline status for callers.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub status: PipelineStatus,
    pub full_load_status: FullLoadStatus,
    pub cdc_status: CdcStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_offset: Option<String>,
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_connector: Option<ConnectorStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_connector: Option<ConnectorStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub struct Orchestrator<R: ConnectorRuntime> {
    store: Arc<PipelineStore>,
    runtime: R,
    backend: Arc<dyn TransferBackend>,
    options: OrchestratorOptions,
}

impl<R: ConnectorRuntime> Orchestrator<R> {
    pub fn new(
        store: Arc<PipelineStore>,
        runtime: R,
        backend: Arc<dyn TransferBackend>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            runtime,
            backend,
            options,
        }
    }

    /// Start (or re-start) a pipeline.
    pub async fn start(&self, name: &str) -> Result<StartReport, StartError> {
        let guard = self.store.start_guard(name).await;
        let Ok(_held) = guard.try_lock() else {
            return Err(StartError {
                pipeline: name.to_string(),
                phase: None,
                source: EngineError::StartInProgress(name.to_string()),
            });
        };

        match self.run_start(name).await {
            Ok(report) => Ok(report),
            Err((phase, source)) => {
                error!(
                    "Pipeline '{}' start failed in phase {}: {}",
                    name,
                    phase.map(|p| p.as_str()).unwrap_or("validation"),
                    source
                );
                // Leave the record in ERROR with the message attached, unless
                // the failure happened before the pipeline was even resolved
                if let Ok(mut pipeline) = self.store.get_pipeline(name).await {
                    pipeline.status = PipelineStatus::Error;
                    pipeline.last_error = Some(source.to_string());
                    if let Err(e) = self.store.update_pipeline(pipeline).await {
                        warn!("Failed to record error state for pipeline '{name}': {e}");
                    }
                }
                Err(StartError {
                    pipeline: name.to_string(),
                    phase,
                    source,
                })
            }
        }
    }

    async fn run_start(
        &self,
        name: &str,
    ) -> Result<StartReport, (Option<PipelinePhase>, EngineError)> {
        let mut pipeline = self.store.get_pipeline(name).await.map_err(|e| (None, e))?;
        let source_conn = self
            .store
            .get_connection(&pipeline.source_connection)
            .await
            .map_err(|e| (None, e))?;
        let target_conn = self
            .store
            .get_connection(&pipeline.target_connection)
            .await
            .map_err(|e| (None, e))?;

        info!(
            "Starting pipeline '{}' (mode {:?}, full load {:?})",
            pipeline.name, pipeline.mode, pipeline.full_load_status
        );
        pipeline.status = PipelineStatus::Starting;
        self.persist(&pipeline).await.map_err(|e| (None, e))?;

        let mut rows_copied = 0u64;

        if pipeline.mode.includes_full_load()
            && pipeline.full_load_status != FullLoadStatus::Completed
        {
            pipeline.full_load_status = FullLoadStatus::Running;
            self.persist(&pipeline)
                .await
                .map_err(|e| (Some(PipelinePhase::FullLoad), e))?;

            match self.run_full_load(&pipeline, &source_conn, &target_conn).await {
                Ok((rows, captured)) => {
                    rows_copied = rows;
                    if let Err(e) = pipeline.record_offset(captured) {
                        pipeline.full_load_status = FullLoadStatus::Failed;
                        let _ = self.persist(&pipeline).await;
                        return Err((Some(PipelinePhase::FullLoad), e));
                    }
                    if let Err(e) = self.persist_offset(&pipeline) {
                        pipeline.full_load_status = FullLoadStatus::Failed;
                        let _ = self.persist(&pipeline).await;
                        return Err((Some(PipelinePhase::FullLoad), e));
                    }
                    pipeline.full_load_status = FullLoadStatus::Completed;
                    self.persist(&pipeline)
                        .await
                        .map_err(|e| (Some(PipelinePhase::FullLoad), e))?;
                }
                Err(e) => {
                    // Never enable CDC on top of a partial load
                    pipeline.full_load_status = FullLoadStatus::Failed;
                    let _ = self.persist(&pipeline).await;
                    return Err((Some(PipelinePhase::FullLoad), e));
                }
            }
        }

        let mut chosen_snapshot = None;

        if pipeline.mode.includes_cdc() {
            let generated = generate_source_config(&pipeline, &source_conn)
                .map_err(|e| (Some(PipelinePhase::SourceConnector), e))?;
            chosen_snapshot = Some(generated.snapshot_mode);

            pipeline.source_connector_name = Some(generated.connector_name.clone());
            pipeline.topics = generated.topics.clone();
            pipeline.source_config = Some(generated.config.clone());

            // The sink configuration is derived from the stored topic list;
            // both configs exist before anything is submitted, so a
            // configuration error never leaves a half-created pair behind
            let sink = generate_sink_config(&pipeline, &target_conn, self.options.create_missing_tables)
                .map_err(|e| (Some(PipelinePhase::SinkConnector), e))?;
            pipeline.sink_connector_name = Some(sink.connector_name.clone());
            pipeline.sink_config = Some(sink.config.clone());

            self.persist(&pipeline)
                .await
                .map_err(|e| (Some(PipelinePhase::SourceConnector), e))?;

            if self.options.dry_run {
                info!(
                    "Dry-run: would submit source connector '{}' (snapshot mode {}) and sink connector '{}'",
                    generated.connector_name, generated.snapshot_mode, sink.connector_name
                );
            } else {
                // Source first: the sink subscribes to topics the source declares
                self.runtime
                    .put_connector_config(&generated.connector_name, &generated.config)
                    .await
                    .map_err(|e| {
                        (
                            Some(PipelinePhase::SourceConnector),
                            submission_error(&generated.connector_name, e),
                        )
                    })?;
                info!(
                    "Submitted source connector '{}' (snapshot mode {})",
                    generated.connector_name, generated.snapshot_mode
                );

                self.runtime
                    .put_connector_config(&sink.connector_name, &sink.config)
                    .await
                    .map_err(|e| {
                        (
                            Some(PipelinePhase::SinkConnector),
                            submission_error(&sink.connector_name, e),
                        )
                    })?;
                info!("Submitted sink connector '{}'", sink.connector_name);

                self.await_running(&generated.connector_name)
                    .await
                    .map_err(|e| (Some(PipelinePhase::SourceConnector), e))?;
                self.await_running(&sink.connector_name)
                    .await
                    .map_err(|e| (Some(PipelinePhase::SinkConnector), e))?;

                pipeline.cdc_status = CdcStatus::Running;
            }
        }

        pipeline.status = PipelineStatus::Running;
        pipeline.last_error = None;
        self.persist(&pipeline).await.map_err(|e| (None, e))?;

        info!(
            "Pipeline '{}' is running ({} rows copied, snapshot mode {:?})",
            pipeline.name, rows_copied, chosen_snapshot
        );

        Ok(StartReport {
            pipeline: pipeline.name.clone(),
            status: pipeline.status,
            full_load_status: pipeline.full_load_status,
            cdc_status: pipeline.cdc_status,
            rows_copied,
            snapshot_mode: chosen_snapshot,
            topics: pipeline.topics,
        })
    }

    /// Copy every configured table, returning the total row count and the
    /// offset captured after the final table finished.
    async fn run_full_load(
        &self,
        pipeline: &Pipeline,
        source_conn: &crate::pipeline::Connection,
        target_conn: &crate::pipeline::Connection,
    ) -> Result<(u64, CapturedOffset), EngineError> {
        let source_family = source_conn.source_family()?;
        let target_family = target_conn.target_family()?;

        let mut extractor = self.backend.open_extractor(source_conn).await?;
        let mut writer = self.backend.open_writer(target_conn).await?;

        let options = TransferOptions {
            batch_size: self.options.batch_size,
            create_if_missing: self.options.create_missing_tables,
            dry_run: self.options.dry_run,
        };

        let mut total_rows = 0u64;
        let mut last_capture: Option<CapturedOffset> = None;

        for table in &pipeline.tables {
            let table_ref = TableRef::new(pipeline.source_schema.clone(), table.clone());
            let transfer = transfer_table(
                source_family,
                target_family,
                extractor.as_mut(),
                writer.as_mut(),
                &table_ref,
                &options,
            )
            .await?;

            debug!(
                "Intermediate offset after {}: {}",
                table_ref,
                transfer.offset.offset.to_cli_string()
            );
            total_rows += transfer.rows_copied;
            last_capture = Some(transfer.offset);
        }

        let captured = last_capture.ok_or_else(|| {
            EngineError::Configuration(format!(
                "pipeline '{}' has no tables configured",
                pipeline.name
            ))
        })?;

        Ok((total_rows, captured))
    }

    /// Poll one connector until it and all its tasks run, a task fails, or
    /// the attempt budget is spent.
    async fn await_running(&self, connector: &str) -> Result<ConnectorStatus, EngineError> {
        let mut last_state = "UNKNOWN".to_string();

        for attempt in 0..self.options.poll_attempts {
            let status = self.runtime.connector_status(connector).await?;

            if let Some(task) = status.first_failed_task() {
                return Err(EngineError::ConnectorTaskFailed {
                    connector: connector.to_string(),
                    task: task.id,
                    trace: truncate_body(
                        task.trace.as_deref().unwrap_or("no trace reported"),
                        MAX_TRACE_CHARS,
                    ),
                });
            }

            if status.is_running() {
                debug!(
                    "Connector '{}' running after {} poll(s)",
                    connector,
                    attempt + 1
                );
                return Ok(status);
            }

            last_state = status.connector.state.to_string();
            if attempt + 1 < self.options.poll_attempts {
                tokio::time::sleep(self.options.poll_interval).await;
            }
        }

        Err(EngineError::ConnectorNotRunning {
            connector: connector.to_string(),
            last_state,
            attempts: self.options.poll_attempts,
        })
    }

    /// Stop a pipeline: remove both connectors, keep full-load state and the
    /// captured offset so a later `start` skips re-copying data.
    pub async fn stop(&self, name: &str) -> Result<(), StartError> {
        let guard = self.store.start_guard(name).await;
        let Ok(_held) = guard.try_lock() else {
            return Err(StartError {
                pipeline: name.to_string(),
                phase: None,
                source: EngineError::StartInProgress(name.to_string()),
            });
        };

        let mut pipeline = self
            .store
            .get_pipeline(name)
            .await
            .map_err(|source| StartError {
                pipeline: name.to_string(),
                phase: None,
                source,
            })?;

        let connectors = [
            (
                pipeline.source_connector_name.clone(),
                PipelinePhase::SourceConnector,
            ),
            (
                pipeline.sink_connector_name.clone(),
                PipelinePhase::SinkConnector,
            ),
        ];

        for (connector, phase) in connectors {
            let Some(connector) = connector else {
                continue;
            };
            match self.runtime.delete_connector(&connector).await {
                Ok(()) => info!("Deleted connector '{connector}'"),
                // Never created or already gone; nothing to stop
                Err(e) if e.status() == Some(404) => {
                    debug!("Connector '{connector}' not present, nothing to delete")
                }
                Err(e) => {
                    return Err(StartError {
                        pipeline: name.to_string(),
                        phase: Some(phase),
                        source: EngineError::Runtime(e),
                    })
                }
            }
        }

        pipeline.cdc_status = CdcStatus::Stopped;
        pipeline.status = PipelineStatus::Inactive;
        self.persist(&pipeline).await.map_err(|source| StartError {
            pipeline: name.to_string(),
            phase: None,
            source,
        })?;

        info!("Pipeline '{name}' stopped");
        Ok(())
    }

    /// Aggregate the pipeline record with live connector status.
    pub async fn status(&self, name: &str) -> Result<PipelineReport, EngineError> {
        let pipeline = self.store.get_pipeline(name).await?;

        let source_connector = match &pipeline.source_connector_name {
            Some(connector) => match self.runtime.connector_status(connector).await {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!("Failed to fetch status for source connector '{connector}': {e}");
                    None
                }
            },
            None => None,
        };
        let sink_connector = match &pipeline.sink_connector_name {
            Some(connector) => match self.runtime.connector_status(connector).await {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!("Failed to fetch status for sink connector '{connector}': {e}");
                    None
                }
            },
            None => None,
        };

        Ok(PipelineReport {
            pipeline: pipeline.name.clone(),
            status: pipeline.status,
            full_load_status: pipeline.full_load_status,
            cdc_status: pipeline.cdc_status,
            captured_offset: pipeline
                .captured_offset
                .as_ref()
                .map(|c| c.offset.to_cli_string()),
            topics: pipeline.topics,
            source_connector,
            sink_connector,
            last_error: pipeline.last_error,
        })
    }

    /// Persist a pipeline record unless this is a dry run.
    async fn persist(&self, pipeline: &Pipeline) -> Result<(), EngineError> {
        if self.options.dry_run {
            return Ok(());
        }
        self.store.update_pipeline(pipeline.clone()).await
    }

    /// Mirror the captured offset durably unless this is a dry run.
    fn persist_offset(&self, pipeline: &Pipeline) -> Result<(), EngineError> {
        if self.options.dry_run {
            return Ok(());
        }
        self.store.persist_offset(pipeline)
    }
}

/// Classify a runtime error for a config submission: client-side rejections
/// become `ConnectorSubmissionRejected` with the runtime's message attached.
fn submission_error(connector: &str, error: ConnectError) -> EngineError {
    match error {
        ConnectError::Api { status, body, .. } if (400..500).contains(&status) => {
            EngineError::ConnectorSubmissionRejected {
                connector: connector.to_string(),
                reason: format!("HTTP {status}: {body}"),
            }
        }
        other => EngineError::Runtime(other),
    }
}
