//! End-to-end orchestrator scenarios against the in-memory backend and a
//! scripted connector runtime.

use chrono::Utc;
use offset_types::{CapturedOffset, Offset};
use pipesync::testing::{failed_task_status, MemoryBackend, MockRuntime};
use pipesync::typemap::ColumnMeta;
use pipesync::{
    fullload::Value, CdcStatus, Connection, ConnectionRole, DatabaseFamily, EngineError,
    FullLoadStatus, Orchestrator, OrchestratorOptions, Pipeline, PipelineMode, PipelinePhase,
    PipelineStatus, PipelineStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn source_connection() -> Connection {
    let mut options = BTreeMap::new();
    options.insert("slot_name".to_string(), "pipesync_orders".to_string());
    options.insert(
        "publication_name".to_string(),
        "pipesync_orders_pub".to_string(),
    );
    Connection {
        id: Uuid::new_v4(),
        name: "orders-pg".to_string(),
        role: ConnectionRole::Source,
        family: DatabaseFamily::Postgresql,
        host: "pg.internal".to_string(),
        port: 5432,
        database: "orders".to_string(),
        username: "replicator".to_string(),
        secret: "secret".to_string(),
        default_schema: Some("public".to_string()),
        options,
        deleted: false,
    }
}

fn s3_connection() -> Connection {
    let mut options = BTreeMap::new();
    options.insert("region".to_string(), "eu-central-1".to_string());
    Connection {
        id: Uuid::new_v4(),
        name: "lake".to_string(),
        role: ConnectionRole::Target,
        family: DatabaseFamily::S3,
        host: "s3.amazonaws.com".to_string(),
        port: 443,
        database: "acme-lake".to_string(),
        username: "AKIAEXAMPLE".to_string(),
        secret: "secretkey".to_string(),
        default_schema: None,
        options,
        deleted: false,
    }
}

fn snowflake_connection_missing_key() -> Connection {
    Connection {
        id: Uuid::new_v4(),
        name: "warehouse".to_string(),
        role: ConnectionRole::Target,
        family: DatabaseFamily::Snowflake,
        host: "acme.snowflakecomputing.com".to_string(),
        port: 443,
        database: "ANALYTICS".to_string(),
        username: "LOADER".to_string(),
        secret: String::new(),
        default_schema: Some("PUBLIC".to_string()),
        options: BTreeMap::new(),
        deleted: false,
    }
}

fn orders_pipeline(target: &str, mode: PipelineMode) -> Pipeline {
    Pipeline::new(
        "orders",
        "orders-pg",
        target,
        "public",
        vec!["orders".to_string()],
        mode,
    )
}

fn three_row_backend() -> MemoryBackend {
    let columns = vec![
        ColumnMeta {
            name: "id".to_string(),
            data_type: "integer".to_string(),
            type_detail: None,
            length: None,
            precision: None,
            scale: None,
            nullable: false,
        },
        ColumnMeta {
            name: "amount".to_string(),
            data_type: "numeric".to_string(),
            type_detail: None,
            length: None,
            precision: Some(10),
            scale: Some(2),
            nullable: true,
        },
    ];
    let rows = vec![
        vec![Value::Int(1), Value::Decimal("10.50".to_string())],
        vec![Value::Int(2), Value::Decimal("7.25".to_string())],
        vec![Value::Int(3), Value::Null],
    ];
    let offsets = vec![Offset::Lsn {
        lsn: "0/16B3748".to_string(),
    }];
    MemoryBackend::new(columns, rows, offsets)
}

fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        poll_attempts: 3,
        poll_interval: Duration::from_millis(1),
        ..OrchestratorOptions::default()
    }
}

async fn store_with(target: Connection, pipeline: Pipeline) -> Arc<PipelineStore> {
    let store = PipelineStore::new();
    store.insert_connection(source_connection()).await;
    store.insert_connection(target).await;
    store.insert_pipeline(pipeline).await;
    Arc::new(store)
}

/// Scenario A: three rows, full_load_and_cdc, no prior offset.
#[tokio::test]
async fn first_start_loads_and_snapshots_initial() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadAndCdc),
    )
    .await;
    let backend = three_row_backend();
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(backend.clone()),
        fast_options(),
    );

    let report = orchestrator.start("orders").await.unwrap();

    assert_eq!(report.status, PipelineStatus::Running);
    assert_eq!(report.full_load_status, FullLoadStatus::Completed);
    assert_eq!(report.cdc_status, CdcStatus::Running);
    assert_eq!(report.rows_copied, 3);
    assert_eq!(backend.written_rows("public.orders"), 3);
    assert_eq!(report.topics, vec!["orders.public.orders"]);

    let source_config = runtime.last_config("orders-source").unwrap();
    assert_eq!(source_config.get("snapshot.mode").unwrap(), "initial");

    let pipeline = store.get_pipeline("orders").await.unwrap();
    assert_eq!(
        pipeline.captured_offset.unwrap().offset,
        Offset::Lsn {
            lsn: "0/16B3748".to_string()
        }
    );
}

/// Scenario B: re-start after a completed load streams from the offset and
/// copies nothing again; connector names stay identical.
#[tokio::test]
async fn restart_is_idempotent_and_skips_completed_load() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadAndCdc),
    )
    .await;
    let backend = three_row_backend();
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(backend.clone()),
        fast_options(),
    );

    orchestrator.start("orders").await.unwrap();
    let report = orchestrator.start("orders").await.unwrap();

    // no re-copy, no duplication
    assert_eq!(report.rows_copied, 0);
    assert_eq!(backend.written_rows("public.orders"), 3);

    // the second submission updated the same connector names
    assert_eq!(runtime.put_count("orders-source"), 2);
    assert_eq!(runtime.put_count("orders-sink"), 2);
    let names: std::collections::BTreeSet<String> = runtime
        .submissions()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names.len(), 2);

    let source_config = runtime.last_config("orders-source").unwrap();
    assert_eq!(source_config.get("snapshot.mode").unwrap(), "never");
}

/// Scenario C: a missing required credential fails fast, before any runtime
/// call is made.
#[tokio::test]
async fn missing_sink_credential_fails_before_submission() {
    let store = store_with(
        snowflake_connection_missing_key(),
        orders_pipeline("warehouse", PipelineMode::CdcOnly),
    )
    .await;
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(three_row_backend()),
        fast_options(),
    );

    let err = orchestrator.start("orders").await.unwrap_err();

    assert_eq!(err.phase, Some(PipelinePhase::SinkConnector));
    assert!(matches!(&err.source, EngineError::Configuration(_)));
    assert!(err.source.to_string().contains("private_key"));
    assert!(runtime.submissions().is_empty(), "no connector may be created");
}

/// Scenario D: a failed task surfaces the trace, truncated, and the
/// pipeline lands in ERROR.
#[tokio::test]
async fn failed_task_sets_error_with_truncated_trace() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadAndCdc),
    )
    .await;
    let runtime = MockRuntime::new();
    let long_trace = format!(
        "org.apache.kafka.connect.errors.ConnectException: replication slot in use\n{}",
        "\tat io.debezium.SomeFrame.run(SomeFrame.java:42)\n".repeat(500)
    );
    runtime.script_status("orders-source", failed_task_status("orders-source", &long_trace));

    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(three_row_backend()),
        fast_options(),
    );

    let err = orchestrator.start("orders").await.unwrap_err();

    assert_eq!(err.phase, Some(PipelinePhase::SourceConnector));
    match &err.source {
        EngineError::ConnectorTaskFailed { trace, .. } => {
            assert!(trace.contains("replication slot in use"));
            assert!(trace.chars().count() < long_trace.chars().count());
            assert!(trace.ends_with("... (truncated)"));
        }
        other => panic!("expected ConnectorTaskFailed, got {other:?}"),
    }

    let pipeline = store.get_pipeline("orders").await.unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Error);
    assert!(pipeline.last_error.is_some());
}

/// `stop` removes both connectors but keeps full-load state and the offset.
#[tokio::test]
async fn stop_preserves_full_load_state_and_offset() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadAndCdc),
    )
    .await;
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(three_row_backend()),
        fast_options(),
    );

    orchestrator.start("orders").await.unwrap();
    orchestrator.stop("orders").await.unwrap();

    assert_eq!(
        runtime.deletions(),
        vec!["orders-source".to_string(), "orders-sink".to_string()]
    );

    let pipeline = store.get_pipeline("orders").await.unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Inactive);
    assert_eq!(pipeline.cdc_status, CdcStatus::Stopped);
    assert_eq!(pipeline.full_load_status, FullLoadStatus::Completed);
    assert!(pipeline.captured_offset.is_some());
}

/// A failed table transfer aborts before any connector is touched.
#[tokio::test]
async fn full_load_failure_never_touches_connectors() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadAndCdc),
    )
    .await;
    // No offsets scripted: capture fails right after the load
    let backend = three_row_backend();
    backend.set_offsets(Vec::new());
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(backend),
        fast_options(),
    );

    let err = orchestrator.start("orders").await.unwrap_err();
    assert_eq!(err.phase, Some(PipelinePhase::FullLoad));
    assert!(matches!(
        err.source,
        EngineError::OffsetCaptureFailed(_)
    ));
    assert!(runtime.submissions().is_empty());

    let pipeline = store.get_pipeline("orders").await.unwrap();
    assert_eq!(pipeline.full_load_status, FullLoadStatus::Failed);
    assert_eq!(pipeline.status, PipelineStatus::Error);
}

/// Repeated full loads must never move the captured offset backward.
#[tokio::test]
async fn repeated_full_load_rejects_offset_rewind() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadOnly),
    )
    .await;
    let backend = three_row_backend();
    backend.set_offsets(vec![Offset::Lsn {
        lsn: "5/0".to_string(),
    }]);
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(backend.clone()),
        fast_options(),
    );

    orchestrator.start("orders").await.unwrap();

    // Operator re-runs the load; the source now reports an older position
    let mut pipeline = store.get_pipeline("orders").await.unwrap();
    pipeline.full_load_status = FullLoadStatus::NotStarted;
    store.update_pipeline(pipeline).await.unwrap();
    backend.set_offsets(vec![Offset::Lsn {
        lsn: "4/FFFF".to_string(),
    }]);

    let err = orchestrator.start("orders").await.unwrap_err();
    assert_eq!(err.phase, Some(PipelinePhase::FullLoad));
    assert!(matches!(&err.source, EngineError::OffsetCaptureFailed(_)));
}

/// A second concurrent start is rejected, not queued.
#[tokio::test]
async fn concurrent_start_is_rejected() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadOnly),
    )
    .await;
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        MockRuntime::new(),
        Arc::new(three_row_backend()),
        fast_options(),
    );

    let guard = store.start_guard("orders").await;
    let _held = guard.try_lock().unwrap();

    let err = orchestrator.start("orders").await.unwrap_err();
    assert!(matches!(&err.source, EngineError::StartInProgress(_)));
    assert_eq!(err.phase, None);
}

/// Unknown pipelines fail with a typed not-found error.
#[tokio::test]
async fn unknown_pipeline_is_not_found() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadOnly),
    )
    .await;
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        MockRuntime::new(),
        Arc::new(three_row_backend()),
        fast_options(),
    );

    let err = orchestrator.start("nope").await.unwrap_err();
    assert!(matches!(&err.source, EngineError::PipelineNotFound(_)));
}

/// Status aggregates the record with live connector status.
#[tokio::test]
async fn status_reports_pipeline_and_connectors() {
    let store = store_with(
        s3_connection(),
        orders_pipeline("lake", PipelineMode::FullLoadAndCdc),
    )
    .await;
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        runtime.clone(),
        Arc::new(three_row_backend()),
        fast_options(),
    );

    orchestrator.start("orders").await.unwrap();
    let report = orchestrator.status("orders").await.unwrap();

    assert_eq!(report.status, PipelineStatus::Running);
    assert_eq!(report.full_load_status, FullLoadStatus::Completed);
    assert_eq!(report.captured_offset.as_deref(), Some("lsn:0/16B3748"));
    let source = report.source_connector.unwrap();
    assert!(source.is_running());
    assert!(report.sink_connector.is_some());
}

/// Offsets persisted through the durable store survive a process restart
/// and the restored pipeline streams from them without re-loading.
#[tokio::test]
async fn durable_offset_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let fs = offset_types::FilesystemStore::new(dir.path());
    fs.save(
        "orders",
        &CapturedOffset::new(
            Offset::Lsn {
                lsn: "0/16B3748".to_string(),
            },
            Utc::now(),
        ),
    )
    .unwrap();

    let store = PipelineStore::new()
        .with_offset_store(offset_types::FilesystemStore::new(dir.path()));
    store.insert_connection(source_connection()).await;
    store.insert_connection(s3_connection()).await;
    store
        .insert_pipeline(orders_pipeline("lake", PipelineMode::FullLoadAndCdc))
        .await;
    store.hydrate_offsets().await.unwrap();

    let backend = three_row_backend();
    let runtime = MockRuntime::new();
    let orchestrator = Orchestrator::new(
        Arc::new(store),
        runtime.clone(),
        Arc::new(backend.clone()),
        fast_options(),
    );

    let report = orchestrator.start("orders").await.unwrap();
    assert_eq!(report.rows_copied, 0, "completed load must not re-run");
    assert_eq!(backend.written_rows("public.orders"), 0);
    let source_config = runtime.last_config("orders-source").unwrap();
    assert_eq!(source_config.get("snapshot.mode").unwrap(), "never");
}
