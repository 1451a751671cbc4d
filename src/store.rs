//! Pipeline and connection registry.
//!
//! Holds the pipeline records the orchestrator mutates, hands out the
//! per-pipeline start/stop guard, and mirrors captured offsets into the
//! durable filesystem store so a restarted process does not re-run a
//! completed full load.
//!
//! # Pipelines file
//!
//! Connections and pipelines are declared in a TOML file:
//!
//! ```toml
//! [[connection]]
//! name = "orders-pg"
//! role = "source"
//! family = "postgresql"
//! host = "pg.internal"
//! port = 5432
//! database = "orders"
//! username = "replicator"
//! secret = "..."
//! default_schema = "public"
//!
//! [connection.options]
//! slot_name = "pipesync_orders"
//! publication_name = "pipesync_orders_pub"
//!
//! [[pipeline]]
//! name = "orders"
//! source_connection = "orders-pg"
//! target_connection = "warehouse"
//! source_schema = "public"
//! tables = ["customers", "orders"]
//! mode = "full_load_and_cdc"
//! ```

use crate::error::EngineError;
use crate::pipeline::{Connection, FullLoadStatus, Pipeline, PipelineMode};
use offset_types::FilesystemStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Declarative pipeline entry in the pipelines file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDecl {
    pub name: String,
    pub source_connection: String,
    pub target_connection: String,
    pub source_schema: String,
    pub tables: Vec<String>,
    #[serde(default)]
    pub target_schema: Option<String>,
    pub mode: PipelineMode,
}

/// Top-level shape of the pipelines file.
#[derive(Debug, Deserialize)]
struct PipelinesFile {
    #[serde(default, rename = "connection")]
    connections: Vec<Connection>,
    #[serde(default, rename = "pipeline")]
    pipelines: Vec<PipelineDecl>,
}

/// In-memory registry of connections and pipelines.
///
/// Pipeline records are mutated only through the orchestrator; the guard
/// returned by [`start_guard`](Self::start_guard) serializes start/stop per
/// pipeline so two concurrent calls cannot race on full-load status or the
/// captured offset.
pub struct PipelineStore {
    connections: RwLock<HashMap<String, Connection>>,
    pipelines: RwLock<HashMap<String, Pipeline>>,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    offsets: Option<FilesystemStore>,
}

impl PipelineStore {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
            offsets: None,
        }
    }

    /// Attach a durable offset store.
    pub fn with_offset_store(mut self, store: FilesystemStore) -> Self {
        self.offsets = Some(store);
        self
    }

    /// Load connections and pipelines from a TOML pipelines file.
    pub async fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<(), EngineError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Configuration(format!(
                "failed to read pipelines file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        self.load_toml(&content).await
    }

    /// Load connections and pipelines from TOML text.
    pub async fn load_toml(&self, content: &str) -> Result<(), EngineError> {
        let file: PipelinesFile = toml::from_str(content)
            .map_err(|e| EngineError::Configuration(format!("invalid pipelines file: {e}")))?;

        for connection in file.connections {
            self.insert_connection(connection).await;
        }
        for decl in file.pipelines {
            let mut pipeline = Pipeline::new(
                decl.name,
                decl.source_connection,
                decl.target_connection,
                decl.source_schema,
                decl.tables,
                decl.mode,
            );
            pipeline.target_schema = decl.target_schema;
            self.insert_pipeline(pipeline).await;
        }

        self.hydrate_offsets().await?;
        Ok(())
    }

    pub async fn insert_connection(&self, connection: Connection) {
        self.connections
            .write()
            .await
            .insert(connection.name.clone(), connection);
    }

    pub async fn insert_pipeline(&self, pipeline: Pipeline) {
        self.pipelines
            .write()
            .await
            .insert(pipeline.name.clone(), pipeline);
    }

    pub async fn get_connection(&self, name: &str) -> Result<Connection, EngineError> {
        let connections = self.connections.read().await;
        let connection = connections
            .get(name)
            .ok_or_else(|| EngineError::Configuration(format!("unknown connection '{name}'")))?;
        if connection.deleted {
            return Err(EngineError::Configuration(format!(
                "connection '{name}' has been deleted"
            )));
        }
        Ok(connection.clone())
    }

    pub async fn get_pipeline(&self, name: &str) -> Result<Pipeline, EngineError> {
        let pipelines = self.pipelines.read().await;
        let pipeline = pipelines
            .get(name)
            .ok_or_else(|| EngineError::PipelineNotFound(name.to_string()))?;
        if pipeline.deleted {
            return Err(EngineError::PipelineNotFound(name.to_string()));
        }
        Ok(pipeline.clone())
    }

    pub async fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace a pipeline record. Only the orchestrator calls this.
    pub async fn update_pipeline(&self, pipeline: Pipeline) -> Result<(), EngineError> {
        let mut pipelines = self.pipelines.write().await;
        if !pipelines.contains_key(&pipeline.name) {
            return Err(EngineError::PipelineNotFound(pipeline.name.clone()));
        }
        pipelines.insert(pipeline.name.clone(), pipeline);
        Ok(())
    }

    /// Per-pipeline start/stop guard.
    ///
    /// Callers `try_lock` the returned mutex; a second concurrent start for
    /// the same pipeline is rejected rather than queued.
    pub async fn start_guard(&self, name: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        guards
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Mirror a pipeline's captured offset into the durable store.
    pub fn persist_offset(&self, pipeline: &Pipeline) -> Result<(), EngineError> {
        if let (Some(store), Some(captured)) = (&self.offsets, &pipeline.captured_offset) {
            store.save(&pipeline.name, captured)?;
        }
        Ok(())
    }

    /// Restore persisted offsets into freshly loaded pipeline records.
    ///
    /// An offset is only ever persisted after a completed full load, so a
    /// restored offset also restores `full_load_status = COMPLETED`.
    pub async fn hydrate_offsets(&self) -> Result<(), EngineError> {
        let Some(store) = &self.offsets else {
            return Ok(());
        };

        let mut pipelines = self.pipelines.write().await;
        for pipeline in pipelines.values_mut() {
            if pipeline.captured_offset.is_some() {
                continue;
            }
            if let Some(captured) = store.load(&pipeline.name)? {
                info!(
                    "Restored offset for pipeline '{}': {}",
                    pipeline.name,
                    captured.offset.to_cli_string()
                );
                pipeline.captured_offset = Some(captured);
                pipeline.full_load_status = FullLoadStatus::Completed;
            }
        }
        Ok(())
    }
}

impl Default for PipelineStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINES_TOML: &str = r#"
        [[connection]]
        name = "orders-pg"
        role = "source"
        family = "postgresql"
        host = "pg.internal"
        port = 5432
        database = "orders"
        username = "replicator"
        secret = "secret"
        default_schema = "public"

        [connection.options]
        slot_name = "pipesync_orders"
        publication_name = "pipesync_orders_pub"

        [[connection]]
        name = "lake"
        role = "target"
        family = "s3"
        host = "s3.amazonaws.com"
        port = 443
        database = "acme-lake"
        username = "AKIA..."
        secret = "..."

        [connection.options]
        region = "eu-central-1"

        [[pipeline]]
        name = "orders"
        source_connection = "orders-pg"
        target_connection = "lake"
        source_schema = "public"
        tables = ["customers", "orders"]
        mode = "full_load_and_cdc"
    "#;

    #[tokio::test]
    async fn loads_pipelines_file() {
        let store = PipelineStore::new();
        store.load_toml(PIPELINES_TOML).await.unwrap();

        let pipeline = store.get_pipeline("orders").await.unwrap();
        assert_eq!(pipeline.tables, vec!["customers", "orders"]);
        assert_eq!(pipeline.mode, PipelineMode::FullLoadAndCdc);
        assert_eq!(pipeline.full_load_status, FullLoadStatus::NotStarted);

        let source = store.get_connection("orders-pg").await.unwrap();
        assert_eq!(source.option("slot_name"), Some("pipesync_orders"));
    }

    #[tokio::test]
    async fn deleted_pipeline_is_not_found() {
        let store = PipelineStore::new();
        store.load_toml(PIPELINES_TOML).await.unwrap();

        let mut pipeline = store.get_pipeline("orders").await.unwrap();
        pipeline.deleted = true;
        store.update_pipeline(pipeline).await.unwrap();

        assert!(matches!(
            store.get_pipeline("orders").await,
            Err(EngineError::PipelineNotFound(_))
        ));
    }

    #[tokio::test]
    async fn start_guard_rejects_second_holder() {
        let store = PipelineStore::new();
        store.load_toml(PIPELINES_TOML).await.unwrap();

        let guard = store.start_guard("orders").await;
        let held = guard.try_lock().unwrap();

        let again = store.start_guard("orders").await;
        assert!(again.try_lock().is_err());

        drop(held);
        assert!(guard.try_lock().is_ok());
    }

    #[tokio::test]
    async fn hydrates_offsets_from_durable_store() {
        use chrono::Utc;
        use offset_types::{CapturedOffset, Offset};

        let dir = tempfile::tempdir().unwrap();
        let fs_store = FilesystemStore::new(dir.path());
        fs_store
            .save(
                "orders",
                &CapturedOffset::new(
                    Offset::Lsn {
                        lsn: "0/16B3748".to_string(),
                    },
                    Utc::now(),
                ),
            )
            .unwrap();

        let store = PipelineStore::new().with_offset_store(FilesystemStore::new(dir.path()));
        store.load_toml(PIPELINES_TOML).await.unwrap();

        let pipeline = store.get_pipeline("orders").await.unwrap();
        assert_eq!(pipeline.full_load_status, FullLoadStatus::Completed);
        assert!(pipeline.captured_offset.is_some());
    }
}
