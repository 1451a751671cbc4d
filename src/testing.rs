//! In-memory test doubles for the transfer backend and the connector
//! runtime, used by the integration tests under `tests/`.

use crate::error::EngineError;
use crate::fullload::{Row, SourceExtractor, TableRef, TargetWriter, TransferBackend};
use crate::pipeline::Connection;
use crate::typemap::{ColumnMeta, MappedColumn};
use async_trait::async_trait;
use connect_client::{
    ConnectError, ConnectorConfig, ConnectorRuntime, ConnectorState, ConnectorStatus, RunState,
    TaskState,
};
use offset_types::Offset;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Scripted source data served to every extractor the backend opens.
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    /// Offsets returned by successive `capture_offset` calls; the last one
    /// repeats once the queue runs dry
    pub offsets: VecDeque<Offset>,
}

/// Transfer backend over in-memory data, with an inspectable write sink.
#[derive(Clone)]
pub struct MemoryBackend {
    dataset: Arc<Mutex<MemoryDataset>>,
    written: Arc<Mutex<HashMap<String, Vec<Row>>>>,
}

impl MemoryBackend {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>, offsets: Vec<Offset>) -> Self {
        Self {
            dataset: Arc::new(Mutex::new(MemoryDataset {
                columns,
                rows,
                offsets: offsets.into(),
            })),
            written: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Rows written so far for one qualified table name.
    pub fn written_rows(&self, table: &str) -> usize {
        self.written
            .lock()
            .expect("writer store poisoned")
            .get(table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    /// Replace the scripted offsets (e.g. to simulate a second load).
    pub fn set_offsets(&self, offsets: Vec<Offset>) {
        self.dataset.lock().expect("dataset poisoned").offsets = offsets.into();
    }
}

#[async_trait]
impl TransferBackend for MemoryBackend {
    async fn open_extractor(
        &self,
        _conn: &Connection,
    ) -> Result<Box<dyn SourceExtractor>, EngineError> {
        Ok(Box::new(MemoryExtractor {
            dataset: Arc::clone(&self.dataset),
        }))
    }

    async fn open_writer(&self, _conn: &Connection) -> Result<Box<dyn TargetWriter>, EngineError> {
        Ok(Box::new(MemoryWriter {
            written: Arc::clone(&self.written),
        }))
    }
}

struct MemoryExtractor {
    dataset: Arc<Mutex<MemoryDataset>>,
}

#[async_trait]
impl SourceExtractor for MemoryExtractor {
    async fn introspect(&mut self, _table: &TableRef) -> Result<Vec<ColumnMeta>, EngineError> {
        Ok(self
            .dataset
            .lock()
            .expect("dataset poisoned")
            .columns
            .clone())
    }

    async fn fetch_batch(
        &mut self,
        _table: &TableRef,
        row_offset: u64,
        limit: u32,
    ) -> Result<Vec<Row>, EngineError> {
        let dataset = self.dataset.lock().expect("dataset poisoned");
        let start = (row_offset as usize).min(dataset.rows.len());
        let end = (start + limit as usize).min(dataset.rows.len());
        Ok(dataset.rows[start..end].to_vec())
    }

    async fn capture_offset(&mut self) -> Result<Offset, EngineError> {
        let mut dataset = self.dataset.lock().expect("dataset poisoned");
        if dataset.offsets.len() > 1 {
            Ok(dataset.offsets.pop_front().expect("offsets non-empty"))
        } else {
            dataset
                .offsets
                .front()
                .cloned()
                .ok_or_else(|| EngineError::OffsetCaptureFailed("no offset scripted".to_string()))
        }
    }
}

struct MemoryWriter {
    written: Arc<Mutex<HashMap<String, Vec<Row>>>>,
}

#[async_trait]
impl TargetWriter for MemoryWriter {
    async fn ensure_table(
        &mut self,
        table: &TableRef,
        _columns: &[MappedColumn],
        _create_if_missing: bool,
    ) -> Result<(), EngineError> {
        self.written
            .lock()
            .expect("writer store poisoned")
            .entry(table.qualified())
            .or_default();
        Ok(())
    }

    async fn write_batch(
        &mut self,
        table: &TableRef,
        _columns: &[MappedColumn],
        rows: &[Row],
    ) -> Result<(), EngineError> {
        self.written
            .lock()
            .expect("writer store poisoned")
            .entry(table.qualified())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }
}

/// Connector status with one running task.
pub fn running_status(name: &str) -> ConnectorStatus {
    ConnectorStatus {
        name: name.to_string(),
        connector: ConnectorState {
            state: RunState::Running,
            worker_id: Some("test-worker:8083".to_string()),
        },
        tasks: vec![TaskState {
            id: 0,
            state: RunState::Running,
            worker_id: Some("test-worker:8083".to_string()),
            trace: None,
        }],
        connector_type: None,
    }
}

/// Connector status with one failed task carrying a trace.
pub fn failed_task_status(name: &str, trace: &str) -> ConnectorStatus {
    ConnectorStatus {
        name: name.to_string(),
        connector: ConnectorState {
            state: RunState::Running,
            worker_id: Some("test-worker:8083".to_string()),
        },
        tasks: vec![TaskState {
            id: 0,
            state: RunState::Failed,
            worker_id: Some("test-worker:8083".to_string()),
            trace: Some(trace.to_string()),
        }],
        connector_type: None,
    }
}

/// Scriptable in-memory connector runtime.
///
/// Records every submission and deletion; statuses default to "running with
/// one task" unless a script queues something else for a connector.
#[derive(Clone, Default)]
pub struct MockRuntime {
    puts: Arc<Mutex<Vec<(String, ConnectorConfig)>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    statuses: Arc<Mutex<HashMap<String, VecDeque<ConnectorStatus>>>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a status response for one connector.
    pub fn script_status(&self, connector: &str, status: ConnectorStatus) {
        self.statuses
            .lock()
            .expect("status store poisoned")
            .entry(connector.to_string())
            .or_default()
            .push_back(status);
    }

    /// Every config submission so far, in order.
    pub fn submissions(&self) -> Vec<(String, ConnectorConfig)> {
        self.puts.lock().expect("put store poisoned").clone()
    }

    /// Number of submissions for one connector name.
    pub fn put_count(&self, connector: &str) -> usize {
        self.puts
            .lock()
            .expect("put store poisoned")
            .iter()
            .filter(|(name, _)| name == connector)
            .count()
    }

    /// Last submitted config for one connector name.
    pub fn last_config(&self, connector: &str) -> Option<ConnectorConfig> {
        self.puts
            .lock()
            .expect("put store poisoned")
            .iter()
            .rev()
            .find(|(name, _)| name == connector)
            .map(|(_, config)| config.clone())
    }

    /// Deleted connector names, in order.
    pub fn deletions(&self) -> Vec<String> {
        self.deletes.lock().expect("delete store poisoned").clone()
    }
}

#[async_trait]
impl ConnectorRuntime for MockRuntime {
    async fn put_connector_config(
        &self,
        name: &str,
        config: &ConnectorConfig,
    ) -> Result<(), ConnectError> {
        self.puts
            .lock()
            .expect("put store poisoned")
            .push((name.to_string(), config.clone()));
        Ok(())
    }

    async fn delete_connector(&self, name: &str) -> Result<(), ConnectError> {
        let submitted = self
            .puts
            .lock()
            .expect("put store poisoned")
            .iter()
            .any(|(n, _)| n == name);
        self.deletes
            .lock()
            .expect("delete store poisoned")
            .push(name.to_string());
        if submitted {
            Ok(())
        } else {
            Err(ConnectError::Api {
                status: 404,
                operation: "delete",
                connector: name.to_string(),
                body: format!("Connector {name} not found"),
            })
        }
    }

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus, ConnectError> {
        let scripted = self
            .statuses
            .lock()
            .expect("status store poisoned")
            .get_mut(name)
            .and_then(|queue| queue.pop_front());
        Ok(scripted.unwrap_or_else(|| running_status(name)))
    }

    async fn connector_config(&self, name: &str) -> Result<ConnectorConfig, ConnectError> {
        self.last_config(name).ok_or_else(|| ConnectError::Api {
            status: 404,
            operation: "get config",
            connector: name.to_string(),
            body: format!("Connector {name} not found"),
        })
    }

    async fn restart_connector(&self, _name: &str) -> Result<(), ConnectError> {
        Ok(())
    }

    async fn connector_topics(&self, name: &str) -> Result<Vec<String>, ConnectError> {
        Ok(self
            .last_config(name)
            .and_then(|config| config.get("topics").cloned())
            .map(|topics| topics.split(',').map(str::to_string).collect())
            .unwrap_or_default())
    }
}
