//! Full-load transfer engine.
//!
//! Copies existing rows from a source table into the target before CDC
//! streaming begins, then captures the source's replication position at the
//! instant the copy finishes. The capture must happen on the same source
//! connection immediately after the final batch, with nothing in between:
//! everything committed before the capture is already in the target, and
//! everything after it is replayed by CDC starting from the captured
//! position. That ordering is the crux of the gapless hand-off.
//!
//! Extraction and delivery sit behind the [`SourceExtractor`] and
//! [`TargetWriter`] traits. Concrete implementations exist for PostgreSQL
//! and MySQL sources and S3 targets; other families are reached through the
//! sink connector's auto-create path and return `UnsupportedFamily` here.

pub mod mysql;
pub mod postgresql;
pub mod s3;

use crate::error::EngineError;
use crate::pipeline::{Connection, SourceFamily, TargetFamily};
use crate::typemap::{map_columns, ColumnMeta, MappedColumn};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDate, Utc};
use offset_types::{CapturedOffset, Offset};
use tracing::{debug, info};

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A single cell value in transit between source and target.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numerics travel as strings so precision survives the trip
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    /// JSON rendition used by the S3 writer and diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            Value::Decimal(d) => serde_json::Value::String(d.clone()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(general_purpose::STANDARD.encode(b)),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            Value::Json(v) => v.clone(),
        }
    }
}

/// One extracted row, positionally aligned with the introspected columns.
pub type Row = Vec<Value>;

/// Reads schema, rows and the replication position from a source database.
#[async_trait]
pub trait SourceExtractor: Send {
    /// Column metadata for one table, in ordinal order.
    async fn introspect(&mut self, table: &TableRef) -> Result<Vec<ColumnMeta>, EngineError>;

    /// Fetch one batch of rows using limit/offset pagination.
    async fn fetch_batch(
        &mut self,
        table: &TableRef,
        row_offset: u64,
        limit: u32,
    ) -> Result<Vec<Row>, EngineError>;

    /// Read the source's current replication position.
    ///
    /// Called on the same connection immediately after the last batch.
    async fn capture_offset(&mut self) -> Result<Offset, EngineError>;
}

/// Creates target tables and writes row batches.
#[async_trait]
pub trait TargetWriter: Send {
    /// Create the target table from the mapped schema if requested.
    ///
    /// An existing table is left untouched; schema drift is handled out of
    /// band.
    async fn ensure_table(
        &mut self,
        table: &TableRef,
        columns: &[MappedColumn],
        create_if_missing: bool,
    ) -> Result<(), EngineError>;

    /// Append one batch of rows.
    async fn write_batch(
        &mut self,
        table: &TableRef,
        columns: &[MappedColumn],
        rows: &[Row],
    ) -> Result<(), EngineError>;
}

/// Opens extractors and writers for connections.
///
/// The production [`DriverBackend`] dispatches on the connection's family;
/// tests substitute an in-memory backend.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    async fn open_extractor(
        &self,
        conn: &Connection,
    ) -> Result<Box<dyn SourceExtractor>, EngineError>;

    async fn open_writer(&self, conn: &Connection) -> Result<Box<dyn TargetWriter>, EngineError>;
}

/// Backend backed by real database drivers.
pub struct DriverBackend;

#[async_trait]
impl TransferBackend for DriverBackend {
    async fn open_extractor(
        &self,
        conn: &Connection,
    ) -> Result<Box<dyn SourceExtractor>, EngineError> {
        match conn.source_family()? {
            SourceFamily::Postgresql => Ok(Box::new(
                postgresql::PostgresExtractor::connect(conn).await?,
            )),
            SourceFamily::Mysql => Ok(Box::new(mysql::MySqlExtractor::connect(conn).await?)),
            other => Err(EngineError::UnsupportedFamily {
                family: other.to_string(),
                concern: "full-load extraction",
            }),
        }
    }

    async fn open_writer(&self, conn: &Connection) -> Result<Box<dyn TargetWriter>, EngineError> {
        match conn.target_family()? {
            TargetFamily::S3 => Ok(Box::new(s3::S3Writer::connect(conn).await?)),
            // JDBC-class targets take full-load rows through the sink
            // connector's auto-create path; there is no native driver here
            other => Err(EngineError::UnsupportedFamily {
                family: other.to_string(),
                concern: "full-load delivery",
            }),
        }
    }
}

/// Engine knobs for one transfer run.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub batch_size: u32,
    pub create_if_missing: bool,
    pub dry_run: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            create_if_missing: true,
            dry_run: false,
        }
    }
}

/// Result of one table transfer.
#[derive(Debug, Clone)]
pub struct TableTransfer {
    pub table: TableRef,
    pub rows_copied: u64,
    /// Replication position read immediately after the last batch
    pub offset: CapturedOffset,
}

/// Copy one table from source to target and capture the replication
/// position.
///
/// Any batch failure aborts the table transfer; nothing is partially
/// committed and silently continued.
pub async fn transfer_table(
    source_family: SourceFamily,
    target_family: TargetFamily,
    extractor: &mut dyn SourceExtractor,
    writer: &mut dyn TargetWriter,
    table: &TableRef,
    options: &TransferOptions,
) -> Result<TableTransfer, EngineError> {
    let columns = extractor.introspect(table).await?;
    if columns.is_empty() {
        return Err(EngineError::SchemaIntrospectionFailed {
            table: table.qualified(),
            reason: "no columns reported; table may not exist".to_string(),
        });
    }

    let mapped = map_columns(source_family, target_family, &columns);
    debug!(
        "Mapped {} columns for {} ({source_family} -> {target_family})",
        mapped.len(),
        table
    );

    if !options.dry_run {
        writer
            .ensure_table(table, &mapped, options.create_if_missing)
            .await?;
    }

    let mut rows_copied: u64 = 0;
    loop {
        let rows = extractor
            .fetch_batch(table, rows_copied, options.batch_size)
            .await?;
        let batch_len = rows.len() as u64;

        if batch_len > 0 {
            if options.dry_run {
                debug!("Dry-run: would write {} rows into {}", batch_len, table);
            } else {
                writer.write_batch(table, &mapped, &rows).await?;
            }
            rows_copied += batch_len;
        }

        if batch_len < options.batch_size as u64 {
            break;
        }
    }

    // The offset read must directly follow the final batch; do not reorder
    // or interleave other statements here.
    let offset = extractor.capture_offset().await?;
    let captured = CapturedOffset::new(offset, Utc::now());

    info!(
        "Transferred {} rows from {} (offset {})",
        rows_copied,
        table,
        captured.offset.to_cli_string()
    );

    Ok(TableTransfer {
        table: table.clone(),
        rows_copied,
        offset: captured,
    })
}
