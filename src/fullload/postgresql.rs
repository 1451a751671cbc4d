//! PostgreSQL source extractor.
//!
//! Reads column metadata from `information_schema`, paginates rows with
//! limit/offset, and captures the write-ahead-log position via
//! `pg_current_wal_lsn()` once the load is done.

use super::{Row, SourceExtractor, TableRef, Value};
use crate::error::EngineError;
use crate::pipeline::Connection;
use crate::typemap::ColumnMeta;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use offset_types::Offset;
use rust_decimal::Decimal;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

pub struct PostgresExtractor {
    client: Client,
}

impl PostgresExtractor {
    /// Connect to the source and spawn the connection driver task.
    pub async fn connect(conn: &Connection) -> Result<Self, EngineError> {
        let params = format!(
            "host={} port={} user={} password={} dbname={}",
            conn.host, conn.port, conn.username, conn.secret, conn.database
        );

        let (client, connection) = tokio_postgres::connect(&params, NoTls)
            .await
            .map_err(|e| {
                EngineError::ConnectionUnavailable(format!(
                    "postgresql connection '{}' ({}:{}): {e}",
                    conn.name, conn.host, conn.port
                ))
            })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection error: {e}");
            }
        });

        Ok(Self { client })
    }
}

#[async_trait]
impl SourceExtractor for PostgresExtractor {
    async fn introspect(&mut self, table: &TableRef) -> Result<Vec<ColumnMeta>, EngineError> {
        let query = "
            SELECT column_name, data_type, character_maximum_length,
                   numeric_precision, numeric_scale, is_nullable
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position";

        let rows = self
            .client
            .query(query, &[&table.schema, &table.name])
            .await
            .map_err(|e| EngineError::SchemaIntrospectionFailed {
                table: table.qualified(),
                reason: e.to_string(),
            })?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let length: Option<i32> = row.get(2);
            let precision: Option<i32> = row.get(3);
            let scale: Option<i32> = row.get(4);
            let is_nullable: String = row.get(5);

            columns.push(ColumnMeta {
                name,
                data_type,
                type_detail: None,
                length: length.map(|l| l as u32),
                precision: precision.map(|p| p.clamp(0, u8::MAX as i32) as u8),
                scale: scale.map(|s| s.clamp(0, u8::MAX as i32) as u8),
                nullable: is_nullable == "YES",
            });
        }

        debug!("Introspected {} columns for {}", columns.len(), table);
        Ok(columns)
    }

    async fn fetch_batch(
        &mut self,
        table: &TableRef,
        row_offset: u64,
        limit: u32,
    ) -> Result<Vec<Row>, EngineError> {
        // ORDER BY 1 keeps limit/offset pagination deterministic
        let query = format!(
            "SELECT * FROM \"{}\".\"{}\" ORDER BY 1 LIMIT {} OFFSET {}",
            table.schema, table.name, limit, row_offset
        );

        let rows =
            self.client
                .query(&query, &[])
                .await
                .map_err(|e| EngineError::BatchTransferFailed {
                    table: table.qualified(),
                    row_offset,
                    reason: e.to_string(),
                })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(row.len());
            for idx in 0..row.len() {
                let value =
                    decode_cell(&row, idx).map_err(|e| EngineError::BatchTransferFailed {
                        table: table.qualified(),
                        row_offset,
                        reason: e.to_string(),
                    })?;
                values.push(value);
            }
            out.push(values);
        }
        Ok(out)
    }

    async fn capture_offset(&mut self) -> Result<Offset, EngineError> {
        let row = self
            .client
            .query_one("SELECT pg_current_wal_lsn()::text", &[])
            .await
            .map_err(|e| EngineError::OffsetCaptureFailed(format!("pg_current_wal_lsn: {e}")))?;

        let lsn: String = row
            .try_get(0)
            .map_err(|e| EngineError::OffsetCaptureFailed(e.to_string()))?;

        Ok(Offset::Lsn { lsn })
    }
}

/// Convert one PostgreSQL cell to a transfer value.
fn decode_cell(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];

    let value = match column.type_().name() {
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Int(v as i64)),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Int(v as i64)),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v as f64)),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        "numeric" => row
            .try_get::<_, Option<Decimal>>(idx)?
            .map(|d| Value::Decimal(d.to_string())),
        "text" | "varchar" | "bpchar" | "name" => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::Text)
        }
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Bytes),
        "date" => row.try_get::<_, Option<NaiveDate>>(idx)?.map(Value::Date),
        "time" => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|t| Value::Text(t.format("%H:%M:%S%.6f").to_string())),
        "timestamp" => row.try_get::<_, Option<NaiveDateTime>>(idx)?.map(|ndt| {
            Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        }),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(Value::Timestamp),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::Json),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|u| Value::Text(u.to_string())),
        other => {
            anyhow::bail!(
                "unsupported PostgreSQL column type '{}' for column '{}'",
                other,
                column.name()
            );
        }
    };

    Ok(value.unwrap_or(Value::Null))
}
