//! MySQL source extractor.
//!
//! Reads column metadata from `INFORMATION_SCHEMA.COLUMNS`, paginates rows
//! with limit/offset, and captures the binlog coordinates via
//! `SHOW MASTER STATUS` once the load is done. Binary logging must be
//! enabled on the source or offset capture fails.

use super::{Row as TransferRow, SourceExtractor, TableRef, Value};
use crate::error::EngineError;
use crate::pipeline::Connection;
use crate::typemap::ColumnMeta;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mysql_async::consts::ColumnType;
use mysql_async::{prelude::*, Pool, Row, Value as MySqlValue};
use offset_types::Offset;
use tracing::debug;

pub struct MySqlExtractor {
    conn: mysql_async::Conn,
    // Keeps the pool alive for the lifetime of the borrowed connection
    _pool: Pool,
}

impl MySqlExtractor {
    pub async fn connect(conn: &Connection) -> Result<Self, EngineError> {
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            conn.username, conn.secret, conn.host, conn.port, conn.database
        );

        let pool = Pool::from_url(url).map_err(|e| {
            EngineError::ConnectionUnavailable(format!(
                "mysql connection '{}': invalid connection options: {e}",
                conn.name
            ))
        })?;

        let db_conn = pool.get_conn().await.map_err(|e| {
            EngineError::ConnectionUnavailable(format!(
                "mysql connection '{}' ({}:{}): {e}",
                conn.name, conn.host, conn.port
            ))
        })?;

        Ok(Self {
            conn: db_conn,
            _pool: pool,
        })
    }
}

#[async_trait]
impl SourceExtractor for MySqlExtractor {
    async fn introspect(&mut self, table: &TableRef) -> Result<Vec<ColumnMeta>, EngineError> {
        let query = "
            SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, CHARACTER_MAXIMUM_LENGTH,
                   NUMERIC_PRECISION, NUMERIC_SCALE, IS_NULLABLE
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION";

        let rows: Vec<Row> = self
            .conn
            .exec(query, (&table.schema, &table.name))
            .await
            .map_err(|e| EngineError::SchemaIntrospectionFailed {
                table: table.qualified(),
                reason: e.to_string(),
            })?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0).ok_or_else(|| missing_meta(table, "COLUMN_NAME"))?;
            let data_type: String = row.get(1).ok_or_else(|| missing_meta(table, "DATA_TYPE"))?;
            let type_detail: String =
                row.get(2).ok_or_else(|| missing_meta(table, "COLUMN_TYPE"))?;
            let length: Option<u64> = row.get::<Option<u64>, _>(3).unwrap_or(None);
            let precision: Option<u64> = row.get::<Option<u64>, _>(4).unwrap_or(None);
            let scale: Option<u64> = row.get::<Option<u64>, _>(5).unwrap_or(None);
            let is_nullable: String =
                row.get(6).ok_or_else(|| missing_meta(table, "IS_NULLABLE"))?;

            columns.push(ColumnMeta {
                name,
                data_type,
                type_detail: Some(type_detail),
                length: length.map(|l| l.min(u32::MAX as u64) as u32),
                precision: precision.map(|p| p.min(u8::MAX as u64) as u8),
                scale: scale.map(|s| s.min(u8::MAX as u64) as u8),
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
    ) -> Result<Vec<TransferRow>, EngineError> {
        let query = format!(
            "SELECT * FROM `{}`.`{}` ORDER BY 1 LIMIT {} OFFSET {}",
            table.schema, table.name, limit, row_offset
        );

        let rows: Vec<Row> =
            self.conn
                .query(query)
                .await
                .map_err(|e| EngineError::BatchTransferFailed {
                    table: table.qualified(),
                    row_offset,
                    reason: e.to_string(),
                })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let columns = row.columns();
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
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
        let row: Option<Row> = self
            .conn
            .query_first("SHOW MASTER STATUS")
            .await
            .map_err(|e| EngineError::OffsetCaptureFailed(format!("SHOW MASTER STATUS: {e}")))?;

        let row = row.ok_or_else(|| {
            EngineError::OffsetCaptureFailed(
                "SHOW MASTER STATUS returned no row; is binary logging enabled?".to_string(),
            )
        })?;

        let file: String = row.get(0).ok_or_else(|| {
            EngineError::OffsetCaptureFailed("missing binlog file name".to_string())
        })?;
        let position: u64 = row.get(1).ok_or_else(|| {
            EngineError::OffsetCaptureFailed("missing binlog position".to_string())
        })?;

        Ok(Offset::BinlogPosition { file, position })
    }
}

fn missing_meta(table: &TableRef, column: &str) -> EngineError {
    EngineError::SchemaIntrospectionFailed {
        table: table.qualified(),
        reason: format!("missing {column} in INFORMATION_SCHEMA row"),
    }
}

/// Convert one MySQL cell to a transfer value.
///
/// MySQL's text protocol returns many column types as byte strings; the
/// column type decides how those bytes are interpreted.
fn decode_cell(row: &Row, idx: usize) -> Result<Value> {
    let columns = row.columns();
    let column = &columns[idx];

    let raw = row
        .as_ref(idx)
        .ok_or_else(|| anyhow::anyhow!("failed to read value at index {idx}"))?;

    let value = match raw {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Int(i) => Value::Int(*i),
        MySqlValue::UInt(u) => {
            if *u > i64::MAX as u64 {
                Value::Decimal(u.to_string())
            } else {
                Value::Int(*u as i64)
            }
        }
        MySqlValue::Float(f) => Value::Float(*f as f64),
        MySqlValue::Double(d) => Value::Float(*d),
        MySqlValue::Bytes(bytes) => decode_bytes(column.column_type(), bytes, column.name_str())?,
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                .ok_or_else(|| anyhow::anyhow!("invalid date in column '{}'", column.name_str()))?;
            if column.column_type() == ColumnType::MYSQL_TYPE_DATE {
                Value::Date(date)
            } else {
                let datetime = date
                    .and_hms_micro_opt(*hour as u32, *minute as u32, *second as u32, *micros)
                    .ok_or_else(|| {
                        anyhow::anyhow!("invalid datetime in column '{}'", column.name_str())
                    })?;
                Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(datetime, Utc))
            }
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            // No pure time-of-day type on the transfer path; format as text
            let sign = if *negative { "-" } else { "" };
            let total_hours = *days * 24 + (*hours as u32);
            Value::Text(format!(
                "{sign}{total_hours}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    };

    Ok(value)
}

fn decode_bytes(col_type: ColumnType, bytes: &[u8], name: std::borrow::Cow<'_, str>) -> Result<Value> {
    match col_type {
        col_type if col_type.is_character_type() => {
            Ok(Value::Text(String::from_utf8_lossy(bytes).to_string()))
        }
        ColumnType::MYSQL_TYPE_JSON => {
            let s = String::from_utf8_lossy(bytes);
            let parsed = serde_json::from_str::<serde_json::Value>(&s)?;
            Ok(Value::Json(parsed))
        }
        ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL => {
            Ok(Value::Decimal(String::from_utf8_lossy(bytes).to_string()))
        }
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG => {
            let s = String::from_utf8_lossy(bytes);
            Ok(s.parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(s.to_string())))
        }
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
            let s = String::from_utf8_lossy(bytes);
            Ok(s.parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(s.to_string())))
        }
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_DATETIME => {
            let s = String::from_utf8_lossy(bytes);
            Ok(
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| {
                        Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
                    })
                    .unwrap_or_else(|_| Value::Text(s.to_string())),
            )
        }
        ColumnType::MYSQL_TYPE_DATE => {
            let s = String::from_utf8_lossy(bytes);
            Ok(NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(Value::Date)
                .unwrap_or_else(|_| Value::Text(s.to_string())))
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_GEOMETRY => Ok(Value::Bytes(bytes.to_vec())),
        other => Err(anyhow::anyhow!(
            "unsupported MySQL column type '{:?}' for column '{}'",
            other,
            name
        )),
    }
}
