//! S3 target writer.
//!
//! Delivers full-load batches as JSONL objects under
//! `{prefix}{schema}/{table}/part-NNNNN.jsonl`, one object per batch, plus a
//! `_schema.json` manifest describing the mapped columns. The connection's
//! `database` field names the bucket; a `region` option overrides the
//! environment default.

use super::{Row, TableRef, TargetWriter};
use crate::error::EngineError;
use crate::pipeline::Connection;
use crate::typemap::MappedColumn;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use std::collections::HashMap;
use tracing::{debug, info};

pub struct S3Writer {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    // Next part number per table, so repeated batches don't overwrite
    parts: HashMap<String, u32>,
}

impl S3Writer {
    pub async fn connect(conn: &Connection) -> Result<Self, EngineError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = conn.option("region") {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;
        let client = aws_sdk_s3::Client::new(&sdk_config);

        let mut prefix = conn.option("prefix").unwrap_or("").to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }

        Ok(Self {
            client,
            bucket: conn.database.clone(),
            prefix,
            parts: HashMap::new(),
        })
    }

    fn table_prefix(&self, table: &TableRef) -> String {
        format!("{}{}/{}", self.prefix, table.schema, table.name)
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), EngineError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| EngineError::ConnectionUnavailable(format!(
                "failed to write s3://{}/{}: {e}",
                self.bucket, key
            )))?;
        Ok(())
    }
}

#[async_trait]
impl TargetWriter for S3Writer {
    async fn ensure_table(
        &mut self,
        table: &TableRef,
        columns: &[MappedColumn],
        create_if_missing: bool,
    ) -> Result<(), EngineError> {
        if !create_if_missing {
            return Ok(());
        }

        // S3 has no tables; the schema manifest is what downstream readers
        // treat as the table definition
        let manifest = serde_json::json!({
            "table": table.qualified(),
            "columns": columns
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "name": c.name,
                        "type": c.target_type,
                        "nullable": c.nullable,
                    })
                })
                .collect::<Vec<_>>(),
        });

        let key = format!("{}/_schema.json", self.table_prefix(table));
        let body = serde_json::to_vec_pretty(&manifest).map_err(|e| {
            EngineError::BatchTransferFailed {
                table: table.qualified(),
                row_offset: 0,
                reason: format!("failed to encode schema manifest: {e}"),
            }
        })?;

        self.put(&key, body).await?;
        info!("Wrote schema manifest s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn write_batch(
        &mut self,
        table: &TableRef,
        columns: &[MappedColumn],
        rows: &[Row],
    ) -> Result<(), EngineError> {
        let part = {
            let counter = self.parts.entry(table.qualified()).or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };
        let key = format!("{}/part-{:05}.jsonl", self.table_prefix(table), part);

        let mut body = Vec::new();
        for row in rows {
            let mut object = serde_json::Map::with_capacity(columns.len());
            for (column, value) in columns.iter().zip(row.iter()) {
                object.insert(column.name.clone(), value.to_json());
            }
            let line =
                serde_json::to_vec(&serde_json::Value::Object(object)).map_err(|e| {
                    EngineError::BatchTransferFailed {
                        table: table.qualified(),
                        row_offset: 0,
                        reason: format!("failed to encode row: {e}"),
                    }
                })?;
            body.extend_from_slice(&line);
            body.push(b'\n');
        }

        self.put(&key, body).await?;
        debug!("Wrote {} rows to s3://{}/{}", rows.len(), self.bucket, key);
        Ok(())
    }
}
