//! Type mapping tables.
//!
//! Pure functions that carry a source column's type across a (source family,
//! target family) pair. Source types are first parsed into a [`LogicalType`]
//! and then rendered to the target's DDL. Types the tables don't know fall
//! back to a wide text type rather than failing the transfer.
//!
//! Numeric types with explicit precision/scale keep both across the round
//! trip; the parse functions for target DDL exist so that property can be
//! checked, not because the engine reads target schemas.

use crate::pipeline::{SourceFamily, TargetFamily};

/// Column metadata as introspected from a source database.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    /// Canonical type name, e.g. `numeric`, `varchar`, `TIMESTAMP`
    pub data_type: String,
    /// Full type spelling when the source reports one, e.g. `tinyint(1)`
    pub type_detail: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: bool,
}

/// Database-agnostic column type.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Decimal { precision: u8, scale: u8 },
    Float,
    Double,
    Char { length: u32 },
    VarChar { length: u32 },
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Blob,
    Json,
    Uuid,
    /// Source type the tables don't know; renders as a wide text type
    Unmapped(String),
}

/// A source column mapped for a specific target family.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedColumn {
    pub name: String,
    pub logical: LogicalType,
    pub target_type: String,
    pub nullable: bool,
}

/// Map a full column list for the given family pair.
pub fn map_columns(
    source: SourceFamily,
    target: TargetFamily,
    columns: &[ColumnMeta],
) -> Vec<MappedColumn> {
    columns
        .iter()
        .map(|col| {
            let logical = parse_source_type(source, col);
            let target_type = render_target_type(target, &logical);
            MappedColumn {
                name: col.name.clone(),
                logical,
                target_type,
                nullable: col.nullable,
            }
        })
        .collect()
}

/// Parse a source column's reported type into a [`LogicalType`].
pub fn parse_source_type(family: SourceFamily, col: &ColumnMeta) -> LogicalType {
    match family {
        SourceFamily::Postgresql => postgresql_type(col),
        SourceFamily::Mysql => mysql_type(col),
        SourceFamily::Sqlserver => sqlserver_type(col),
        SourceFamily::Oracle => oracle_type(col),
        SourceFamily::As400 => as400_type(col),
    }
}

fn decimal_of(col: &ColumnMeta) -> LogicalType {
    LogicalType::Decimal {
        precision: col.precision.unwrap_or(38),
        scale: col.scale.unwrap_or(0),
    }
}

fn varchar_of(col: &ColumnMeta) -> LogicalType {
    match col.length {
        Some(length) => LogicalType::VarChar { length },
        None => LogicalType::Text,
    }
}

fn char_of(col: &ColumnMeta) -> LogicalType {
    LogicalType::Char {
        length: col.length.unwrap_or(1),
    }
}

fn postgresql_type(col: &ColumnMeta) -> LogicalType {
    match col.data_type.to_uppercase().as_str() {
        "BOOLEAN" | "BOOL" => LogicalType::Boolean,
        "SMALLINT" | "INT2" => LogicalType::SmallInt,
        "INTEGER" | "INT" | "INT4" | "SERIAL" => LogicalType::Integer,
        "BIGINT" | "INT8" | "BIGSERIAL" => LogicalType::BigInt,
        "NUMERIC" | "DECIMAL" => decimal_of(col),
        "REAL" | "FLOAT4" => LogicalType::Float,
        "DOUBLE PRECISION" | "FLOAT8" => LogicalType::Double,
        "CHARACTER" | "CHAR" | "BPCHAR" => char_of(col),
        "CHARACTER VARYING" | "VARCHAR" => varchar_of(col),
        "TEXT" | "NAME" => LogicalType::Text,
        "DATE" => LogicalType::Date,
        "TIME" | "TIME WITHOUT TIME ZONE" => LogicalType::Time,
        "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => LogicalType::Timestamp,
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => LogicalType::TimestampTz,
        "BYTEA" => LogicalType::Blob,
        "JSON" | "JSONB" => LogicalType::Json,
        "UUID" => LogicalType::Uuid,
        _ => LogicalType::Unmapped(col.data_type.clone()),
    }
}

fn mysql_type(col: &ColumnMeta) -> LogicalType {
    match col.data_type.to_uppercase().as_str() {
        "BOOLEAN" | "BOOL" => LogicalType::Boolean,
        "TINYINT" => {
            // TINYINT(1) is the conventional MySQL boolean
            let detail = col.type_detail.as_deref().unwrap_or("");
            if detail.to_lowercase().starts_with("tinyint(1)") {
                LogicalType::Boolean
            } else {
                LogicalType::SmallInt
            }
        }
        "SMALLINT" => LogicalType::SmallInt,
        "INT" | "INTEGER" | "MEDIUMINT" => LogicalType::Integer,
        "BIGINT" => LogicalType::BigInt,
        "DECIMAL" | "NUMERIC" => decimal_of(col),
        "FLOAT" => LogicalType::Float,
        "DOUBLE" | "REAL" => LogicalType::Double,
        "CHAR" => char_of(col),
        "VARCHAR" => varchar_of(col),
        "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => LogicalType::Text,
        "DATE" => LogicalType::Date,
        "TIME" => LogicalType::Time,
        "DATETIME" | "TIMESTAMP" => LogicalType::Timestamp,
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            LogicalType::Blob
        }
        "JSON" => LogicalType::Json,
        _ => LogicalType::Unmapped(col.data_type.clone()),
    }
}

fn sqlserver_type(col: &ColumnMeta) -> LogicalType {
    match col.data_type.to_uppercase().as_str() {
        "BIT" => LogicalType::Boolean,
        "TINYINT" | "SMALLINT" => LogicalType::SmallInt,
        "INT" => LogicalType::Integer,
        "BIGINT" => LogicalType::BigInt,
        "DECIMAL" | "NUMERIC" | "MONEY" | "SMALLMONEY" => decimal_of(col),
        "REAL" => LogicalType::Float,
        "FLOAT" => LogicalType::Double,
        "CHAR" | "NCHAR" => char_of(col),
        "VARCHAR" | "NVARCHAR" => varchar_of(col),
        "TEXT" | "NTEXT" | "XML" => LogicalType::Text,
        "DATE" => LogicalType::Date,
        "TIME" => LogicalType::Time,
        "DATETIME" | "DATETIME2" | "SMALLDATETIME" => LogicalType::Timestamp,
        "DATETIMEOFFSET" => LogicalType::TimestampTz,
        "BINARY" | "VARBINARY" | "IMAGE" => LogicalType::Blob,
        "UNIQUEIDENTIFIER" => LogicalType::Uuid,
        _ => LogicalType::Unmapped(col.data_type.clone()),
    }
}

fn oracle_type(col: &ColumnMeta) -> LogicalType {
    match col.data_type.to_uppercase().as_str() {
        "NUMBER" => match (col.precision, col.scale) {
            // NUMBER with no scale is integral; size by precision
            (Some(p), Some(0)) | (Some(p), None) if p <= 4 => LogicalType::SmallInt,
            (Some(p), Some(0)) | (Some(p), None) if p <= 9 => LogicalType::Integer,
            (Some(p), Some(0)) | (Some(p), None) if p <= 18 => LogicalType::BigInt,
            _ => decimal_of(col),
        },
        // ANSI aliases for NUMBER
        "DECIMAL" | "NUMERIC" => decimal_of(col),
        "BINARY_FLOAT" => LogicalType::Float,
        "BINARY_DOUBLE" | "FLOAT" => LogicalType::Double,
        "CHAR" | "NCHAR" => char_of(col),
        "VARCHAR2" | "NVARCHAR2" => varchar_of(col),
        "CLOB" | "NCLOB" | "LONG" => LogicalType::Text,
        // Oracle DATE carries a time component
        "DATE" => LogicalType::Timestamp,
        "TIMESTAMP" => LogicalType::Timestamp,
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMP WITH LOCAL TIME ZONE" => LogicalType::TimestampTz,
        "BLOB" | "RAW" | "LONG RAW" => LogicalType::Blob,
        _ => LogicalType::Unmapped(col.data_type.clone()),
    }
}

fn as400_type(col: &ColumnMeta) -> LogicalType {
    match col.data_type.to_uppercase().as_str() {
        "SMALLINT" => LogicalType::SmallInt,
        "INTEGER" | "INT" => LogicalType::Integer,
        "BIGINT" => LogicalType::BigInt,
        "DECIMAL" | "NUMERIC" => decimal_of(col),
        "REAL" => LogicalType::Float,
        "DOUBLE" | "FLOAT" => LogicalType::Double,
        "CHAR" | "CHARACTER" | "GRAPHIC" => char_of(col),
        "VARCHAR" | "VARGRAPHIC" => varchar_of(col),
        "CLOB" | "DBCLOB" => LogicalType::Text,
        "DATE" => LogicalType::Date,
        "TIME" => LogicalType::Time,
        "TIMESTAMP" => LogicalType::Timestamp,
        "BINARY" | "VARBINARY" | "BLOB" => LogicalType::Blob,
        _ => LogicalType::Unmapped(col.data_type.clone()),
    }
}

/// Render a logical type as target DDL (or, for S3, as the manifest token).
pub fn render_target_type(family: TargetFamily, logical: &LogicalType) -> String {
    match family {
        TargetFamily::Sqlserver => sqlserver_ddl(logical),
        TargetFamily::Snowflake => snowflake_ddl(logical),
        TargetFamily::S3 => manifest_token(logical),
    }
}

/// SQL Server NVARCHAR columns cap at 4000 characters before MAX kicks in.
const SQLSERVER_NVARCHAR_MAX: u32 = 4000;

fn sqlserver_ddl(logical: &LogicalType) -> String {
    match logical {
        LogicalType::Boolean => "BIT".to_string(),
        LogicalType::SmallInt => "SMALLINT".to_string(),
        LogicalType::Integer => "INT".to_string(),
        LogicalType::BigInt => "BIGINT".to_string(),
        LogicalType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
        LogicalType::Float => "REAL".to_string(),
        LogicalType::Double => "FLOAT".to_string(),
        LogicalType::Char { length } => format!("NCHAR({length})"),
        LogicalType::VarChar { length } => {
            if *length > SQLSERVER_NVARCHAR_MAX {
                "NVARCHAR(MAX)".to_string()
            } else {
                format!("NVARCHAR({length})")
            }
        }
        LogicalType::Text | LogicalType::Json | LogicalType::Unmapped(_) => {
            "NVARCHAR(MAX)".to_string()
        }
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Time => "TIME".to_string(),
        LogicalType::Timestamp => "DATETIME2".to_string(),
        LogicalType::TimestampTz => "DATETIMEOFFSET".to_string(),
        LogicalType::Blob => "VARBINARY(MAX)".to_string(),
        LogicalType::Uuid => "UNIQUEIDENTIFIER".to_string(),
    }
}

fn snowflake_ddl(logical: &LogicalType) -> String {
    match logical {
        LogicalType::Boolean => "BOOLEAN".to_string(),
        LogicalType::SmallInt => "SMALLINT".to_string(),
        LogicalType::Integer => "INTEGER".to_string(),
        LogicalType::BigInt => "BIGINT".to_string(),
        LogicalType::Decimal { precision, scale } => format!("NUMBER({precision},{scale})"),
        LogicalType::Float => "FLOAT4".to_string(),
        LogicalType::Double => "FLOAT8".to_string(),
        LogicalType::Char { length } => format!("CHAR({length})"),
        LogicalType::VarChar { length } => format!("VARCHAR({length})"),
        LogicalType::Text | LogicalType::Unmapped(_) => "VARCHAR".to_string(),
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Time => "TIME".to_string(),
        LogicalType::Timestamp => "TIMESTAMP_NTZ".to_string(),
        LogicalType::TimestampTz => "TIMESTAMP_TZ".to_string(),
        LogicalType::Blob => "BINARY".to_string(),
        LogicalType::Json => "VARIANT".to_string(),
        LogicalType::Uuid => "VARCHAR(36)".to_string(),
    }
}

fn manifest_token(logical: &LogicalType) -> String {
    match logical {
        LogicalType::Boolean => "boolean".to_string(),
        LogicalType::SmallInt => "smallint".to_string(),
        LogicalType::Integer => "integer".to_string(),
        LogicalType::BigInt => "bigint".to_string(),
        LogicalType::Decimal { precision, scale } => format!("decimal({precision},{scale})"),
        LogicalType::Float => "float".to_string(),
        LogicalType::Double => "double".to_string(),
        LogicalType::Char { length } => format!("char({length})"),
        LogicalType::VarChar { length } => format!("varchar({length})"),
        LogicalType::Text | LogicalType::Unmapped(_) => "string".to_string(),
        LogicalType::Date => "date".to_string(),
        LogicalType::Time => "time".to_string(),
        LogicalType::Timestamp => "timestamp".to_string(),
        LogicalType::TimestampTz => "timestamptz".to_string(),
        LogicalType::Blob => "binary".to_string(),
        LogicalType::Json => "json".to_string(),
        LogicalType::Uuid => "uuid".to_string(),
    }
}

/// Parse target DDL back into a [`LogicalType`].
///
/// Exists to check the round-trip property on numeric precision; not used
/// on the transfer path.
pub fn parse_target_type(family: TargetFamily, ddl: &str) -> LogicalType {
    let (name, args) = split_type(ddl);
    let name = name.to_uppercase();
    match family {
        TargetFamily::Sqlserver => match name.as_str() {
            "BIT" => LogicalType::Boolean,
            "SMALLINT" => LogicalType::SmallInt,
            "INT" => LogicalType::Integer,
            "BIGINT" => LogicalType::BigInt,
            "DECIMAL" | "NUMERIC" => decimal_args(&args),
            "REAL" => LogicalType::Float,
            "FLOAT" => LogicalType::Double,
            "NCHAR" | "CHAR" => LogicalType::Char {
                length: first_arg(&args).unwrap_or(1),
            },
            "NVARCHAR" | "VARCHAR" => match first_arg(&args) {
                Some(length) => LogicalType::VarChar { length },
                None => LogicalType::Text,
            },
            "DATE" => LogicalType::Date,
            "TIME" => LogicalType::Time,
            "DATETIME2" | "DATETIME" => LogicalType::Timestamp,
            "DATETIMEOFFSET" => LogicalType::TimestampTz,
            "VARBINARY" | "BINARY" => LogicalType::Blob,
            "UNIQUEIDENTIFIER" => LogicalType::Uuid,
            _ => LogicalType::Unmapped(ddl.to_string()),
        },
        TargetFamily::Snowflake => match name.as_str() {
            "BOOLEAN" => LogicalType::Boolean,
            "SMALLINT" => LogicalType::SmallInt,
            "INTEGER" | "INT" => LogicalType::Integer,
            "BIGINT" => LogicalType::BigInt,
            "NUMBER" | "DECIMAL" | "NUMERIC" => decimal_args(&args),
            "FLOAT4" => LogicalType::Float,
            "FLOAT8" | "FLOAT" | "DOUBLE" => LogicalType::Double,
            "CHAR" => LogicalType::Char {
                length: first_arg(&args).unwrap_or(1),
            },
            "VARCHAR" => match first_arg(&args) {
                Some(36) => LogicalType::Uuid,
                Some(length) => LogicalType::VarChar { length },
                None => LogicalType::Text,
            },
            "DATE" => LogicalType::Date,
            "TIME" => LogicalType::Time,
            "TIMESTAMP_NTZ" | "TIMESTAMP" => LogicalType::Timestamp,
            "TIMESTAMP_TZ" => LogicalType::TimestampTz,
            "BINARY" => LogicalType::Blob,
            "VARIANT" => LogicalType::Json,
            _ => LogicalType::Unmapped(ddl.to_string()),
        },
        TargetFamily::S3 => match name.as_str() {
            "BOOLEAN" => LogicalType::Boolean,
            "SMALLINT" => LogicalType::SmallInt,
            "INTEGER" => LogicalType::Integer,
            "BIGINT" => LogicalType::BigInt,
            "DECIMAL" => decimal_args(&args),
            "FLOAT" => LogicalType::Float,
            "DOUBLE" => LogicalType::Double,
            "CHAR" => LogicalType::Char {
                length: first_arg(&args).unwrap_or(1),
            },
            "VARCHAR" => LogicalType::VarChar {
                length: first_arg(&args).unwrap_or(0),
            },
            "STRING" => LogicalType::Text,
            "DATE" => LogicalType::Date,
            "TIME" => LogicalType::Time,
            "TIMESTAMP" => LogicalType::Timestamp,
            "TIMESTAMPTZ" => LogicalType::TimestampTz,
            "BINARY" => LogicalType::Blob,
            "JSON" => LogicalType::Json,
            "UUID" => LogicalType::Uuid,
            _ => LogicalType::Unmapped(ddl.to_string()),
        },
    }
}

fn split_type(ddl: &str) -> (String, Vec<String>) {
    match ddl.split_once('(') {
        Some((name, rest)) => {
            let args = rest
                .trim_end_matches(')')
                .split(',')
                .map(|a| a.trim().to_string())
                .collect();
            (name.trim().to_string(), args)
        }
        None => (ddl.trim().to_string(), Vec::new()),
    }
}

fn first_arg(args: &[String]) -> Option<u32> {
    args.first().and_then(|a| a.parse().ok())
}

fn decimal_args(args: &[String]) -> LogicalType {
    let precision = args
        .first()
        .and_then(|a| a.parse().ok())
        .unwrap_or(38u8);
    let scale = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(0u8);
    LogicalType::Decimal { precision, scale }
}
