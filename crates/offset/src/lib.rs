//! Replication offsets for pipesync
//!
//! Every source database family marks a position in its change history with
//! its own coordinate system: PostgreSQL and SQL Server use log sequence
//! numbers, MySQL uses binlog file/position pairs, Oracle uses System Change
//! Numbers, and AS/400 uses journal sequence numbers. This crate provides the
//! family-tagged [`Offset`] type, the [`CapturedOffset`] wrapper that records
//! when a position was read, and a filesystem store for durable offsets.
//!
//! Consumers outside the full-load engine never inspect the family-specific
//! representation. They only care about presence, ordering within the same
//! family (offsets must never move backward for a pipeline), and the CLI
//! string round-trip used for logging and operator tooling.
//!
//! # Offset string formats
//!
//! - PostgreSQL / SQL Server: `lsn:0/16B3748` or `lsn:00000029:00000e10:0005`
//! - MySQL: `binlog:mysql-bin.000003:4571`
//! - Oracle: `scn:3842764`
//! - AS/400: `journal:90211`

mod store;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub use store::{FilesystemStore, StoredOffset};

/// Error type for offset parsing, ordering and storage.
#[derive(Debug, thiserror::Error)]
pub enum OffsetError {
    /// Offset string could not be parsed
    #[error("invalid offset string '{input}': {reason}")]
    Parse { input: String, reason: String },

    /// A newly captured offset is behind the stored one
    #[error("offset for pipeline '{pipeline}' would move backward: stored {stored}, attempted {attempted}")]
    Regression {
        pipeline: String,
        stored: String,
        attempted: String,
    },

    /// A newly captured offset belongs to a different family than the stored one
    #[error("offset family changed for pipeline '{pipeline}': stored {stored}, attempted {attempted}")]
    FamilyMismatch {
        pipeline: String,
        stored: String,
        attempted: String,
    },

    /// Error accessing the offset store
    #[error("failed to access offset store: {0}")]
    Io(#[from] std::io::Error),

    /// Error encoding or decoding an offset file
    #[error("failed to encode or decode offset file: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A replication position in a source database's change history.
///
/// Stored and transported as an opaque tagged value; only the full-load
/// engine constructs these, and only this crate interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Offset {
    /// Write-ahead-log position (PostgreSQL `X/Y` form or SQL Server
    /// colon-separated hex form)
    Lsn { lsn: String },

    /// MySQL binlog coordinates
    BinlogPosition { file: String, position: u64 },

    /// Oracle System Change Number
    Scn { scn: u64 },

    /// AS/400 journal sequence number
    JournalOffset { sequence: u64 },
}

impl Offset {
    /// Family tag used in CLI strings and file names.
    pub fn family(&self) -> &'static str {
        match self {
            Offset::Lsn { .. } => "lsn",
            Offset::BinlogPosition { .. } => "binlog",
            Offset::Scn { .. } => "scn",
            Offset::JournalOffset { .. } => "journal",
        }
    }

    /// Convert to a string representation for CLI arguments and logs.
    pub fn to_cli_string(&self) -> String {
        match self {
            Offset::Lsn { lsn } => format!("lsn:{lsn}"),
            Offset::BinlogPosition { file, position } => format!("binlog:{file}:{position}"),
            Offset::Scn { scn } => format!("scn:{scn}"),
            Offset::JournalOffset { sequence } => format!("journal:{sequence}"),
        }
    }

    /// Parse an offset from its CLI string representation.
    pub fn from_cli_string(s: &str) -> Result<Self, OffsetError> {
        let (family, rest) = s.split_once(':').ok_or_else(|| OffsetError::Parse {
            input: s.to_string(),
            reason: "expected '<family>:<position>'".to_string(),
        })?;

        match family {
            "lsn" => {
                if rest.is_empty() {
                    return Err(OffsetError::Parse {
                        input: s.to_string(),
                        reason: "empty LSN".to_string(),
                    });
                }
                Ok(Offset::Lsn {
                    lsn: rest.to_string(),
                })
            }
            "binlog" => {
                let (file, position) =
                    rest.rsplit_once(':').ok_or_else(|| OffsetError::Parse {
                        input: s.to_string(),
                        reason: "expected 'binlog:<file>:<position>'".to_string(),
                    })?;
                let position = position.parse::<u64>().map_err(|e| OffsetError::Parse {
                    input: s.to_string(),
                    reason: format!("invalid binlog position: {e}"),
                })?;
                Ok(Offset::BinlogPosition {
                    file: file.to_string(),
                    position,
                })
            }
            "scn" => {
                let scn = rest.parse::<u64>().map_err(|e| OffsetError::Parse {
                    input: s.to_string(),
                    reason: format!("invalid SCN: {e}"),
                })?;
                Ok(Offset::Scn { scn })
            }
            "journal" => {
                let sequence = rest.parse::<u64>().map_err(|e| OffsetError::Parse {
                    input: s.to_string(),
                    reason: format!("invalid journal sequence: {e}"),
                })?;
                Ok(Offset::JournalOffset { sequence })
            }
            other => Err(OffsetError::Parse {
                input: s.to_string(),
                reason: format!("unknown offset family: {other}"),
            }),
        }
    }

    /// Compare two offsets of the same family.
    ///
    /// Returns `None` when the families differ; families are not comparable
    /// and a family change for one pipeline is always an error upstream.
    pub fn partial_cmp_same_family(&self, other: &Offset) -> Option<Ordering> {
        match (self, other) {
            (Offset::Lsn { lsn: a }, Offset::Lsn { lsn: b }) => Some(compare_lsn(a, b)),
            (
                Offset::BinlogPosition {
                    file: af,
                    position: ap,
                },
                Offset::BinlogPosition {
                    file: bf,
                    position: bp,
                },
            ) => Some(af.cmp(bf).then(ap.cmp(bp))),
            (Offset::Scn { scn: a }, Offset::Scn { scn: b }) => Some(a.cmp(b)),
            (Offset::JournalOffset { sequence: a }, Offset::JournalOffset { sequence: b }) => {
                Some(a.cmp(b))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_cli_string())
    }
}

/// Compare two LSN strings.
///
/// PostgreSQL LSNs (`high/low` hex pair) are compared numerically. SQL Server
/// LSNs use fixed-width colon-separated hex segments, so after stripping the
/// separators an ordinary string comparison preserves order. Mixed or unknown
/// forms fall back to length-then-lexicographic comparison, which orders
/// plain hex strings of differing magnitude correctly.
fn compare_lsn(a: &str, b: &str) -> Ordering {
    if let (Some(ka), Some(kb)) = (pg_lsn_key(a), pg_lsn_key(b)) {
        return ka.cmp(&kb);
    }
    let na = normalize_hex_lsn(a);
    let nb = normalize_hex_lsn(b);
    na.len().cmp(&nb.len()).then(na.cmp(&nb))
}

/// Parse a PostgreSQL-style `high/low` LSN into a sortable pair.
fn pg_lsn_key(lsn: &str) -> Option<(u64, u64)> {
    let (high, low) = lsn.split_once('/')?;
    let high = u64::from_str_radix(high, 16).ok()?;
    let low = u64::from_str_radix(low, 16).ok()?;
    Some((high, low))
}

/// Strip separators and leading zeros from a hex LSN, uppercased.
fn normalize_hex_lsn(lsn: &str) -> String {
    let stripped: String = lsn
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let trimmed = stripped.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A replication position together with the instant it was read.
///
/// The capture timestamp is diagnostic only; ordering decisions always use
/// the offset itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedOffset {
    pub offset: Offset,
    pub captured_at: DateTime<Utc>,
}

impl CapturedOffset {
    pub fn new(offset: Offset, captured_at: DateTime<Utc>) -> Self {
        Self {
            offset,
            captured_at,
        }
    }
}

impl std::fmt::Display for CapturedOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (captured {})",
            self.offset.to_cli_string(),
            self.captured_at.to_rfc3339()
        )
    }
}
