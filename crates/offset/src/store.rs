//! Durable offset storage.
//!
//! Captured offsets are persisted as one JSON file per pipeline so a
//! restarted process can resume a pipeline without re-running a completed
//! full load. The store enforces the never-backward invariant: a save that
//! would rewind a pipeline's offset (or change its family) is rejected.

use crate::{CapturedOffset, OffsetError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// On-disk representation of a pipeline's captured offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOffset {
    pub pipeline: String,
    pub captured: CapturedOffset,
    pub updated_at: DateTime<Utc>,
}

/// Filesystem-backed offset store.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, pipeline: &str) -> PathBuf {
        // Pipeline names are operator-chosen; keep file names shell-safe
        let safe: String = pipeline
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("offset_{safe}.json"))
    }

    /// Persist a pipeline's captured offset.
    ///
    /// Rejects saves that would move the offset backward or change its
    /// family relative to what is already stored.
    pub fn save(&self, pipeline: &str, captured: &CapturedOffset) -> Result<(), OffsetError> {
        if let Some(existing) = self.load(pipeline)? {
            match existing.offset.partial_cmp_same_family(&captured.offset) {
                None => {
                    return Err(OffsetError::FamilyMismatch {
                        pipeline: pipeline.to_string(),
                        stored: existing.offset.to_cli_string(),
                        attempted: captured.offset.to_cli_string(),
                    })
                }
                Some(Ordering::Greater) => {
                    return Err(OffsetError::Regression {
                        pipeline: pipeline.to_string(),
                        stored: existing.offset.to_cli_string(),
                        attempted: captured.offset.to_cli_string(),
                    })
                }
                Some(_) => {}
            }
        }

        std::fs::create_dir_all(&self.dir)?;

        let stored = StoredOffset {
            pipeline: pipeline.to_string(),
            captured: captured.clone(),
            updated_at: Utc::now(),
        };

        let path = self.path_for(pipeline);
        std::fs::write(&path, serde_json::to_string_pretty(&stored)?)?;

        tracing::info!(
            "Persisted offset for pipeline '{}' to {}: {}",
            pipeline,
            path.display(),
            captured.offset.to_cli_string()
        );

        Ok(())
    }

    /// Load a pipeline's captured offset, if one was ever persisted.
    pub fn load(&self, pipeline: &str) -> Result<Option<CapturedOffset>, OffsetError> {
        let path = self.path_for(pipeline);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredOffset = serde_json::from_str(&content)?;
        Ok(Some(stored.captured))
    }
}
