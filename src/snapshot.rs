//! Whole-registry snapshots
//!
//! A snapshot is the full registry state as one JSON document: every content
//! row, every subject record, and the global compatibility level. Restoring
//! resumes id sequences after the highest persisted ids.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compatibility::CompatibilityLevel;
use crate::content::StoredContent;
use crate::error::{RegistryError, Result};
use crate::schema::SubjectKey;
use crate::version::SubjectRecord;

/// Snapshot layout version written by this crate
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One subject and its record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSnapshot {
    pub subject: SubjectKey,
    #[serde(flatten)]
    pub record: SubjectRecord,
}

/// Serialized registry state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub global_compatibility: CompatibilityLevel,
    #[serde(default)]
    pub contents: Vec<StoredContent>,
    #[serde(default)]
    pub subjects: Vec<SubjectSnapshot>,
}

impl RegistrySnapshot {
    pub fn new(
        global_compatibility: CompatibilityLevel,
        contents: Vec<StoredContent>,
        subjects: Vec<(SubjectKey, SubjectRecord)>,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: Utc::now(),
            global_compatibility,
            contents,
            subjects: subjects
                .into_iter()
                .map(|(subject, record)| SubjectSnapshot { subject, record })
                .collect(),
        }
    }

    /// Highest content id, or 0 when empty
    pub fn max_content_id(&self) -> i64 {
        self.contents.iter().map(|c| c.id.0).max().unwrap_or(0)
    }

    /// Highest global id, or 0 when empty
    pub fn max_global_id(&self) -> i64 {
        self.contents.iter().map(|c| c.global_id.0).max().unwrap_or(0)
    }

    /// Write the snapshot as JSON
    pub fn write_to(&self, path: impl AsRef<Path>, pretty: bool) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        fs::write(path, content)?;
        info!(
            path = %path.display(),
            contents = self.contents.len(),
            subjects = self.subjects.len(),
            "wrote registry snapshot"
        );
        Ok(())
    }

    /// Read a snapshot written by [`RegistrySnapshot::write_to`]
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let snapshot: Self = serde_json::from_str(&content)?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(RegistryError::CorruptSnapshot(format!(
                "unsupported snapshot format version {}",
                snapshot.format_version
            )));
        }
        Ok(snapshot)
    }
}
