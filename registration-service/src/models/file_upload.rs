use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::FileKind;
use crate::config::StorageConfig;

/// Metadata of an uploaded file.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: i64,
    pub original_name: String,
    pub stored_name: String,
    /// Path relative to the upload root, e.g. `uploads/documents/essay-<uuid>.pdf`.
    pub path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub kind: FileKind,
    pub created_at: DateTime<Utc>,
}

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub original_name: String,
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileStatistics {
    pub total_files: i64,
    pub total_bytes: i64,
    pub by_kind: Vec<KindCount>,
}

#[derive(Debug, Clone, Serialize, PartialEq, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KindCount {
    pub kind: FileKind,
    pub files: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub scanned: usize,
    pub removed: Vec<String>,
}

/// Builds public file URLs.
#[derive(Debug, Clone)]
pub struct FileUrls {
    base: String,
}

impl FileUrls {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(storage.backend_base_url.as_str())
    }

    pub fn url(&self, file_id: i64) -> String {
        format!("{}/api/uploads/{}", self.base, file_id)
    }
}
