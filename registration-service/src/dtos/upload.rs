use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::response::FieldError;
use validator::Validate;

use super::validation::{self as rules, parse, Checks};
use crate::models::{FileKind, FileRecord, FileUrls, Paging};

/// Public metadata of a stored file. Disk paths are never exposed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub id: i64,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub kind: FileKind,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl FileView {
    pub fn new(record: &FileRecord, urls: &FileUrls) -> Self {
        Self {
            id: record.id,
            original_name: record.original_name.clone(),
            mime_type: record.mime_type.clone(),
            size_bytes: record.size_bytes,
            kind: record.kind,
            url: urls.url(record.id),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FileListQuery {
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(custom(function = "rules::file_kind"))]
    pub kind: Option<String>,
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100, message = "perPage must be between 1 and 100"))]
    pub per_page: Option<u32>,
}

impl FileListQuery {
    pub fn parse(&self) -> Result<(Option<FileKind>, Paging), Vec<FieldError>> {
        let mut checks = Checks::new();
        checks.absorb(self.validate());
        checks.finish()?;
        let kind: Option<FileKind> = self.kind.as_deref().map(|k| parse("kind", k)).transpose()?;
        Ok((kind, Paging::new(self.page, self.per_page)))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleteResponse {
    pub id: i64,
    pub deleted: bool,
}
