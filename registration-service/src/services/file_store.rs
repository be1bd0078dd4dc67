//! Uploaded file storage: metadata in `file_uploads`, content on local disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::FileStoreError;
use crate::models::{
    CleanupReport, FileKind, FileRecord, FileStatistics, KindCount, NewUpload, Page, Paging,
};

pub const DOCUMENTS_DIR: &str = "uploads/documents";
pub const IMAGES_DIR: &str = "uploads/images";

/// Files younger than this may belong to an upload whose row is not yet
/// committed and are left alone by the orphan sweep.
pub const ORPHAN_GRACE: Duration = Duration::from_secs(10 * 60);

const TEMP_EXTENSION: &str = "part";

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Validate and persist an upload.
    async fn put(&self, upload: NewUpload, kind: FileKind) -> Result<FileRecord, FileStoreError>;

    async fn get(&self, id: i64) -> Result<Option<FileRecord>, FileStoreError>;

    /// Metadata and content.
    async fn read(&self, id: i64) -> Result<Option<(FileRecord, Vec<u8>)>, FileStoreError>;

    async fn delete(&self, id: i64) -> Result<bool, FileStoreError>;

    async fn exists_by_path(&self, path: &str) -> Result<bool, FileStoreError>;

    async fn list_by_kind(
        &self,
        kind: Option<FileKind>,
        paging: Paging,
    ) -> Result<Page<FileRecord>, FileStoreError>;

    async fn statistics(&self) -> Result<FileStatistics, FileStoreError>;

    /// Remove files on disk that have no metadata row.
    async fn cleanup_orphans(&self) -> Result<CleanupReport, FileStoreError>;
}

/// Detect the content type from magic bytes, falling back to the declared type.
pub fn sniff_mime(bytes: &[u8], declared: Option<&str>) -> String {
    let sniffed = if bytes.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    };

    match sniffed {
        Some(mime) => mime.to_string(),
        None => declared
            .map(|d| d.split(';').next().unwrap_or(d).trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

/// Enforce the size and content policy of `kind`, returning the accepted MIME type.
pub fn check_upload(kind: FileKind, upload: &NewUpload, max_bytes: u64) -> Result<String, FileStoreError> {
    if upload.bytes.is_empty() {
        return Err(FileStoreError::Empty);
    }
    if upload.bytes.len() as u64 > max_bytes {
        return Err(FileStoreError::TooLarge { limit: max_bytes });
    }
    let mime = sniff_mime(&upload.bytes, upload.declared_mime.as_deref());
    if !kind.accepts(&mime) {
        return Err(FileStoreError::Rejected {
            kind,
            expected: kind.policy_description(),
            actual: mime,
        });
    }
    Ok(mime)
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn directory_for(mime: &str) -> &'static str {
    if mime.starts_with("image/") {
        IMAGES_DIR
    } else {
        DOCUMENTS_DIR
    }
}

/// Keep only the final path component and cap the length.
fn clean_original_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let base = if base.is_empty() { "upload" } else { base };
    base.chars().take(255).collect()
}

/// Upload directory tree rooted at the configured upload root.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_layout(&self) -> Result<(), FileStoreError> {
        fs::create_dir_all(self.root.join(DOCUMENTS_DIR)).await?;
        fs::create_dir_all(self.root.join(IMAGES_DIR)).await?;
        Ok(())
    }

    /// Relative path for a new file of `kind` with content type `mime`.
    pub fn allocate(&self, kind: FileKind, mime: &str) -> (String, String) {
        let stored_name = format!(
            "{}-{}.{}",
            kind.as_str().to_lowercase().replace('_', "-"),
            Uuid::new_v4(),
            extension_for(mime)
        );
        let relative = format!("{}/{}", directory_for(mime), stored_name);
        (stored_name, relative)
    }

    /// Write through a temporary file and rename into place.
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        let target = self.root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = target.with_extension(TEMP_EXTENSION);

        if let Err(e) = fs::write(&temp, bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, FileStoreError> {
        Ok(fs::read(self.root.join(relative)).await?)
    }

    /// Remove a file; a missing file is not an error.
    pub async fn remove(&self, relative: &str) -> Result<bool, FileStoreError> {
        match fs::remove_file(self.root.join(relative)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, relative: &str) -> bool {
        fs::try_exists(self.root.join(relative)).await.unwrap_or(false)
    }

    /// Relative paths of every regular file under the upload directories,
    /// in-flight temporaries excluded.
    pub async fn scan(&self) -> Result<Vec<String>, FileStoreError> {
        let mut found = Vec::new();
        for dir in [DOCUMENTS_DIR, IMAGES_DIR] {
            let mut entries = match fs::read_dir(self.root.join(dir)).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let is_temp = Path::new(&entry.file_name())
                    .extension()
                    .is_some_and(|ext| ext == TEMP_EXTENSION);
                if entry.file_type().await?.is_file() && !is_temp {
                    found.push(format!("{}/{}", dir, entry.file_name().to_string_lossy()));
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Delete every scanned file not in `known` that was last modified at
    /// least `grace` ago.
    pub async fn remove_unknown(
        &self,
        known: &HashSet<String>,
        grace: Duration,
    ) -> Result<CleanupReport, FileStoreError> {
        let scanned = self.scan().await?;
        let mut report = CleanupReport {
            scanned: scanned.len(),
            removed: Vec::new(),
        };
        let now = SystemTime::now();
        for path in scanned {
            if known.contains(&path) {
                continue;
            }
            let modified = match fs::metadata(self.root.join(&path)).await {
                Ok(meta) => meta.modified()?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if now.duration_since(modified).unwrap_or_default() < grace {
                debug!(path = %path, "Recent unreferenced file kept");
                continue;
            }
            if self.remove(&path).await? {
                report.removed.push(path);
            }
        }
        Ok(report)
    }
}

const FILE_COLUMNS: &str =
    "id, original_name, stored_name, path, size_bytes, mime_type, kind, created_at";

/// Postgres metadata plus an [`UploadDir`].
#[derive(Clone)]
pub struct DiskFileStore {
    pool: PgPool,
    dir: UploadDir,
    max_bytes: u64,
}

impl DiskFileStore {
    pub fn new(pool: PgPool, root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            pool,
            dir: UploadDir::new(root),
            max_bytes,
        }
    }

    pub async fn init(&self) -> Result<(), FileStoreError> {
        self.dir.ensure_layout().await
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    #[instrument(skip(self, upload), fields(kind = %kind, size = upload.bytes.len()))]
    async fn put(&self, upload: NewUpload, kind: FileKind) -> Result<FileRecord, FileStoreError> {
        let mime = check_upload(kind, &upload, self.max_bytes)?;
        let (stored_name, relative) = self.dir.allocate(kind, &mime);

        self.dir.write(&relative, &upload.bytes).await?;

        let inserted = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO file_uploads (original_name, stored_name, path, size_bytes, mime_type, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(clean_original_name(&upload.original_name))
        .bind(&stored_name)
        .bind(&relative)
        .bind(upload.bytes.len() as i64)
        .bind(&mime)
        .bind(kind)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(record) => {
                info!(file_id = record.id, path = %record.path, "File stored");
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = self.dir.remove(&relative).await {
                    warn!(path = %relative, error = %cleanup, "Failed to remove file after insert error");
                }
                Err(e.into())
            }
        }
    }

    async fn get(&self, id: i64) -> Result<Option<FileRecord>, FileStoreError> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM file_uploads WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn read(&self, id: i64) -> Result<Option<(FileRecord, Vec<u8>)>, FileStoreError> {
        let Some(record) = self.get(id).await? else {
            return Ok(None);
        };
        match self.dir.read(&record.path).await {
            Ok(bytes) => Ok(Some((record, bytes))),
            Err(FileStoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file_id = id, path = %record.path, "File row has no content on disk");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<bool, FileStoreError> {
        let path = sqlx::query_scalar::<_, String>(
            "DELETE FROM file_uploads WHERE id = $1 RETURNING path",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(path) = path else {
            return Ok(false);
        };
        if !self.dir.remove(&path).await? {
            warn!(file_id = id, path = %path, "File was already missing on disk");
        }
        info!(file_id = id, "File deleted");
        Ok(true)
    }

    async fn exists_by_path(&self, path: &str) -> Result<bool, FileStoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM file_uploads WHERE path = $1)",
        )
        .bind(path)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists && self.dir.exists(path).await)
    }

    async fn list_by_kind(
        &self,
        kind: Option<FileKind>,
        paging: Paging,
    ) -> Result<Page<FileRecord>, FileStoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM file_uploads");
        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {FILE_COLUMNS} FROM file_uploads"));
        if let Some(kind) = kind {
            count.push(" WHERE kind = ").push_bind(kind);
            query.push(" WHERE kind = ").push_bind(kind);
        }
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(paging.limit());
        query.push(" OFFSET ");
        query.push_bind(paging.offset());

        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        let items = query
            .build_query_as::<FileRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(items, total, paging))
    }

    async fn statistics(&self) -> Result<FileStatistics, FileStoreError> {
        let by_kind = sqlx::query_as::<_, KindCount>(
            r#"
            SELECT kind, COUNT(*) AS files, COALESCE(SUM(size_bytes), 0)::BIGINT AS bytes
            FROM file_uploads
            GROUP BY kind
            ORDER BY kind
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(FileStatistics {
            total_files: by_kind.iter().map(|k| k.files).sum(),
            total_bytes: by_kind.iter().map(|k| k.bytes).sum(),
            by_kind,
        })
    }

    #[instrument(skip(self))]
    async fn cleanup_orphans(&self) -> Result<CleanupReport, FileStoreError> {
        let on_disk = self.dir.scan().await?;
        let known: HashSet<String> = sqlx::query_scalar::<_, String>(
            "SELECT path FROM file_uploads WHERE path = ANY($1)",
        )
        .bind(&on_disk)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        let report = self.dir.remove_unknown(&known, ORPHAN_GRACE).await?;
        info!(
            scanned = report.scanned,
            removed = report.removed.len(),
            "Orphaned uploads cleaned up"
        );
        Ok(report)
    }
}
