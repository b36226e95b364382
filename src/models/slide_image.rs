//! Represents a stored whole-slide image artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for one finished slide upload.
///
/// Rows are created only after the file is fully on disk (the final chunk of
/// a chunked upload, or the end of a single-shot upload) and are never
/// mutated afterwards except on deletion.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct SlideImage {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Sample this slide was scanned from, when the uploader linked one.
    pub sample_id: Option<String>,

    /// Owning user. Authentication lives in front of this service, so the
    /// identifier is caller-supplied and may be absent.
    pub user_id: Option<String>,

    /// Original file name as the client named it, not the storage name.
    pub file_name: String,

    /// Public-relative path, e.g. `/storage/slides/<uuid>.ndpi`.
    pub file_path: String,

    /// Size in bytes of the finished artifact.
    pub file_size: i64,

    /// MIME type derived from the original file extension.
    pub mime_type: String,

    /// When the artifact landed on disk.
    pub uploaded_at: DateTime<Utc>,
}
