//! src/services/slide_service.rs
//!
//! SlideService — ingest of whole-slide pathology images backed by SQLite for
//! metadata and local disk for payloads. Large files arrive either as a
//! single multipart request or as a sequence of independent chunk requests
//! that are reassembled under `base_path/slides/` once every declared chunk
//! index is present. In-flight chunk state lives under
//! `base_path/temp/{uploadId}/` and nowhere else.

use crate::models::slide_image::SlideImage;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Form fields accompanying one chunk request.
#[derive(Clone, Debug)]
pub struct ChunkRequest {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub sample_id: Option<String>,
    pub user_id: Option<String>,
}

/// Result of placing one chunk: either a progress report or, when the set
/// became complete, the metadata row for the reassembled slide.
#[derive(Debug)]
pub enum ChunkOutcome {
    Incomplete { uploaded: usize, total: u32 },
    Complete(SlideImage),
}

/// Finished report upload: public path plus the generated storage name.
#[derive(Debug)]
pub struct StoredReport {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Error)]
pub enum SlideStoreError {
    #[error("invalid upload id `{0}`")]
    InvalidUploadId(String),
    #[error("totalChunks must be between 1 and {MAX_TOTAL_CHUNKS}, got {0}")]
    InvalidChunkCount(u32),
    #[error("chunkIndex {index} is out of range for {total} chunks")]
    ChunkIndexOutOfRange { index: u32, total: u32 },
    #[error("file type of `{0}` is not accepted")]
    UnsupportedFileType(String),
    #[error("upload `{0}` was already completed")]
    UploadAlreadyCompleted(String),
    #[error("chunk {index} of upload `{upload_id}` is missing on disk")]
    MissingChunk { upload_id: String, index: u32 },
    #[error("slide `{0}` not found")]
    SlideNotFound(Uuid),
    #[error("file `{0}` not found")]
    ArtifactNotFound(String),
    #[error("invalid storage path")]
    InvalidStoragePath,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SlideStoreResult<T> = Result<T, SlideStoreError>;

/// Chunk file names are the zero-padded index, so five digits bounds the
/// declarable chunk count.
pub const MAX_TOTAL_CHUNKS: u32 = 100_000;

const CHUNK_INDEX_WIDTH: usize = 5;
const CHUNK_SUFFIX: &str = ".part";
const MAX_UPLOAD_ID_LEN: usize = 128;

const SLIDES_SUBDIR: &str = "slides";
const REPORTS_SUBDIR: &str = "reports";
const TEMP_SUBDIR: &str = "temp";

/// Accepted slide extensions mapped to the MIME type recorded for them.
/// Whole-slide scanner formats first, plain raster formats and PDF after.
const ACCEPTED_TYPES: [(&str, &str); 9] = [
    ("ndpi", "image/ndpi"),
    ("svs", "image/svs"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
];

/// SlideService provides the upload core:
/// - Receive one chunk of a large slide and detect set completion
/// - Reassemble a complete chunk set into the final artifact
/// - Record a `slide_images` row once the artifact is durable
/// - Store single-shot slide and report uploads
/// - List, delete, and serve finished artifacts
/// - Sweep abandoned upload sessions
#[derive(Clone)]
pub struct SlideService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Root directory holding `slides/`, `reports/`, and `temp/`.
    pub base_path: PathBuf,

    /// Per-upload mutexes serializing chunk placement, the completion check,
    /// and reassembly for one `uploadId`. Entries are dropped when the upload
    /// finishes, or when its temp directory is swept and no request is
    /// holding the lock.
    locks: Arc<StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SlideService {
    /// Create a new SlideService backed by the provided SQLite pool and
    /// using `base_path` as the storage root.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn slides_dir(&self) -> PathBuf {
        self.base_path.join(SLIDES_SUBDIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.base_path.join(REPORTS_SUBDIR)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.base_path.join(TEMP_SUBDIR)
    }

    /// Validate an upload id and compute its temp directory.
    ///
    /// The id is client-supplied and becomes a directory name, so it is held
    /// to a conservative charset with no traversal sequences.
    fn upload_temp_dir(&self, upload_id: &str) -> SlideStoreResult<PathBuf> {
        if upload_id.is_empty()
            || upload_id.len() > MAX_UPLOAD_ID_LEN
            || upload_id.starts_with('.')
            || upload_id.contains("..")
            || !upload_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(SlideStoreError::InvalidUploadId(upload_id.to_string()));
        }
        Ok(self.temp_root().join(upload_id))
    }

    /// Check the extension of a client file name against the accepted slide
    /// formats. Returns the lower-cased extension and its MIME type.
    pub fn validate_slide_file(&self, file_name: &str) -> SlideStoreResult<(String, &'static str)> {
        let ext = extension_of(file_name)
            .ok_or_else(|| SlideStoreError::UnsupportedFileType(file_name.to_string()))?;
        let mime = ACCEPTED_TYPES
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .map(|(_, mime)| *mime)
            .ok_or_else(|| SlideStoreError::UnsupportedFileType(file_name.to_string()))?;
        Ok((ext, mime))
    }

    /// Reports must be PDFs.
    pub fn validate_report_file(&self, file_name: &str) -> SlideStoreResult<()> {
        match extension_of(file_name).as_deref() {
            Some("pdf") => Ok(()),
            _ => Err(SlideStoreError::UnsupportedFileType(file_name.to_string())),
        }
    }

    fn upload_lock(&self, upload_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("upload lock registry poisoned");
        locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, upload_id: &str) {
        let mut locks = self.locks.lock().expect("upload lock registry poisoned");
        locks.remove(upload_id);
    }

    /// Drop a lock entry only when no request currently holds a clone of it.
    /// The sweep uses this so an in-flight chunk request cannot end up racing
    /// a fresh mutex minted for the same upload id.
    fn release_lock_if_unused(&self, upload_id: &str) {
        let mut locks = self.locks.lock().expect("upload lock registry poisoned");
        if let Some(lock) = locks.get(upload_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(upload_id);
            }
        }
    }

    /// True once a `slide_images` row exists for this upload id. Together
    /// with the unique index on `slide_images.upload_id` this closes the
    /// window where two racing final chunks could both reassemble.
    async fn upload_recorded(&self, upload_id: &str) -> SlideStoreResult<bool> {
        let recorded: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM slide_images WHERE upload_id = ?)",
        )
        .bind(upload_id)
        .fetch_one(&*self.db)
        .await?;
        Ok(recorded != 0)
    }

    /// Place one spooled chunk of a chunked slide upload and, when the
    /// declared set is complete, reassemble it and record the metadata row.
    ///
    /// - The payload arrives as a staging file from [`spool_chunk_stream`],
    ///   so chunk bytes never sit in memory as a whole. It is renamed into
    ///   `{index:05}.part` under the upload's temp directory; a resend
    ///   replaces the prior bytes for that index without ever exposing a
    ///   truncated chunk (last-write-wins).
    /// - A rejected request's staging file is removed and no upload
    ///   directory is created for it.
    /// - Everything from placement through the completion check and
    ///   reassembly runs under the per-upload lock; a request that loses the
    ///   final-chunk race gets `UploadAlreadyCompleted`.
    ///
    /// [`spool_chunk_stream`]: SlideService::spool_chunk_stream
    pub async fn receive_chunk(
        &self,
        req: ChunkRequest,
        staged: PathBuf,
    ) -> SlideStoreResult<ChunkOutcome> {
        let outcome = self.place_chunk(&req, &staged).await;
        if outcome.is_err() {
            self.discard_staged(&staged).await;
        }
        outcome
    }

    async fn place_chunk(
        &self,
        req: &ChunkRequest,
        staged: &Path,
    ) -> SlideStoreResult<ChunkOutcome> {
        if req.total_chunks == 0 || req.total_chunks > MAX_TOTAL_CHUNKS {
            return Err(SlideStoreError::InvalidChunkCount(req.total_chunks));
        }
        if req.chunk_index >= req.total_chunks {
            return Err(SlideStoreError::ChunkIndexOutOfRange {
                index: req.chunk_index,
                total: req.total_chunks,
            });
        }
        let (ext, mime) = self.validate_slide_file(&req.file_name)?;
        let dir = self.upload_temp_dir(&req.upload_id)?;

        let lock = self.upload_lock(&req.upload_id);
        let _guard = lock.lock().await;

        if self.upload_recorded(&req.upload_id).await? {
            return Err(SlideStoreError::UploadAlreadyCompleted(
                req.upload_id.clone(),
            ));
        }

        fs::create_dir_all(&dir).await?;
        fs::rename(staged, dir.join(chunk_file_name(req.chunk_index))).await?;

        let uploaded = count_chunks(&dir).await?;
        if uploaded < req.total_chunks as usize {
            debug!(
                upload_id = %req.upload_id,
                uploaded,
                total = req.total_chunks,
                "chunk stored, set incomplete"
            );
            return Ok(ChunkOutcome::Incomplete {
                uploaded,
                total: req.total_chunks,
            });
        }

        let slide = self.reassemble(req, &dir, &ext, mime).await?;
        self.release_lock(&req.upload_id);
        Ok(ChunkOutcome::Complete(slide))
    }

    /// Concatenate a complete chunk set into the final slide artifact.
    ///
    /// Iterates indices `0..totalChunks` and opens each expected chunk path
    /// explicitly, so the output never depends on directory listing order
    /// and a missing index fails loudly instead of producing a corrupt file.
    async fn reassemble(
        &self,
        req: &ChunkRequest,
        dir: &Path,
        ext: &str,
        mime: &'static str,
    ) -> SlideStoreResult<SlideImage> {
        let slides_dir = self.slides_dir();
        fs::create_dir_all(&slides_dir).await?;
        let tmp_path = slides_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut out = File::create(&tmp_path).await?;

        for index in 0..req.total_chunks {
            let chunk_path = dir.join(chunk_file_name(index));
            let mut chunk = match File::open(&chunk_path).await {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(SlideStoreError::MissingChunk {
                        upload_id: req.upload_id.clone(),
                        index,
                    });
                }
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(SlideStoreError::Io(err));
                }
            };
            if let Err(err) = tokio::io::copy(&mut chunk, &mut out).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(SlideStoreError::Io(err));
            }
        }
        if let Err(err) = out.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SlideStoreError::Io(err));
        }
        if let Err(err) = out.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SlideStoreError::Io(err));
        }
        drop(out);

        let final_name = format!("{}.{}", Uuid::new_v4(), ext);
        let final_path = slides_dir.join(&final_name);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SlideStoreError::Io(err));
        }
        let file_size = fs::metadata(&final_path).await?.len() as i64;

        // The artifact is durable at this point; a failed cleanup is left to
        // the stale-upload sweep.
        if let Err(err) = fs::remove_dir_all(dir).await {
            warn!(
                "failed to remove temp directory {} after reassembly: {}",
                dir.display(),
                err
            );
        }

        self.insert_slide_row(
            Some(&req.upload_id),
            req.sample_id.as_deref(),
            req.user_id.as_deref(),
            &req.file_name,
            &format!("/storage/{}/{}", SLIDES_SUBDIR, final_name),
            file_size,
            mime,
            &final_path,
        )
        .await
    }

    /// Stream a single-shot upload into a staging file under `dir`.
    ///
    /// Returns the staging path and the byte count. The caller finalizes
    /// (rename + metadata row) or abandons the staging file to the sweep.
    async fn spool_stream<S>(&self, dir: &Path, stream: S) -> SlideStoreResult<(PathBuf, i64)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(SlideStoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(SlideStoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SlideStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SlideStoreError::Io(err));
        }

        Ok((tmp_path, size_bytes))
    }

    /// Spool an incoming chunk payload into a staging file under the temp
    /// root. `receive_chunk` renames it into the upload's chunk set, or
    /// removes it when the request is rejected.
    pub async fn spool_chunk_stream<S>(&self, stream: S) -> SlideStoreResult<PathBuf>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let (path, _size) = self.spool_stream(&self.temp_root(), stream).await?;
        Ok(path)
    }

    /// Best-effort removal of a staged payload that will not be placed.
    pub async fn discard_staged(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!("failed to remove staged payload {}: {}", path.display(), err);
            }
        }
    }

    /// Spool a single-shot slide upload into the slides directory.
    pub async fn spool_slide_stream<S>(&self, stream: S) -> SlideStoreResult<(PathBuf, i64)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.spool_stream(&self.slides_dir(), stream).await
    }

    /// Spool a report upload into the reports directory.
    pub async fn spool_report_stream<S>(&self, stream: S) -> SlideStoreResult<(PathBuf, i64)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.spool_stream(&self.reports_dir(), stream).await
    }

    /// Move a spooled single-shot slide into place and record its row.
    pub async fn finalize_slide(
        &self,
        tmp_path: PathBuf,
        file_size: i64,
        file_name: &str,
        sample_id: Option<&str>,
        user_id: Option<&str>,
    ) -> SlideStoreResult<SlideImage> {
        let (ext, mime) = self.validate_slide_file(file_name)?;
        let final_name = format!("{}.{}", Uuid::new_v4(), ext);
        let final_path = self.slides_dir().join(&final_name);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SlideStoreError::Io(err));
        }

        self.insert_slide_row(
            None,
            sample_id,
            user_id,
            file_name,
            &format!("/storage/{}/{}", SLIDES_SUBDIR, final_name),
            file_size,
            mime,
            &final_path,
        )
        .await
    }

    /// Move a spooled report into place and, when a test result is named,
    /// point it at the stored file.
    pub async fn finalize_report(
        &self,
        tmp_path: PathBuf,
        test_result_id: Option<&str>,
    ) -> SlideStoreResult<StoredReport> {
        let final_name = format!("{}.pdf", Uuid::new_v4());
        let final_path = self.reports_dir().join(&final_name);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SlideStoreError::Io(err));
        }
        let url = format!("/storage/{}/{}", REPORTS_SUBDIR, final_name);

        if let Some(id) = test_result_id {
            sqlx::query(
                "UPDATE test_results SET report_url = ?, report_generated = 1 WHERE id = ?",
            )
            .bind(&url)
            .bind(id)
            .execute(&*self.db)
            .await?;
        }

        Ok(StoredReport {
            url,
            filename: final_name,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_slide_row(
        &self,
        upload_id: Option<&str>,
        sample_id: Option<&str>,
        user_id: Option<&str>,
        file_name: &str,
        file_path: &str,
        file_size: i64,
        mime_type: &str,
        disk_path: &Path,
    ) -> SlideStoreResult<SlideImage> {
        let insert_result = sqlx::query_as::<_, SlideImage>(
            r#"
            INSERT INTO slide_images (
                id, upload_id, sample_id, user_id, file_name, file_path,
                file_size, mime_type, uploaded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, sample_id, user_id, file_name, file_path,
                      file_size, mime_type, uploaded_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upload_id)
        .bind(sample_id)
        .bind(user_id)
        .bind(file_name)
        .bind(file_path)
        .bind(file_size)
        .bind(mime_type)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(slide) => Ok(slide),
            Err(err) => {
                let _ = fs::remove_file(disk_path).await;
                if is_unique_violation(&err) {
                    if let Some(upload_id) = upload_id {
                        return Err(SlideStoreError::UploadAlreadyCompleted(
                            upload_id.to_string(),
                        ));
                    }
                }
                Err(SlideStoreError::Sqlx(err))
            }
        }
    }

    /// All slides recorded for a sample, newest first.
    pub async fn slides_for_sample(&self, sample_id: &str) -> SlideStoreResult<Vec<SlideImage>> {
        let rows = sqlx::query_as::<_, SlideImage>(
            "SELECT id, sample_id, user_id, file_name, file_path, file_size, mime_type, uploaded_at
             FROM slide_images WHERE sample_id = ? ORDER BY uploaded_at DESC",
        )
        .bind(sample_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Remove a slide row and best-effort delete its payload.
    pub async fn delete_slide(&self, id: Uuid) -> SlideStoreResult<SlideImage> {
        let slide = sqlx::query_as::<_, SlideImage>(
            "SELECT id, sample_id, user_id, file_name, file_path, file_size, mime_type, uploaded_at
             FROM slide_images WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => SlideStoreError::SlideNotFound(id),
            other => SlideStoreError::Sqlx(other),
        })?;

        sqlx::query("DELETE FROM slide_images WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if let Some(disk_path) = self.artifact_disk_path(&slide.file_path) {
            match fs::remove_file(&disk_path).await {
                Ok(_) => debug!("removed slide file {}", disk_path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("slide file {} already missing", disk_path.display());
                }
                Err(err) => warn!("failed to remove slide file {}: {}", disk_path.display(), err),
            }
        }

        Ok(slide)
    }

    /// Resolve a stored public path (`/storage/...`) back to disk.
    fn artifact_disk_path(&self, public_path: &str) -> Option<PathBuf> {
        public_path
            .strip_prefix("/storage/")
            .map(|rel| self.base_path.join(rel))
    }

    /// Open a finished artifact for streaming out, by storage-relative path
    /// such as `slides/<name>`. Traversal-shaped paths are rejected before
    /// touching the filesystem.
    pub async fn open_artifact(
        &self,
        rel_path: &str,
    ) -> SlideStoreResult<(File, i64, &'static str)> {
        if rel_path.is_empty()
            || rel_path.starts_with('/')
            || rel_path.contains("..")
            || rel_path
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(SlideStoreError::InvalidStoragePath);
        }

        let disk_path = self.base_path.join(rel_path);
        let file = File::open(&disk_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                SlideStoreError::ArtifactNotFound(rel_path.to_string())
            } else {
                SlideStoreError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len() as i64;
        let mime = extension_of(rel_path)
            .and_then(|ext| {
                ACCEPTED_TYPES
                    .iter()
                    .find(|(candidate, _)| *candidate == ext)
                    .map(|(_, mime)| *mime)
            })
            .unwrap_or("application/octet-stream");
        Ok((file, len, mime))
    }

    /// Delete abandoned upload state older than `ttl`: chunk directories
    /// under `temp/` and staging files left in the slides/reports
    /// directories. Returns how many entries were removed.
    pub async fn sweep_stale_uploads(&self, ttl: Duration) -> SlideStoreResult<usize> {
        let mut removed = 0;

        let temp_root = self.temp_root();
        match fs::read_dir(&temp_root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if !is_older_than(&entry, ttl).await {
                        continue;
                    }
                    let path = entry.path();
                    let result = if entry.file_type().await?.is_dir() {
                        fs::remove_dir_all(&path).await
                    } else {
                        fs::remove_file(&path).await
                    };
                    match result {
                        Ok(_) => {
                            self.release_lock_if_unused(&entry.file_name().to_string_lossy());
                            removed += 1;
                            debug!("swept stale upload entry {}", path.display());
                        }
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => warn!("failed to sweep {}: {}", path.display(), err),
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(SlideStoreError::Io(err)),
        }

        for dir in [self.slides_dir(), self.reports_dir()] {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(SlideStoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if !name.to_string_lossy().starts_with(".tmp-") {
                    continue;
                }
                if !is_older_than(&entry, ttl).await {
                    continue;
                }
                match fs::remove_file(entry.path()).await {
                    Ok(_) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        warn!("failed to sweep {}: {}", entry.path().display(), err)
                    }
                }
            }
        }

        Ok(removed)
    }
}

/// Chunk file name for an index: zero-padded so names also sort in index
/// order, though reassembly opens each index explicitly.
fn chunk_file_name(index: u32) -> String {
    format!("{:0width$}{}", index, CHUNK_SUFFIX, width = CHUNK_INDEX_WIDTH)
}

/// Count distinct chunk indices present in an upload's temp directory.
/// Staging files (dot-prefixed) are not chunks.
async fn count_chunks(dir: &Path) -> io::Result<usize> {
    let mut entries = fs::read_dir(dir).await?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(CHUNK_SUFFIX) && !name.starts_with('.') {
            count += 1;
        }
    }
    Ok(count)
}

async fn is_older_than(entry: &fs::DirEntry, ttl: Duration) -> bool {
    match entry.metadata().await.and_then(|meta| meta.modified()) {
        Ok(modified) => modified.elapsed().map_or(false, |age| age >= ttl),
        Err(_) => false,
    }
}

/// Lower-cased extension of a file name, if it has one.
fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Human-readable byte count for response envelopes, e.g. `2.38 KB`.
pub fn format_file_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes.max(0), UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
