//! Defines routes for the upload service.
//!
//! ## Structure
//! - **Upload endpoints** (mounted under `/api/upload`)
//!   - `POST   /api/upload/slide/chunk` — receive one chunk of a chunked slide upload
//!   - `POST   /api/upload/slide` — single-shot slide upload (progress-tracked)
//!   - `POST   /api/upload/report` — store a PDF report
//!   - `GET    /api/upload/progress/{upload_id}` — bytes received for a single-shot upload
//!   - `GET    /api/upload/slides/{sample_id}` — list slides for a sample
//!   - `DELETE /api/upload/slide/{id}` — delete a slide
//!
//! - **Artifact serving**
//!   - `GET    /storage/{*path}` — stream a finished slide or report
//!
//! The wildcard `*path` allows the stored public-relative paths
//! (`slides/<name>`, `reports/<name>`) to round-trip unchanged.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{
            delete_slide, get_progress, list_slides, serve_artifact, upload_chunk, upload_report,
            upload_slide,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Request bodies up to 500 MB, matching the largest accepted slide chunk
/// and single-shot upload.
const MAX_BODY_BYTES: usize = 500 * 1024 * 1024;

/// Build and return the router for all upload routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload endpoints
        .route("/api/upload/slide/chunk", post(upload_chunk))
        .route("/api/upload/slide", post(upload_slide))
        .route("/api/upload/slide/{id}", axum::routing::delete(delete_slide))
        .route("/api/upload/report", post(upload_report))
        .route("/api/upload/progress/{upload_id}", get(get_progress))
        .route("/api/upload/slides/{sample_id}", get(list_slides))
        // finished artifacts
        .route("/storage/{*path}", get(serve_artifact))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
