//! HTTP handlers for the upload surface.
//!
//! Chunked uploads stream each chunk into a staging file and hand it to
//! `SlideService` for placement; single-shot uploads stream the multipart
//! file field straight to disk while feeding the progress tracker. All
//! storage concerns live in the service layer.

use crate::{
    errors::AppError,
    models::slide_image::SlideImage,
    services::slide_service::{ChunkOutcome, ChunkRequest, format_file_size},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{io, path::PathBuf};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Query params accepted by the single-shot upload endpoints.
#[derive(Debug, Deserialize)]
pub struct SingleShotQuery {
    /// Client-chosen identifier for progress polling. Generated server-side
    /// when absent.
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
}

/// POST `/api/upload/slide/chunk` — receive one chunk of a chunked slide
/// upload. The chunk body is streamed into a staging file as it arrives,
/// never buffered whole. Responds 202 with progress while the set is
/// incomplete and 201 with the recorded slide row once the final chunk
/// triggers reassembly.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut file_name = None;
    let mut sample_id = None;
    let mut user_id = None;
    let mut staged: Option<PathBuf> = None;

    let collected = async {
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("uploadId") => upload_id = Some(field.text().await?),
                Some("chunkIndex") => chunk_index = Some(field.text().await?),
                Some("totalChunks") => total_chunks = Some(field.text().await?),
                Some("fileName") => file_name = Some(field.text().await?),
                Some("sampleId") => sample_id = non_empty(field.text().await?),
                Some("userId") => user_id = non_empty(field.text().await?),
                Some("chunk") => {
                    let stream = field.map(|chunk| chunk.map_err(io::Error::other));
                    staged = Some(state.slides.spool_chunk_stream(stream).await?);
                }
                _ => {}
            }
        }
        Ok::<_, AppError>(())
    }
    .await;

    let params = collected.and_then(|_| {
        Ok((
            upload_id.ok_or_else(|| missing("uploadId"))?,
            parse_int(chunk_index.ok_or_else(|| missing("chunkIndex"))?, "chunkIndex")?,
            parse_int(total_chunks.ok_or_else(|| missing("totalChunks"))?, "totalChunks")?,
            file_name.ok_or_else(|| missing("fileName"))?,
        ))
    });
    let (upload_id, chunk_index, total_chunks, file_name) = match params {
        Ok(params) => params,
        Err(err) => {
            if let Some(path) = staged {
                state.slides.discard_staged(&path).await;
            }
            return Err(err);
        }
    };
    let staged =
        staged.ok_or_else(|| AppError::bad_request("missing chunk file field `chunk`"))?;

    let outcome = state
        .slides
        .receive_chunk(
            ChunkRequest {
                upload_id: upload_id.clone(),
                chunk_index,
                total_chunks,
                file_name,
                sample_id,
                user_id,
            },
            staged,
        )
        .await?;

    match outcome {
        ChunkOutcome::Incomplete { uploaded, total } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "uploaded": uploaded,
                "total": total,
                "complete": false,
            })),
        )
            .into_response()),
        ChunkOutcome::Complete(slide) => Ok((
            StatusCode::CREATED,
            Json(slide_envelope(&slide, &upload_id)?),
        )
            .into_response()),
    }
}

/// POST `/api/upload/slide` — single-shot slide upload. The file field is
/// streamed to disk as it arrives; every observed body chunk advances the
/// progress counter for this request's upload id, and the counter is removed
/// when the request finishes either way. The upload id, whether client-
/// supplied or generated here, is echoed in the response envelope so the
/// client can poll progress with it.
pub async fn upload_slide(
    State(state): State<AppState>,
    Query(query): Query<SingleShotQuery>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let upload_id = query
        .upload_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let result = receive_single_shot(&state, &upload_id, multipart).await;
    state.progress.clear(&upload_id);
    let slide = result?;

    Ok((StatusCode::CREATED, Json(slide_envelope(&slide, &upload_id)?)).into_response())
}

async fn receive_single_shot(
    state: &AppState,
    upload_id: &str,
    mut multipart: Multipart,
) -> Result<SlideImage, AppError> {
    let mut sample_id = None;
    let mut user_id = None;
    let mut spooled: Option<(PathBuf, i64, String)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("sampleId") => sample_id = non_empty(field.text().await?),
            Some("userId") => user_id = non_empty(field.text().await?),
            Some("file") => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file field carries no file name"))?;
                state.slides.validate_slide_file(&original_name)?;

                let stream = count_bytes(state, upload_id, field);
                let (tmp_path, size) = state.slides.spool_slide_stream(stream).await?;
                spooled = Some((tmp_path, size, original_name));
            }
            _ => {}
        }
    }

    let (tmp_path, size, original_name) =
        spooled.ok_or_else(|| AppError::bad_request("no file uploaded"))?;
    let slide = state
        .slides
        .finalize_slide(
            tmp_path,
            size,
            &original_name,
            sample_id.as_deref(),
            user_id.as_deref(),
        )
        .await?;
    Ok(slide)
}

/// POST `/api/upload/report` — store a PDF report and, when `testResultId`
/// is supplied, link the test result to it.
pub async fn upload_report(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut test_result_id = None;
    let mut spooled: Option<PathBuf> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("testResultId") => test_result_id = non_empty(field.text().await?),
            Some("file") => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file field carries no file name"))?;
                state.slides.validate_report_file(&original_name)?;

                let stream =
                    field.map(|chunk| chunk.map_err(io::Error::other));
                let (tmp_path, _size) = state.slides.spool_report_stream(stream).await?;
                spooled = Some(tmp_path);
            }
            _ => {}
        }
    }

    let tmp_path = spooled.ok_or_else(|| AppError::bad_request("no file uploaded"))?;
    let report = state
        .slides
        .finalize_report(tmp_path, test_result_id.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "url": report.url,
            "filename": report.filename,
        })),
    )
        .into_response())
}

/// GET `/api/upload/progress/{uploadId}` — bytes observed so far for an
/// in-flight single-shot upload; zero once it has finished or was never seen.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> impl IntoResponse {
    Json(json!({ "bytes": state.progress.bytes_for(&upload_id) }))
}

/// GET `/api/upload/slides/{sampleId}` — slide rows for a sample, newest
/// first.
pub async fn list_slides(
    State(state): State<AppState>,
    Path(sample_id): Path<String>,
) -> Result<Json<Vec<SlideImage>>, AppError> {
    let slides = state.slides.slides_for_sample(&sample_id).await?;
    Ok(Json(slides))
}

/// DELETE `/api/upload/slide/{id}` — remove the row and the stored file.
pub async fn delete_slide(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.slides.delete_slide(id).await?;
    Ok(Json(json!({ "message": "Slide deleted successfully" })).into_response())
}

/// GET `/storage/{*path}` — stream a finished artifact back out.
pub async fn serve_artifact(
    State(state): State<AppState>,
    Path(rel_path): Path<String>,
) -> Result<Response, AppError> {
    let (file, len, mime) = state.slides.open_artifact(&rel_path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&len.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    Ok(response)
}

/// Wrap a multipart file field so every chunk advances the progress counter.
fn count_bytes<'a>(
    state: &AppState,
    upload_id: &str,
    field: axum::extract::multipart::Field<'a>,
) -> impl futures::Stream<Item = io::Result<Bytes>> + Send + 'a {
    let tracker = state.progress.clone();
    let upload_id = upload_id.to_string();
    field.map(move |chunk| match chunk {
        Ok(bytes) => {
            tracker.add(&upload_id, bytes.len() as u64);
            Ok(bytes)
        }
        Err(err) => Err(io::Error::other(err)),
    })
}

/// Slide row plus the convenience fields clients render from. The upload id
/// is echoed so clients that let the server generate one can still use it.
fn slide_envelope(slide: &SlideImage, upload_id: &str) -> Result<Value, AppError> {
    let mut value = serde_json::to_value(slide)
        .map_err(|err| AppError::internal(format!("serializing slide row: {}", err)))?;
    if let Value::Object(map) = &mut value {
        map.insert("uploadId".into(), upload_id.into());
        map.insert("url".into(), slide.file_path.clone().into());
        map.insert(
            "size_formatted".into(),
            format_file_size(slide.file_size).into(),
        );
        map.insert("complete".into(), true.into());
    }
    Ok(value)
}

fn missing(field: &str) -> AppError {
    AppError::bad_request(format!("missing required field `{}`", field))
}

fn parse_int(raw: String, field: &str) -> Result<u32, AppError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| AppError::bad_request(format!("field `{}` must be a non-negative integer", field)))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{routes::routes::routes, services::slide_service::SlideService};
    use axum::{body::to_bytes, http::Request};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "slide-store-test-boundary";

    async fn test_state() -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("open in-memory sqlite");
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.expect("migrate");
        }
        let base = std::env::temp_dir().join(format!("slide-store-test-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&base).await.expect("create base");
        AppState::new(SlideService::new(Arc::new(pool), base))
    }

    fn text_part(body: &mut Vec<u8>, name: &str, value: &str) {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }

    fn file_part(body: &mut Vec<u8>, name: &str, file_name: &str, bytes: &[u8]) {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }

    fn multipart_post(uri: &str, mut body: Vec<u8>) -> Request<Body> {
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("build request")
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn chunk_body(upload_id: &str, index: &str, total: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        text_part(&mut body, "uploadId", upload_id);
        text_part(&mut body, "chunkIndex", index);
        text_part(&mut body, "totalChunks", total);
        text_part(&mut body, "fileName", "case.ndpi");
        file_part(&mut body, "chunk", "blob", payload);
        body
    }

    #[tokio::test]
    async fn chunk_endpoint_reports_progress_then_completion() {
        let app = routes().with_state(test_state().await);

        let response = app
            .clone()
            .oneshot(multipart_post(
                "/api/upload/slide/chunk",
                chunk_body("router-chunks", "0", "2", b"front"),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["complete"], false);
        assert_eq!(json["uploaded"], 1);
        assert_eq!(json["total"], 2);

        let response = app
            .clone()
            .oneshot(multipart_post(
                "/api/upload/slide/chunk",
                chunk_body("router-chunks", "1", "2", b"-back"),
            ))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["complete"], true);
        assert_eq!(json["uploadId"], "router-chunks");
        assert_eq!(json["mime_type"], "image/ndpi");
        assert_eq!(json["file_size"], 10);
    }

    #[tokio::test]
    async fn chunk_request_missing_fields_is_rejected_and_staging_discarded() {
        let state = test_state().await;
        let temp_root = state.slides.temp_root();
        let app = routes().with_state(state);

        let mut body = Vec::new();
        text_part(&mut body, "uploadId", "half-formed");
        text_part(&mut body, "chunkIndex", "0");
        file_part(&mut body, "chunk", "blob", b"payload");

        let response = app
            .oneshot(multipart_post("/api/upload/slide/chunk", body))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().expect("error message").contains("totalChunks"));

        let mut entries = tokio::fs::read_dir(&temp_root).await.expect("read temp root");
        assert!(
            entries.next_entry().await.expect("iterate temp root").is_none(),
            "rejected request must not leave a staged payload"
        );
    }

    #[tokio::test]
    async fn single_shot_echoes_generated_upload_id_and_resets_progress() {
        let app = routes().with_state(test_state().await);

        let mut body = Vec::new();
        text_part(&mut body, "sampleId", "SAMPLE-11");
        file_part(&mut body, "file", "biopsy.svs", b"pixels");
        let response = app
            .clone()
            .oneshot(multipart_post("/api/upload/slide", body))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["complete"], true);
        let upload_id = json["uploadId"]
            .as_str()
            .expect("generated upload id is echoed")
            .to_string();
        assert!(!upload_id.is_empty());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/upload/progress/{upload_id}"))
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["bytes"], 0, "finished uploads read zero");
    }

    #[tokio::test]
    async fn single_shot_echoes_supplied_upload_id() {
        let app = routes().with_state(test_state().await);

        let mut body = Vec::new();
        file_part(&mut body, "file", "scan.png", b"px");
        let response = app
            .oneshot(multipart_post("/api/upload/slide?uploadId=poll-me", body))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["uploadId"], "poll-me");
    }

    #[tokio::test]
    async fn single_shot_rejects_unsupported_extension() {
        let app = routes().with_state(test_state().await);

        let mut body = Vec::new();
        file_part(&mut body, "file", "malware.exe", b"nope");
        let response = app
            .oneshot(multipart_post("/api/upload/slide", body))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
