use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::excel::{
    self, ExcelError, PreviewResponse, UploadedFile, MAX_FILE_SIZE_BYTES, XLSX_CONTENT_TYPE,
};

/// Multipart field that carries the uploaded workbooks
const FILES_FIELD: &str = "files";

#[derive(Debug)]
pub struct CommandError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl CommandError {
    fn bad_request(message: impl Into<String>) -> Self {
        CommandError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        CommandError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ExcelError> for CommandError {
    fn from(e: ExcelError) -> Self {
        if e.error_type.is_client_error() {
            CommandError::bad_request(e.message)
        } else {
            tracing::error!(error = %e, "file processing failed");
            CommandError::internal("Internal server error during file processing")
        }
    }
}

impl From<MultipartError> for CommandError {
    fn from(e: MultipartError) -> Self {
        CommandError {
            status: e.status(),
            message: format!("Invalid upload: {}", e.body_text()),
        }
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// Build the HTTP router
pub fn router(config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/preview", post(preview_files))
        .route("/consolidate", post(consolidate_files))
        .layer(DefaultBodyLimit::max(config.max_request_bytes))
}

async fn health() -> &'static str {
    "ok"
}

// ==================== Upload Handling ====================

/// Buffer every `files` field of the request.
///
/// A field is stored only up to the per-file cap; past that its remaining chunks are
/// drained and the file is kept as an oversized placeholder.
async fn read_uploads(mut multipart: Multipart) -> Result<Vec<UploadedFile>, CommandError> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let mut bytes: Vec<u8> = Vec::new();
        let mut size = 0usize;

        while let Some(chunk) = field.chunk().await? {
            size += chunk.len();
            if size > MAX_FILE_SIZE_BYTES {
                if !bytes.is_empty() {
                    bytes = Vec::new();
                }
                continue;
            }
            bytes.extend_from_slice(&chunk);
        }

        let file = if size > MAX_FILE_SIZE_BYTES {
            UploadedFile::oversized(filename, size)
        } else {
            UploadedFile::new(filename, bytes)
        };
        files.push(file);
    }

    if files.is_empty() {
        return Err(CommandError::bad_request("No files provided"));
    }

    Ok(files)
}

// ==================== Excel Commands ====================

/// Run spreadsheet work on the blocking pool; a task that panics becomes an internal error
async fn run_blocking<T, F>(work: F) -> Result<T, ExcelError>
where
    F: FnOnce() -> Result<T, ExcelError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ExcelError::internal(format!("Processing task did not complete: {}", e)))?
}

/// Preview a batch of uploaded files
async fn preview_files(multipart: Multipart) -> Result<Json<PreviewResponse>, CommandError> {
    let span = tracing::info_span!("preview", request_id = %Uuid::new_v4());

    async move {
        let files = read_uploads(multipart).await?;
        tracing::info!(files = files.len(), "previewing batch");

        let response = run_blocking(move || Ok(excel::preview_batch(&files))).await?;

        tracing::info!(
            valid_files = response.summary.valid_files,
            total_rows = response.summary.total_rows,
            "preview complete"
        );

        Ok(Json(response))
    }
    .instrument(span)
    .await
}

/// Merge a batch of uploaded files into one downloadable workbook
async fn consolidate_files(multipart: Multipart) -> Result<Response, CommandError> {
    let span = tracing::info_span!("consolidate", request_id = %Uuid::new_v4());

    async move {
        let files = read_uploads(multipart).await?;
        tracing::info!(files = files.len(), "consolidating batch");

        let (bytes, row_count) = run_blocking(move || {
            let table = excel::consolidate(&files)?;
            let bytes = excel::write_consolidated(&table)?;
            Ok((bytes, table.rows.len()))
        })
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "consolidation rejected"))?;

        let filename = excel::consolidated_filename(chrono::Utc::now().date_naive());
        tracing::info!(rows = row_count, file = %filename, "consolidation complete");

        let headers = [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ];

        Ok((headers, bytes).into_response())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::test_support::xlsx_bytes;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use calamine::{open_workbook_auto_from_rs, Reader};
    use serde_json::Value;
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "consolidator-test-boundary";

    fn multipart_request(uri: &str, files: &[(&str, Vec<u8>)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, bytes) in files {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                    name
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn app() -> Router {
        router(&ServerConfig::default())
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_preview_without_files() {
        let response = app()
            .oneshot(multipart_request("/preview", &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No files provided");
    }

    #[tokio::test]
    async fn test_preview_mixed_batch() {
        let files = [
            ("a.xlsx", xlsx_bytes(&[&["Name", "Age"], &["Alice", "30"]])),
            ("b.xlsx", xlsx_bytes(&[&["Nom", "Age"], &["Alice", "30"]])),
            ("c.txt", b"plain text".to_vec()),
        ];
        let response = app()
            .oneshot(multipart_request("/preview", &files))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;

        assert_eq!(json["summary"]["totalFiles"], 3);
        assert_eq!(json["summary"]["validFiles"], 2);
        assert_eq!(json["previews"][1]["isValid"], true);
        assert_eq!(json["previews"][1]["issues"][0]["severity"], "advisory");
        assert_eq!(json["previews"][2]["isValid"], false);
        assert_eq!(json["previews"][0]["sampleRows"][0]["Name"], "Alice");
    }

    #[tokio::test]
    async fn test_consolidate_download() {
        let files = [
            ("a.xlsx", xlsx_bytes(&[&["ID", "Name"], &["2", "Bob"], &["1", "Alice"]])),
            ("b.xlsx", xlsx_bytes(&[&["ID", "Name"], &["3", "Carl"]])),
        ];
        let response = app()
            .oneshot(multipart_request("/consolidate", &files))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], XLSX_CONTENT_TYPE);
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"consolidated-excel-"));
        assert!(disposition.ends_with(".xlsx\""));

        let body = to_bytes(response.into_body(), 10 * 1024 * 1024).await.unwrap();
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(body.to_vec())).unwrap();
        let range = workbook.worksheet_range("Consolidated Data").unwrap();
        let names: Vec<String> = (1..4)
            .map(|r| range.get((r, 1)).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Alice", "Bob", "Carl"]);
    }

    #[tokio::test]
    async fn test_consolidate_rejects_bad_file() {
        let files = [
            ("a.xlsx", xlsx_bytes(&[&["ID"], &["1"]])),
            ("broken.xlsx", b"not a workbook".to_vec()),
        ];
        let response = app()
            .oneshot(multipart_request("/consolidate", &files))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("broken.xlsx"));
    }

    #[tokio::test]
    async fn test_panicked_work_is_internal_error() {
        let err = run_blocking(|| -> Result<(), ExcelError> { panic!("worker died") })
            .await
            .unwrap_err();
        assert_eq!(err.error_type, crate::excel::ExcelErrorType::InternalError);

        let error = CommandError::from(err);
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("worker"));
    }

    #[test]
    fn test_server_errors_hide_details() {
        let error = CommandError::from(ExcelError::write_error("disk exploded"));
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("disk"));

        let error = CommandError::from(ExcelError::empty_file("e.xlsx"));
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
