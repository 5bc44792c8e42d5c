// src/api/http/upload.rs
// Attachment upload to the local upload directory

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::chat::FileInfo;
use crate::state::AppState;

const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub fn is_allowed_type(mime: &str) -> bool {
    matches!(mime, "text/plain" | "application/pdf" | DOCX) || mime.starts_with("image/")
}

/// Declared content type, or a guess from the file name when the client sent none
fn resolve_mime(declared: Option<&str>, file_name: &str) -> String {
    match declared.map(|m| m.split(';').next().unwrap_or(m).trim()) {
        Some(m) if !m.is_empty() && m != "application/octet-stream" => m.to_ascii_lowercase(),
        _ => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// `file-<millis>-<uuid><ext>`
fn stored_name(original: &str) -> String {
    let ext = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("file-{}-{}{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple(), ext)
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::custom(err.status(), err.body_text())
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<FileInfo>)> {
    let max_bytes = state.config.upload_max_bytes;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let original = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or("upload")
            .to_string();
        let mime = resolve_mime(field.content_type(), &original);
        if !is_allowed_type(&mime) {
            return Err(ApiError::bad_request(format!("Unsupported file type: {}", mime)));
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if data.len() + chunk.len() > max_bytes {
                return Err(ApiError::payload_too_large(format!(
                    "File exceeds the {} byte limit",
                    max_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }

        let stored = stored_name(&original);
        let dir = &state.config.upload_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            error!("Failed to create upload dir {}: {}", dir.display(), e);
            ApiError::internal("File upload failed")
        })?;
        tokio::fs::write(dir.join(&stored), &data).await.map_err(|e| {
            error!("Failed to store upload {}: {}", stored, e);
            ApiError::internal("File upload failed")
        })?;

        info!(name = %original, stored = %stored, size = data.len(), mime = %mime, "File uploaded");

        return Ok((
            StatusCode::CREATED,
            Json(FileInfo {
                id: Uuid::new_v4().to_string(),
                name: original,
                mime_type: mime,
                url: format!("/uploads/{}", stored),
                size: data.len() as u64,
            }),
        ));
    }

    Err(ApiError::bad_request("No file uploaded"))
}
