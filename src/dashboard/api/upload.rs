//! Broadcast image upload
//!
//! Accepts one multipart `file` field and stores it in the public
//! `broadcasts` bucket, returning the URL to pass as a broadcast `photo_url`.

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use super::{ApiError, AppState};
use crate::dashboard::auth::AdminSession;

pub const UPLOAD_BUCKET: &str = "broadcasts";
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const ALLOWED_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Room for multipart framing on top of the file itself
const BODY_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
}

struct UploadedFile {
    file_name: Option<String>,
    content_type: String,
    bytes: Vec<u8>,
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Option<UploadedFile>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?;

        return Ok(Some(UploadedFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        }));
    }
    Ok(None)
}

/// File extension from the upload's name, else from its content type
fn extension_for(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match from_name {
        Some(ext) => ext.to_ascii_lowercase(),
        None => mime_guess::get_mime_extensions_str(content_type)
            .and_then(|exts| exts.iter().find(|ext| **ext == "jpg").or_else(|| exts.first()))
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| "jpg".to_string()),
    }
}

fn object_path(ext: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!(
        "broadcasts/{}_{}.{}",
        Utc::now().timestamp_millis(),
        suffix.to_ascii_lowercase(),
        ext
    )
}

pub async fn upload_image(
    session: AdminSession,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::Validation(e.body_text()))?;

    let file = read_file_field(&mut multipart)
        .await?
        .ok_or_else(|| ApiError::Validation("No file provided".into()))?;

    if !ALLOWED_TYPES.contains(&file.content_type.as_str()) {
        return Err(ApiError::Validation(
            "Unsupported format. Allowed: jpg, png, gif, webp".into(),
        ));
    }
    if file.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::Validation("File too large (max 10MB)".into()));
    }

    let path = object_path(&extension_for(file.file_name.as_deref(), &file.content_type));
    let size = file.bytes.len();

    let url = state
        .blobs
        .upload(UPLOAD_BUCKET, &path, file.bytes, &file.content_type)
        .await
        .map_err(|e| {
            warn!("Upload of {} failed: {}", path, e);
            ApiError::Upstream(format!("Upload failed: {}", e))
        })?;

    info!("{} uploaded {} ({} bytes)", session.username(), path, size);

    Ok(Json(UploadResponse { success: true, url }))
}

pub fn upload_router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + BODY_OVERHEAD))
}
