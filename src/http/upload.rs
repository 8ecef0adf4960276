//! `POST /api/upload`

use super::AppState;
use super::error::ApiError;
use axum::Json;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use dropsite_ingest::error::ErrorKind;
use dropsite_ingest::{FileOutcome, UploadedFile};
use dropsite_storage::MAX_ID_LEN;
use exn::ResultExt;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const PROJECT_FIELD: &str = "projectId";
const FILES_FIELD: &str = "files";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    success: bool,
    message: String,
    files: Vec<FileOutcome>,
}

/// Stream every `files` part to a temp file, then hand the lot to the
/// ingest pipeline.
///
/// Parts may come in any order; files are staged until `projectId` has
/// been seen. Dropping this future (client gone, timeout) cancels any
/// extraction still running for it.
#[tracing::instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let mut project_id = None;
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some(PROJECT_FIELD) => project_id = Some(read_project_id(field).await?),
            Some(FILES_FIELD) => files.push(stage(&state, field).await?),
            other => tracing::debug!(field = ?other, "Ignoring form field"),
        }
    }

    let project_id = project_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::invalid_input(format!("`{PROJECT_FIELD}` is required")))?;
    // Unknown projects are reported before complaining about the files.
    state.pipeline.resolve(project_id).await?;
    if files.is_empty() {
        return Err(ApiError::invalid_input("no files uploaded"));
    }

    let report = state.pipeline.ingest(project_id, files, &cancel).await?;
    let (status, message) = match report.is_complete() {
        true => (StatusCode::OK, "Files uploaded successfully".to_string()),
        false => (
            StatusCode::MULTI_STATUS,
            format!("{} of {} files could not be ingested", report.failed(), report.files.len()),
        ),
    };
    let response = UploadResponse { success: report.is_complete(), message, files: report.files };
    Ok((status, Json(response)))
}

/// Read the `projectId` part, refusing anything longer than an identifier
/// can be before it is buffered.
async fn read_project_id(mut field: Field<'_>) -> Result<String, ApiError> {
    let mut value = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if value.len() + chunk.len() > MAX_ID_LEN {
            return Err(ApiError::invalid_input(format!("`{PROJECT_FIELD}` is longer than {MAX_ID_LEN} bytes")));
        }
        value.extend_from_slice(&chunk);
    }
    String::from_utf8(value).map_err(|_| ApiError::invalid_input(format!("`{PROJECT_FIELD}` is not valid UTF-8")))
}

/// Copy one part into the staging directory, enforcing the size limit as
/// the bytes arrive.
async fn stage(state: &AppState, mut field: Field<'_>) -> Result<UploadedFile, ApiError> {
    let name = field
        .file_name()
        .map(str::to_string)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::invalid_input(format!("every `{FILES_FIELD}` part needs a filename")))?;
    let media_type = field.content_type().map(str::to_string);

    let staging: PathBuf = state.pipeline.store().staging_dir().to_path_buf();
    let temp = tokio::task::spawn_blocking(move || tempfile::Builder::new().prefix("upload-").tempfile_in(staging))
        .await
        .or_raise(|| ErrorKind::Io)?
        .or_raise(|| ErrorKind::Io)?;
    let (file, temp) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > state.max_upload_size {
            tracing::debug!(file = %name.escape_debug(), limit = state.max_upload_size, "Upload too large");
            // `temp` drops here and takes the partial file with it.
            return Err(ApiError::PayloadTooLarge { limit: state.max_upload_size });
        }
        file.write_all(&chunk).await.or_raise(|| ErrorKind::Io)?;
    }
    file.flush().await.or_raise(|| ErrorKind::Io)?;
    tracing::debug!(file = %name.escape_debug(), size, "Staged upload");
    Ok(UploadedFile::new(temp, name, media_type))
}
