//! Conversion of failures into JSON error responses.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dropsite_ingest::error::{Error as IngestError, ErrorKind};
use serde::Serialize;

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Ingest(IngestError),
    /// A single uploaded part went over `max_upload_size`.
    PayloadTooLarge { limit: u64 },
    /// The multipart body itself could not be read.
    Multipart(MultipartError),
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::Ingest(ErrorKind::InvalidInput(message.into()).into())
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self::Ingest(err)
    }
}
impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::Multipart(err)
    }
}
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

/// HTTP status for each kind of the ingest taxonomy.
pub fn status_for(kind: &ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput(_)
        | ErrorKind::InvalidArchive(_)
        | ErrorKind::PathTraversal(_)
        | ErrorKind::Rejected(_) => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists(_) => StatusCode::CONFLICT,
        ErrorKind::ArchiveTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        // Nobody is left to read it; the status only shows up in access logs.
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    kind: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            Self::Ingest(err) => {
                let kind: &ErrorKind = err;
                let status = status_for(kind);
                match status.is_server_error() {
                    true => tracing::error!(error = ?err, "Request failed"),
                    false => tracing::debug!(error = %kind, "Request rejected"),
                }
                (status, kind.name(), kind.to_string())
            },
            Self::PayloadTooLarge { limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PayloadTooLarge",
                format!("uploaded file exceeds the limit of {limit} bytes"),
            ),
            Self::Multipart(err) => (err.status(), "InvalidInput", err.body_text()),
        };
        let body = ErrorBody { success: false, error: ErrorDetail { kind, message } };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropsite_archive::error::Limit;
    use rstest::rstest;
    use std::path::PathBuf;

    #[rstest]
    #[case(ErrorKind::InvalidInput("x".into()), StatusCode::BAD_REQUEST)]
    #[case(ErrorKind::PathTraversal(PathBuf::from("../x")), StatusCode::BAD_REQUEST)]
    #[case(ErrorKind::Rejected("x.exe".into()), StatusCode::BAD_REQUEST)]
    #[case(ErrorKind::NotFound("ghost-00000000".into()), StatusCode::NOT_FOUND)]
    #[case(ErrorKind::AlreadyExists("a-00000000".into()), StatusCode::CONFLICT)]
    #[case(ErrorKind::ArchiveTooLarge(Limit::Entries(1)), StatusCode::PAYLOAD_TOO_LARGE)]
    #[case(ErrorKind::Cancelled, StatusCode::SERVICE_UNAVAILABLE)]
    #[case(ErrorKind::Io, StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_for(#[case] kind: ErrorKind, #[case] expected: StatusCode) {
        assert_eq!(status_for(&kind), expected);
    }
}
