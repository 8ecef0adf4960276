//! `POST /api/projects`

use super::AppState;
use super::error::ApiError;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::HOST;
use axum::http::{HeaderMap, Uri};
use serde::{Deserialize, Serialize};

const FORWARDED_PROTO: &str = "x-forwarded-proto";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProject {
    username: Option<String>,
    project_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreated {
    success: bool,
    project_id: String,
    public_url: String,
}

/// Allocate a workspace for `username` and return its identifier and the
/// URL it is published under.
#[tracing::instrument(skip_all)]
pub async fn create_project(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<CreateProject>, JsonRejection>,
) -> Result<Json<ProjectCreated>, ApiError> {
    let Json(request) = payload?;
    let username = required(request.username.as_deref(), "username")?;
    let project_name = required(request.project_name.as_deref(), "projectName")?;

    let workspace = state.pipeline.create_project(username).await?;
    let project_id = workspace.id().to_string();
    tracing::info!(project = %project_id, project_name, "Project created");

    let public_url = public_url(state.public_base_url.as_deref(), &uri, &headers, &project_id);
    Ok(Json(ProjectCreated { success: true, project_id, public_url }))
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, ApiError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ApiError::invalid_input(format!("`{field}` is required"))),
    }
}

/// `{base}/p/{id}`, where the base is configured or derived from the request.
pub(crate) fn public_url(base: Option<&str>, uri: &Uri, headers: &HeaderMap, project_id: &str) -> String {
    if let Some(base) = base {
        return format!("{base}/p/{project_id}");
    }
    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|scheme| matches!(*scheme, "http" | "https"))
        .unwrap_or("http");
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .filter(|host| is_plausible_host(host))
        .unwrap_or("localhost");
    format!("{scheme}://{host}/p/{project_id}")
}

/// Hostnames, IPv4, bracketed IPv6, optional port. Nothing that could
/// smuggle a path or credentials into the URL.
fn is_plausible_host(host: &str) -> bool {
    !host.is_empty() && host.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rstest::rstest;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[rstest]
    #[case(&[("host", "example.com")], "http://example.com/p/alice-00000000")]
    #[case(&[("host", "example.com:5000")], "http://example.com:5000/p/alice-00000000")]
    #[case(&[("host", "example.com"), ("x-forwarded-proto", "https")], "https://example.com/p/alice-00000000")]
    #[case(&[("host", "example.com"), ("x-forwarded-proto", "https, http")], "https://example.com/p/alice-00000000")]
    #[case(&[("host", "example.com"), ("x-forwarded-proto", "javascript")], "http://example.com/p/alice-00000000")]
    #[case(&[("host", "evil.com/phish?")], "http://localhost/p/alice-00000000")]
    #[case(&[], "http://localhost/p/alice-00000000")]
    fn test_public_url_from_request(#[case] pairs: &[(&'static str, &'static str)], #[case] expected: &str) {
        let uri: Uri = "/api/projects".parse().unwrap();
        assert_eq!(public_url(None, &uri, &headers(pairs), "alice-00000000"), expected);
    }

    #[test]
    fn test_public_url_configured() {
        let uri: Uri = "/api/projects".parse().unwrap();
        let url = public_url(Some("https://sites.example.com"), &uri, &headers(&[("host", "internal")]), "a-1");
        assert_eq!(url, "https://sites.example.com/p/a-1");
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("   "))]
    fn test_required_rejects(#[case] value: Option<&str>) {
        assert!(required(value, "username").is_err());
    }
}
