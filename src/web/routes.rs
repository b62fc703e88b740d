use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;

use super::AppState;
use crate::error::ScreenshotError;
use crate::renderer::ScreenshotOutcome;
use crate::request::{normalize, RawRenderRequest};

/// Header carrying the owning workspace.
pub const WORKSPACE_HEADER: &str = "x-workspace-id";

const CACHE_HEADER: HeaderName = HeaderName::from_static("x-cache");
const KEY_HEADER: HeaderName = HeaderName::from_static("x-screenshot-key");

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/screenshot", get(screenshot))
        .route("/healthz", get(health))
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    (
        status,
        Json(ErrorBody {
            error: kind,
            message,
        }),
    )
        .into_response()
}

fn status_for(err: &ScreenshotError) -> StatusCode {
    match err {
        ScreenshotError::Validation(_) => StatusCode::BAD_REQUEST,
        ScreenshotError::BlockListFetch { .. } => StatusCode::BAD_GATEWAY,
        ScreenshotError::NavigationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ScreenshotError::Capture(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ScreenshotError::SchedulerClosed => StatusCode::SERVICE_UNAVAILABLE,
        ScreenshotError::ArtifactNotFound { .. }
        | ScreenshotError::Storage(_)
        | ScreenshotError::Browser(_)
        | ScreenshotError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn screenshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<RawRenderRequest>,
) -> Response {
    let Some(workspace_id) = headers
        .get(WORKSPACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "validation",
            format!("missing {WORKSPACE_HEADER} header"),
        );
    };

    let request = match normalize(&raw) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "validation", e.to_string()),
    };

    match state.service.get_or_create(workspace_id, &request).await {
        Ok(ScreenshotOutcome::NotAllowed) => error_response(
            StatusCode::FORBIDDEN,
            "origin_not_allowed",
            format!("{} is not an allowed origin", request.url),
        ),
        Ok(ScreenshotOutcome::Cached { key, bytes }) => image_response(&key, bytes, "HIT"),
        Ok(ScreenshotOutcome::Created { key, bytes }) => image_response(&key, bytes, "MISS"),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(url = %request.url, kind = e.kind(), error = %e, "Screenshot request failed");
            }
            error_response(status, e.kind(), e.to_string())
        }
    }
}

fn image_response(key: &str, bytes: Vec<u8>, cache: &'static str) -> Response {
    let content_type = mime_guess::from_path(key)
        .first_or_octet_stream()
        .to_string();

    let mut response = (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_HEADER, HeaderValue::from_static(cache));
    if let Ok(value) = HeaderValue::from_str(key) {
        headers.insert(KEY_HEADER, value);
    }
    response
}
