use super::error::ApiError;
use super::AppState;
use crate::error::ResizerError;
use crate::imaging::image_info;
use axum::body::Body;
use axum::extract::{Path as UrlPath, Request, State};
use axum::http::header::{self, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

pub const SERVICE_NAME: &str = "Dog API CDN";
pub const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

pub const X_ORIGINAL_IMAGE: &str = "x-original-image";

/// `<base>-<width>-<height>.<ext>` requests a resized rendition of `<base>.<ext>`
static RESIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+)-(\d+)-(\d+)\.(jpg|jpeg|png)$").expect("resize pattern is valid")
});

type HandlerResult<T> = std::result::Result<T, ApiError>;

pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "base_url": state.settings.base_url,
        "endpoints": {
            "images": "/images/{path}",
            "info": "/info/{path}",
            "health": "/health",
        }
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let settings = &state.settings;
    Json(json!({
        "status": "healthy",
        "assets_dir": settings.assets_dir.display().to_string(),
        "assets_exists": settings.assets_dir.exists(),
        "cache_dir": settings.cache_dir.display().to_string(),
    }))
}

/// Serve an original, or a resized JPEG when the name carries dimensions
pub async fn serve_image(
    State(state): State<Arc<AppState>>,
    UrlPath(file_path): UrlPath<String>,
    request: Request,
) -> HandlerResult<Response> {
    let relative = sanitize(&file_path)?;
    let file_name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ApiError::not_found(format!("Image not found: {}", file_path)))?;

    match RESIZE_PATTERN.captures(file_name) {
        Some(caps) => {
            let (width, height) = (parse_dimension(&caps[2]), parse_dimension(&caps[3]));
            let original = relative.with_file_name(format!("{}.{}", &caps[1], &caps[4]));
            serve_resized(&state, original, width, height).await
        }
        None => serve_original(&state, &relative, request).await,
    }
}

async fn serve_resized(
    state: &AppState,
    original: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
) -> HandlerResult<Response> {
    let settings = &state.settings;
    let within = |d: Option<u32>, max: u32| d.is_some_and(|d| d <= max);
    if !within(width, settings.max_width) || !within(height, settings.max_height) {
        return Err(ApiError::bad_request(format!(
            "Dimensions exceed maximum allowed size ({}x{})",
            settings.max_width, settings.max_height
        )));
    }

    let original_display = url_style(&original);
    let image_path = settings.assets_dir.join(&original);
    if !image_path.is_file() {
        return Err(ApiError::not_found(format!(
            "Original image not found: {}",
            original_display
        )));
    }

    let resizer = state.resizer.clone();
    let bytes = tokio::task::spawn_blocking(move || resizer.resize(&image_path, width, height, None))
        .await
        .map_err(|e| ResizerError::Internal(format!("resize task failed: {}", e)))??;

    debug!(
        "Served {} resized to {:?}x{:?}",
        original_display, width, height
    );

    let mut response = (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg")),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
            ),
        ],
        bytes,
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(&original_display) {
        response.headers_mut().insert(X_ORIGINAL_IMAGE, value);
    }

    Ok(response)
}

/// Stream the file as stored; conditional and range requests are honoured
async fn serve_original(
    state: &AppState,
    relative: &Path,
    request: Request,
) -> HandlerResult<Response> {
    let image_path = state.settings.assets_dir.join(relative);
    if !image_path.is_file() {
        return Err(ApiError::not_found(format!(
            "Image not found: {}",
            url_style(relative)
        )));
    }

    let mut response = ServeFile::new(&image_path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {})
        .map(Body::new);

    if response.status().is_success() {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
        );
    }

    Ok(response)
}

/// Dimensions and encoding of an original image
pub async fn info(
    State(state): State<Arc<AppState>>,
    UrlPath(file_path): UrlPath<String>,
) -> HandlerResult<Json<Value>> {
    let relative = sanitize(&file_path)?;
    let image_path = state.settings.assets_dir.join(&relative);
    if !image_path.is_file() {
        return Err(ApiError::not_found(format!(
            "Image not found: {}",
            url_style(&relative)
        )));
    }

    let info = tokio::task::spawn_blocking(move || image_info(&image_path))
        .await
        .map_err(|e| ResizerError::Internal(format!("info task failed: {}", e)))??;

    Ok(Json(json!({
        "path": url_style(&relative),
        "width": info.width,
        "height": info.height,
        "format": info.format,
        "color": info.color,
    })))
}

/// Relative path under the assets directory; anything that could escape it
/// is rejected.
fn sanitize(file_path: &str) -> HandlerResult<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(file_path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ApiError::bad_request(format!(
                    "Invalid image path: {}",
                    file_path
                )))
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(ApiError::not_found("Image not found"));
    }
    Ok(clean)
}

/// Digits that do not fit in a `u32` are reported as `None` (too large)
fn parse_dimension(digits: &str) -> Option<u32> {
    digits.parse().ok()
}

fn url_style(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
