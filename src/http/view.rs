//! GET /view/{base} — serve a media file or one of its sidecars, honoring
//! If-Modified-Since (truncated to seconds) and single-part Range requests.

use std::path::Path;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http_range_header::parse_range_header;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::app::basename;
use crate::http::state::AppState;
use crate::meta::mime::mime_by_name;

#[derive(Deserialize)]
pub struct ViewQuery {
    #[serde(default)]
    album: String,
    /// Sidecar suffix, e.g. `.jpg` or `_small.webp`; selects the sidecar
    /// instead of the media file itself.
    metadata: Option<String>,
}

pub async fn serve(
    State(state): State<AppState>,
    UrlPath(base): UrlPath<String>,
    Query(query): Query<ViewQuery>,
    headers: HeaderMap,
) -> Response {
    let base = basename(&base);
    let album = basename(&query.album);

    // The content type follows the file actually served: the media file
    // itself, or `<base><suffix>` for a sidecar.
    let (fullpath, served_name, cache_control) = match &query.metadata {
        Some(suffix) => {
            let suffix = basename(suffix);
            (
                state.app.metadata_fullpath(&album, &base, &suffix),
                format!("{base}{suffix}"),
                // Sidecars change only when rebaked.
                "public, max-age=86400",
            )
        }
        None => (
            state.app.upload_fullpath(&album, &base),
            base.clone(),
            "public, no-store",
        ),
    };

    serve_file(&fullpath, &served_name, cache_control, &headers).await
}

async fn serve_file(path: &Path, served_name: &str, cache_control: &str, headers: &HeaderMap) -> Response {
    let stat = match tokio::fs::metadata(path).await {
        Ok(stat) => stat,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
        Err(e) => {
            tracing::error!("cannot stat {}: {e}", path.display());
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if stat.is_dir() {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    }

    let modified = stat.modified().ok();
    if let (Some(modified), Some(since)) = (modified, headers.get(header::IF_MODIFIED_SINCE)) {
        if not_modified(modified, since) {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(mime_by_name(served_name).unwrap_or("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(cache_control) {
        response_headers.insert(header::CACHE_CONTROL, value);
    }
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(modified) = modified {
        if let Ok(value) = HeaderValue::from_str(&httpdate(modified)) {
            response_headers.insert(header::LAST_MODIFIED, value);
        }
    }

    if let Some(range_value) = headers.get(header::RANGE) {
        let Ok(range_str) = range_value.to_str() else {
            return range_not_satisfiable(stat.len());
        };
        return range_response(path, stat.len(), range_str, response_headers).await;
    }

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!("cannot open {}: {e}", path.display());
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stat.len()));
    let body = Body::from_stream(ReaderStream::new(file));
    (StatusCode::OK, response_headers, body).into_response()
}

/// If-Modified-Since comparison at second granularity, per HTTP dates.
fn not_modified(modified: SystemTime, since: &HeaderValue) -> bool {
    let Ok(since_str) = since.to_str() else {
        return false;
    };
    let Ok(since_time) = DateTime::parse_from_rfc2822(since_str) else {
        return false;
    };
    let modified: DateTime<Utc> = modified.into();
    modified.timestamp() <= since_time.timestamp()
}

fn httpdate(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn range_not_satisfiable(file_size: u64) -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE, format!("bytes */{file_size}"))],
    )
        .into_response()
}

/// Serve the first validated range as a 206. Multi-part ranges collapse to
/// their first entry.
async fn range_response(
    path: &Path,
    file_size: u64,
    range_str: &str,
    mut headers: HeaderMap,
) -> Response {
    let Ok(parsed) = parse_range_header(range_str) else {
        return range_not_satisfiable(file_size);
    };
    let Ok(ranges) = parsed.validate(file_size) else {
        return range_not_satisfiable(file_size);
    };
    let Some(first) = ranges.into_iter().next() else {
        return range_not_satisfiable(file_size);
    };

    let start = *first.start();
    let end = *first.end();
    let length = end - start + 1;

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!("range: cannot open {}: {e}", path.display());
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
        tracing::error!("range: cannot seek in {}: {e}", path.display());
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let content_range = format!("bytes {start}-{end}/{file_size}");
    if let Ok(value) = HeaderValue::from_str(&content_range) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    let body = Body::from_stream(ReaderStream::new(file.take(length)));
    (StatusCode::PARTIAL_CONTENT, headers, body).into_response()
}
