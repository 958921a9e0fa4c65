//! Static assets loaded into memory at startup and served with strong
//! CRC-32 ETags. SVG assets can be re-emitted with width/height/fill
//! overrides from query parameters.

use std::collections::HashMap;
use std::path::Path;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::http::state::AppState;
use crate::meta::mime::mime_by_name;
use crate::util::checksum::{crc32_hex, crc32_of_bytes};

struct StaticFile {
    data: Vec<u8>,
    etag: String,
}

pub struct StaticFiles {
    // Keyed by path relative to the static root, forward slashes.
    files: HashMap<String, StaticFile>,
}

impl StaticFiles {
    /// Read every file under `root` into memory. A missing root is fine —
    /// the server then runs headless (API only).
    pub fn load(root: &Path) -> Self {
        let mut files = HashMap::new();
        if root.is_dir() {
            for entry in WalkDir::new(root).follow_links(true) {
                let entry = match entry {
                    Ok(entry) if entry.file_type().is_file() => entry,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("cannot access static entry: {e}");
                        continue;
                    }
                };
                let Ok(rel) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let key = rel.to_string_lossy().replace('\\', "/");
                match std::fs::read(entry.path()) {
                    Ok(data) => {
                        let etag = format!("\"{}\"", crc32_hex(crc32_of_bytes(&data)));
                        files.insert(key, StaticFile { data, etag });
                    }
                    Err(e) => tracing::warn!("cannot read {}: {e}", entry.path().display()),
                }
            }
        }
        tracing::info!("loaded {} static assets", files.len());
        StaticFiles { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Deserialize, Default)]
pub struct SvgQuery {
    w: Option<String>,
    h: Option<String>,
    f: Option<String>,
}

/// GET / — the index page.
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    respond(&state, "index.html", &SvgQuery::default(), &headers)
}

/// GET /static/{*path}
pub async fn serve(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    Query(query): Query<SvgQuery>,
    headers: HeaderMap,
) -> Response {
    // Normalized lookups only; anything trying to climb out is not a key.
    if path.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }
    respond(&state, &path, &query, &headers)
}

fn respond(state: &AppState, path: &str, query: &SvgQuery, headers: &HeaderMap) -> Response {
    let statics = &state.statics;

    // Prefer a pre-compressed sibling when present.
    let (key, gzipped) = if statics.files.contains_key(&format!("{path}.gz")) {
        (format!("{path}.gz"), true)
    } else {
        (path.to_string(), false)
    };

    let Some(file) = statics.files.get(&key) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let cache_control = if path.starts_with("ffmpeg/") {
        // WASM transcoder bundles are versioned by filename; cache hard.
        "public, max-age=604800"
    } else {
        "public, no-cache"
    };

    if headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == file.etag)
    {
        return (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, file.etag.clone()),
                (header::CACHE_CONTROL, cache_control.to_string()),
            ],
        )
            .into_response();
    }

    let mime = mime_by_name(path).unwrap_or("application/octet-stream");
    let mut response_headers = axum::http::HeaderMap::new();
    if let Ok(value) = file.etag.parse() {
        response_headers.insert(header::ETAG, value);
    }
    if let Ok(value) = cache_control.parse() {
        response_headers.insert(header::CACHE_CONTROL, value);
    }
    if let Ok(value) = mime.parse() {
        response_headers.insert(header::CONTENT_TYPE, value);
    }

    let body = if gzipped {
        response_headers.insert(
            header::CONTENT_ENCODING,
            axum::http::HeaderValue::from_static("gzip"),
        );
        file.data.clone()
    } else if path.ends_with(".svg") {
        process_svg(&String::from_utf8_lossy(&file.data), query).into_bytes()
    } else {
        file.data.clone()
    };

    (StatusCode::OK, response_headers, body).into_response()
}

/// Pseudo-parse the SVG and patch width, height, and fill on the root
/// element. The defaults match stock icon exports.
fn process_svg(svg: &str, query: &SvgQuery) -> String {
    let mut width = query.w.clone().unwrap_or_default();
    let mut height = query.h.clone().unwrap_or_default();
    let fill = query.f.clone().unwrap_or_default();

    if height.is_empty() && !width.is_empty() {
        height = width.clone();
    }
    if width.is_empty() && !height.is_empty() {
        width = height.clone();
    }

    let mut out = String::with_capacity(svg.len());
    for line in svg.lines() {
        let mut line = line.to_string();
        if line.contains("<svg") {
            if !width.is_empty() {
                line = line.replacen("width=\"24px\"", &format!("width=\"{width}\""), 1);
            }
            if !height.is_empty() {
                line = line.replacen("height=\"24px\"", &format!("height=\"{height}\""), 1);
            }
            if !fill.is_empty() {
                line = line.replacen("fill=\"#5f6368\"", &format!("fill=\"{fill}\""), 1);
            }
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}
