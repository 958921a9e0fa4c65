//! Small JSON/text API handlers: ping, MIME lookup, the capability
//! manifest, and the native-transcoder bake pipeline.

use std::collections::HashMap;
use std::process::Stdio;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::app::FFMPEG_INPUT_LIMIT;
use crate::bridge::subordinate::impersonated_kind;
use crate::http::state::AppState;
use crate::meta::mime::mime_by_name;
use crate::meta::record::MediaDetails;

const PONG: &str = "imageserverpong";

/// /ping — fixed response; in debug mode a JSON array body is echoed into
/// the server log, at error level when `X-Debug: error` is set.
pub async fn ping(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.app.config.debug {
        return PONG.into_response();
    }

    if !body.is_empty() {
        if let Ok(lines) = serde_json::from_slice::<Vec<String>>(&body) {
            let joined = lines.join("\n");
            if headers.get("X-Debug").and_then(|v| v.to_str().ok()) == Some("error") {
                tracing::error!("[console.error] {joined}");
            } else {
                tracing::info!("[console.log] {joined}");
            }
        }
    }

    (StatusCode::OK, [("X-Debug", "true")], PONG).into_response()
}

/// GET /api/typeByName?name= — MIME type for a filename.
pub async fn type_by_name(Query(params): Query<HashMap<String, String>>) -> Response {
    let name = params.get("name").cloned().unwrap_or_default();
    mime_by_name(&name)
        .unwrap_or("application/octet-stream")
        .into_response()
}

/// GET /api/manifest — server capabilities for the browser page.
pub async fn manifest(State(state): State<AppState>) -> Response {
    Json(json!({
        "name": state.app.config.name,
        "version": env!("GIT_VERSION"),
        "ffmpegInputLimit": FFMPEG_INPUT_LIMIT,
        "maxConcurrentFfmpeg": state.app.config.max_concurrent_ffmpeg,
    }))
    .into_response()
}

/// One native-transcoder invocation in a bake request. `input` and `output`
/// name the argv positions to substitute with the media path and the
/// sidecar path (derived from `suffix`) before running.
#[derive(Debug, Deserialize)]
pub struct BakeCommand {
    pub args: Vec<String>,
    pub input: usize,
    pub output: usize,
    pub suffix: String,
}

#[derive(Debug, Deserialize)]
pub struct BakeRequest {
    #[serde(default)]
    pub album: String,
    pub base: String,
    pub commands: Vec<BakeCommand>,
}

/// POST /api/bakeMetadata — run the declared transcoder commands against
/// one media file to produce its sidecars, then distill the collected
/// stderr into a details sidecar.
pub async fn bake_metadata(State(state): State<AppState>, Json(req): Json<BakeRequest>) -> Response {
    let album = crate::app::basename(&req.album);
    let base = crate::app::basename(&req.base);
    let media_path = state.app.upload_fullpath(&album, &base);
    if !media_path.is_file() {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    }

    let mut stderr_all = String::new();
    for command in &req.commands {
        if command.args.is_empty()
            || command.input >= command.args.len()
            || command.output >= command.args.len()
            || command.input == command.output
        {
            return (StatusCode::BAD_REQUEST, "Invalid command indexes").into_response();
        }
        if impersonated_kind(&command.args[0]).is_none() {
            return (StatusCode::BAD_REQUEST, "Not a transcoder command").into_response();
        }

        let out_path = state.app.metadata_fullpath(&album, &base, &command.suffix);
        if let Some(parent) = out_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut args = command.args.clone();
        args[command.input] = media_path.to_string_lossy().into_owned();
        args[command.output] = out_path.to_string_lossy().into_owned();

        state.ffmpeg_gate.acquire().await;
        let result = tokio::process::Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        state.ffmpeg_gate.release();

        match result {
            Ok(output) => {
                // The transcoder reports metadata on stderr even when it
                // exits non-zero (e.g. probe-only runs).
                stderr_all.push_str(&String::from_utf8_lossy(&output.stderr));
                stderr_all.push('\n');
            }
            Err(e) => {
                tracing::error!("bake command {:?} failed to run: {e}", args[0]);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Transcoder failed").into_response();
            }
        }
    }

    let details = parse_details(&stderr_all);
    let details_path = state.app.metadata_fullpath(&album, &base, ".json");
    if let Some(parent) = details_path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match serde_json::to_vec_pretty(&details) {
        Ok(data) => {
            if let Err(e) = tokio::fs::write(&details_path, data).await {
                tracing::error!("cannot write details sidecar {}: {e}", details_path.display());
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
        Err(e) => {
            tracing::error!("cannot encode details: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    Json(details).into_response()
}

/// Distill transcoder stderr into the details subrecord. Lines look like
/// `    title           : Some Song` and
/// `  Duration: 00:03:25.44, start: 0.000000, bitrate: 320 kb/s`.
pub fn parse_details(stderr: &str) -> MediaDetails {
    let mut details = MediaDetails::default();
    for line in stderr.lines() {
        if let Some(value) = parse_metadata_line(line, "title", None) {
            details.title.get_or_insert(value);
        }
        if let Some(value) = parse_metadata_line(line, "artist", None) {
            details.artist.get_or_insert(value);
        }
        if let Some(value) = parse_metadata_line(line, "album", None) {
            details.album.get_or_insert(value);
        }
        if let Some(value) = parse_metadata_line(line, "Duration", Some(",")) {
            details.duration.get_or_insert(value);
        }
    }
    details
}

fn parse_metadata_line(line: &str, key: &str, end_at: Option<&str>) -> Option<String> {
    let (left, right) = line.split_once(':')?;
    if left.trim() != key {
        return None;
    }
    let mut value = right.trim();
    if let Some(end) = end_at {
        value = value.split(end).next().unwrap_or(value).trim();
    }
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}
