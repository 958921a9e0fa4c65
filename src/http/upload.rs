//! POST /upload — streaming multipart receiver with CRC-32 integrity
//! checking and atomic rename on completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::multipart::Multipart;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use crc32fast::Hasher;
use tokio::io::AsyncWriteExt;

use crate::app::basename;
use crate::http::state::AppState;
use crate::util::checksum::crc32_hex;

pub async fn receive(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Response {
    let album = basename(&params.get("album").cloned().unwrap_or_default());
    let dir = state.app.album_dir(&album);
    if !dir.is_dir() {
        return (StatusCode::NOT_FOUND, "Album not found").into_response();
    }

    let mut expected_crc: Option<String> = None;
    // Out-of-band sidecar blobs keyed by suffix, buffered until the file
    // part fixes the final name they attach to.
    let mut sidecars: Vec<(String, Vec<u8>)> = Vec::new();
    let mut uploaded: Option<(String, String)> = None; // (final base, crc)

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::info!("multipart read failed: {e}");
                return (StatusCode::BAD_REQUEST, "Error reading part").into_response();
            }
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == "crc" {
            if uploaded.is_some() {
                return (StatusCode::BAD_REQUEST, "crc part must precede file").into_response();
            }
            if expected_crc.is_some() {
                return (StatusCode::BAD_REQUEST, "Duplicate crc part").into_response();
            }
            let text = match field.text().await {
                Ok(text) => text,
                Err(_) => return (StatusCode::BAD_REQUEST, "Error reading part").into_response(),
            };
            if text.len() != 8 || !text.chars().all(|c| c.is_ascii_hexdigit()) {
                return (StatusCode::BAD_REQUEST, "Malformed crc").into_response();
            }
            expected_crc = Some(text.to_ascii_lowercase());
        } else if let Some(suffix) = name.strip_prefix("metadata:") {
            if uploaded.is_some() {
                return (StatusCode::BAD_REQUEST, "metadata part must precede file").into_response();
            }
            let suffix = basename(suffix);
            if sidecars.iter().any(|(s, _)| *s == suffix) {
                return (StatusCode::BAD_REQUEST, "Duplicate metadata part").into_response();
            }
            match field.bytes().await {
                Ok(data) => sidecars.push((suffix, data.to_vec())),
                Err(_) => return (StatusCode::BAD_REQUEST, "Error reading part").into_response(),
            }
        } else if name == "file" {
            if uploaded.is_some() {
                return (StatusCode::BAD_REQUEST, "Too many files").into_response();
            }

            let original = basename(field.file_name().unwrap_or("upload"));
            let final_base = unique_name(&dir, &original);
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let inprogress = dir.join(format!("{final_base}.{epoch}.inprogress"));
            let fullpath = dir.join(&final_base);

            let mut out = match tokio::fs::File::create(&inprogress).await {
                Ok(out) => out,
                Err(e) => {
                    tracing::error!("cannot create {}: {e}", inprogress.display());
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Error creating file").into_response();
                }
            };

            // Hash while writing; no second pass over the body.
            let mut hasher = Hasher::new();
            let mut field = field;
            loop {
                match field.chunk().await {
                    Ok(Some(chunk)) => {
                        hasher.update(&chunk);
                        if let Err(e) = out.write_all(&chunk).await {
                            tracing::error!("cannot write {}: {e}", inprogress.display());
                            return (StatusCode::INTERNAL_SERVER_ERROR, "Error writing to server")
                                .into_response();
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::info!("upload stream failed: {e}");
                        return (StatusCode::INTERNAL_SERVER_ERROR, "Error reading from part")
                            .into_response();
                    }
                }
            }
            if let Err(e) = out.flush().await {
                tracing::error!("cannot flush {}: {e}", inprogress.display());
                return (StatusCode::INTERNAL_SERVER_ERROR, "Error writing to server").into_response();
            }
            drop(out);

            let computed = crc32_hex(hasher.finalize());
            if expected_crc.as_deref() != Some(computed.as_str()) {
                // The in-progress file stays behind for later cleanup.
                tracing::warn!(
                    "upload checksum mismatch for {}: expected {:?}, computed {}",
                    final_base,
                    expected_crc,
                    computed
                );
                return (StatusCode::INTERNAL_SERVER_ERROR, "Hash doesn't match").into_response();
            }

            if let Err(e) = tokio::fs::rename(&inprogress, &fullpath).await {
                tracing::error!("cannot finalize {}: {e}", fullpath.display());
                return (StatusCode::INTERNAL_SERVER_ERROR, "Error changing name").into_response();
            }

            uploaded = Some((final_base, computed));
        } else {
            return (StatusCode::BAD_REQUEST, "Unknown part").into_response();
        }
    }

    let Some((final_base, crc)) = uploaded else {
        return (StatusCode::BAD_REQUEST, "Missing file part").into_response();
    };

    // Sidecars land next to the other per-file metadata once the final name
    // is known.
    for (suffix, data) in sidecars {
        let path = state.app.metadata_fullpath(&album, &final_base, &suffix);
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(&path, &data).await {
            tracing::error!("cannot write sidecar {}: {e}", path.display());
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error writing metadata").into_response();
        }
    }

    let fullpath = dir.join(&final_base);
    let stat = match tokio::fs::metadata(&fullpath).await {
        Ok(stat) => stat,
        Err(e) => {
            tracing::error!("cannot stat fresh upload {}: {e}", fullpath.display());
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let store = Arc::clone(&state.store);
    let record_dir = dir.clone();
    let record_base = final_base.clone();
    let recorded = tokio::task::spawn_blocking(move || {
        store.add_dir(&record_dir)?;
        store.set_metadata(&record_dir, &record_base, &stat, crc)
    })
    .await;
    match recorded {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("cannot record upload {final_base}: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            tracing::error!("metadata task panicked: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    tracing::info!("uploaded {final_base} to album {album:?}");
    StatusCode::OK.into_response()
}

/// Pick a free final name: the original, then `-2` through `-5` suffixes,
/// then a unix-epoch suffix as the last resort.
fn unique_name(dir: &std::path::Path, base: &str) -> String {
    let (stem, ext) = split_ext(base);

    for i in 0..5 {
        let candidate = if i == 0 {
            base.to_string()
        } else {
            format!("{stem}-{}{ext}", i + 1)
        };
        if !dir.join(&candidate).exists() {
            return candidate;
        }
    }

    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{stem}-{epoch}{ext}")
}

fn split_ext(base: &str) -> (&str, &str) {
    match base.rfind('.') {
        Some(dot) if dot > 0 => (&base[..dot], &base[dot..]),
        _ => (base, ""),
    }
}
