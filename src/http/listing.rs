//! Directory listings and playlist editing against the metadata store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app::basename;
use crate::http::state::AppState;
use crate::meta::{MetaError, MetaStore};

/// The store key for an album: the upload root itself for the empty album,
/// a subdirectory otherwise.
pub fn album_cache_dir(state: &AppState, album: &str) -> PathBuf {
    if album.is_empty() {
        state.app.upload_root.clone()
    } else {
        state.app.upload_root.join(basename(album))
    }
}

/// GET /list?album=&cache — snapshot of the album's cache; without `cache`
/// a rescan runs first (synchronously, throttled by the store).
pub async fn list(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> Response {
    let album = params.get("album").cloned().unwrap_or_default();
    let dir = album_cache_dir(&state, &album);

    if !params.contains_key("cache") {
        let store = Arc::clone(&state.store);
        let rescan_dir = dir.clone();
        let updated = tokio::task::spawn_blocking(move || store.update_dir(&rescan_dir)).await;
        match updated {
            Ok(Ok(())) => {}
            Ok(Err(MetaError::NotFound)) => {
                return (StatusCode::BAD_REQUEST, "Bad request").into_response();
            }
            Ok(Err(e)) => {
                tracing::error!("rescan of {} failed: {e}", dir.display());
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Err(e) => {
                tracing::error!("rescan task panicked: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    let Some(snapshot) = state.store.get(&dir) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, no-store"),
        ],
        snapshot.to_vec(),
    )
        .into_response()
}

/// POST /editPlaylist?album= — body is a JSON string array naming audio
/// records in their new order.
pub async fn edit_playlist(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Json(names): Json<Vec<String>>,
) -> Response {
    let album = params.get("album").cloned().unwrap_or_default();
    let dir = album_cache_dir(&state, &album);

    let store = Arc::clone(&state.store);
    let edited = tokio::task::spawn_blocking(move || store.edit_playlist(&dir, names)).await;
    match edited {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(MetaError::NotFound)) => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Ok(Err(MetaError::Invalid(reason))) => {
            tracing::info!("playlist edit rejected: {reason}");
            (StatusCode::BAD_REQUEST, "Failed to edit playlist").into_response()
        }
        Ok(Err(e)) => {
            tracing::error!("playlist edit failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            tracing::error!("playlist task panicked: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Album discovery at startup: register the upload root and each immediate
/// subdirectory, then run the initial rescans.
pub fn register_albums(store: &MetaStore, upload_root: &std::path::Path) -> Result<(), MetaError> {
    let mut dirs = vec![upload_root.to_path_buf()];
    for entry in walkdir::WalkDir::new(upload_root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("cannot access album entry: {e}");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            dirs.push(entry.path().to_path_buf());
        }
    }

    for dir in dirs {
        store.add_dir(&dir)?;
        store.update_dir(&dir)?;
    }
    Ok(())
}
